//! Restricted interpreter for before-all and before-build steps.
//!
//! While cross compiling only three kinds of command make sense: `yum`
//! installs (run in the target's native image, results copied into the
//! toolchain), and `pip`/`python` invocations (run in the cross environment).
//! A command line is split on `&&` and classified in full before anything runs.

use super::layout::CrossLayout;
use crate::container::{
    CommandInvocation, ContainerBackend, ContainerPath, Environment, ShellChannel,
};
use crate::error::{BuildError, Result};
use crate::logger::BuildLogger;

/// One `&&`-separated part of a restricted command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestrictedCommand {
    /// `yum ...`: installed into the cross toolchain via the native image
    PackageInstall(String),
    /// `pip ...`, `python ...`, `python3 ...`: run in the cross environment
    RuntimeInvocation(String),
    /// Anything else
    Rejected(String),
}

impl RestrictedCommand {
    /// Classify one command
    pub fn classify(command: &str) -> Self {
        let command = command.trim().replace('\t', " ");
        if command.starts_with("yum ") {
            RestrictedCommand::PackageInstall(command)
        } else if ["pip ", "python ", "python3 "]
            .iter()
            .any(|prefix| command.starts_with(prefix))
        {
            RestrictedCommand::RuntimeInvocation(command)
        } else {
            RestrictedCommand::Rejected(command)
        }
    }
}

/// Split a command line on `&&` and classify each part
pub fn classify_line(command_line: &str) -> Vec<RestrictedCommand> {
    command_line.split("&&").map(RestrictedCommand::classify).collect()
}

/// Everything [`execute_restricted_command`] needs besides the command line
pub struct RestrictedContext<'a, B: ContainerBackend> {
    /// Backend for one-shot native containers
    pub backend: &'a B,
    /// Image of the target's native container
    pub native_image: &'a str,
    /// Target architecture, e.g. `aarch64`
    pub target_arch: &'a str,
    /// Shared path layout
    pub layout: &'a CrossLayout,
    /// Progress output
    pub logger: &'a BuildLogger,
}

/// Run a before-all/before-build command line in the cross-build container.
///
/// Fails without running anything if any part is rejected. During
/// before-build, the first pip/python part provisions `pip`, `pip3`, `python`
/// and `python3` shims pointing at the build interpreter; they live in a
/// temporary directory that is removed afterwards.
pub async fn execute_restricted_command<B: ContainerBackend>(
    ctx: &RestrictedContext<'_, B>,
    channel: &mut B::Channel,
    command_line: &str,
    is_before_build: bool,
    env: &Environment,
) -> Result<()> {
    let commands = classify_line(command_line);
    if let Some(RestrictedCommand::Rejected(command)) = commands
        .iter()
        .find(|c| matches!(c, RestrictedCommand::Rejected(_)))
    {
        ctx.logger.warning(
            "During cross compilation, in wheel build phase, only pip/python/yum related commands are allowed",
        );
        return Err(BuildError::RestrictedCommand {
            command: command.clone(),
        });
    }

    if !ctx.layout.host_install_deps_script().is_file() {
        channel
            .call([
                "cp",
                ctx.layout.install_deps_script().as_str(),
                ctx.layout.host_tmp_in_container().as_str(),
            ])
            .await?;
    }

    let mut run_env = env.clone();
    let mut shim_dir: Option<ContainerPath> = None;
    let outcome = run_commands(
        ctx,
        channel,
        &commands,
        is_before_build,
        &mut run_env,
        &mut shim_dir,
    )
    .await;

    if let Some(dir) = shim_dir {
        let cleanup = channel.call(["rm", "-rf", dir.as_str()]).await;
        if outcome.is_ok() {
            cleanup?;
        }
    }
    outcome
}

async fn run_commands<B: ContainerBackend>(
    ctx: &RestrictedContext<'_, B>,
    channel: &mut B::Channel,
    commands: &[RestrictedCommand],
    is_before_build: bool,
    env: &mut Environment,
    shim_dir: &mut Option<ContainerPath>,
) -> Result<()> {
    for command in commands {
        match command {
            RestrictedCommand::PackageInstall(cmd) => {
                install_into_toolchain(ctx, channel, cmd, env).await?;
            }
            RestrictedCommand::RuntimeInvocation(cmd) => {
                if is_before_build && shim_dir.is_none() {
                    *shim_dir = Some(provision_shims(channel, env).await?);
                }
                channel
                    .exec(CommandInvocation::new(["sh", "-c", cmd.as_str()]).env(env))
                    .await?;
            }
            RestrictedCommand::Rejected(command) => {
                return Err(BuildError::RestrictedCommand {
                    command: command.clone(),
                });
            }
        }
    }
    Ok(())
}

async fn install_into_toolchain<B: ContainerBackend>(
    ctx: &RestrictedContext<'_, B>,
    channel: &mut B::Channel,
    cmd: &str,
    env: &Environment,
) -> Result<()> {
    ctx.logger.notice(&format!(
        "Running cmd: '{cmd}' in target's native container '{}' and copy the artifacts into the toolchain",
        ctx.native_image
    ));

    let script = format!("{} \"{cmd}\"", ctx.layout.install_deps_script_in_container());
    ctx.backend.run_oneshot(ctx.native_image, &script).await?;

    let toolchain_deps = ctx.layout.toolchain_deps(env, ctx.target_arch)?;
    let mut entries: Vec<String> = std::fs::read_dir(ctx.layout.host_deps_usr())?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();

    for entry in entries {
        let source = ctx.layout.host_deps_usr_in_container().join(&entry);
        channel
            .call(["cp", "-rf", source.as_str(), toolchain_deps.as_str()])
            .await?;
    }
    Ok(())
}

/// Link pip/python names to the build interpreter in a fresh PATH entry
async fn provision_shims<C: ShellChannel>(
    channel: &mut C,
    env: &mut Environment,
) -> Result<ContainerPath> {
    let dir = ContainerPath::new(channel.capture_in(["mktemp", "-d"], None).await?);
    env.prepend_path(dir.as_str());

    let build_pip =
        ContainerPath::new(channel.capture_in(["which", "build-pip"], Some(&*env)).await?);
    let build_bin = build_pip.parent().unwrap_or_else(|| ContainerPath::new("/"));

    for (link, target) in [
        ("pip", "build-pip"),
        ("pip3", "build-pip3"),
        ("python", "build-python"),
        ("python3", "build-python3"),
    ] {
        let (target, link) = (build_bin.join(target), dir.join(link));
        channel
            .exec(CommandInvocation::new(["ln", "-s", target.as_str(), link.as_str()]).env(env))
            .await?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            RestrictedCommand::classify("  yum install -y libffi-devel "),
            RestrictedCommand::PackageInstall("yum install -y libffi-devel".to_string())
        );
        assert_eq!(
            RestrictedCommand::classify("pip install cython"),
            RestrictedCommand::RuntimeInvocation("pip install cython".to_string())
        );
        assert_eq!(
            RestrictedCommand::classify("python3\t-m pip install x"),
            RestrictedCommand::RuntimeInvocation("python3 -m pip install x".to_string())
        );
        assert_eq!(
            RestrictedCommand::classify("make install"),
            RestrictedCommand::Rejected("make install".to_string())
        );
        // prefix must be a whole word
        assert!(matches!(
            RestrictedCommand::classify("pipx install x"),
            RestrictedCommand::Rejected(_)
        ));
    }

    #[test]
    fn test_classify_line() {
        let commands = classify_line("yum install -y zlib-devel && pip install numpy&&echo hi");
        assert_eq!(commands.len(), 3);
        assert!(matches!(commands[0], RestrictedCommand::PackageInstall(_)));
        assert!(matches!(commands[1], RestrictedCommand::RuntimeInvocation(_)));
        assert_eq!(commands[2], RestrictedCommand::Rejected("echo hi".to_string()));
    }
}
