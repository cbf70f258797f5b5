//! Container shell channels.
//!
//! A [`ShellChannel`] turns one long-lived interactive shell inside a container
//! into a synchronous command runner with file transfer. [`ContainerBackend`]
//! opens channels and runs one-shot helper containers. The pipeline is written
//! against these two traits; [`EngineBackend`] implements them with the docker
//! or podman CLI.

mod channel;
mod engine;
mod env;
mod guard;
pub mod protocol;

pub use channel::RemoteShell;
pub use engine::{ContainerEngine, EngineBackend, check_engine_available};
pub use env::Environment;

use crate::error::{BuildError, ChannelError};
use std::fmt;
use std::path::Path;

/// A POSIX path inside a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerPath(String);

impl ContainerPath {
    /// Wrap a container path
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Append a component with `/`
    pub fn join(&self, component: &str) -> Self {
        let component = component.trim_start_matches('/');
        if component.is_empty() {
            return self.clone();
        }
        if self.0.ends_with('/') {
            Self(format!("{}{}", self.0, component))
        } else {
            Self(format!("{}/{}", self.0, component))
        }
    }

    /// Parent directory, or `None` for `/` and bare names
    pub fn parent(&self) -> Option<Self> {
        let trimmed = self.0.trim_end_matches('/');
        let idx = trimmed.rfind('/')?;
        if idx == 0 {
            Some(Self("/".to_string()))
        } else {
            Some(Self(trimmed[..idx].to_string()))
        }
    }

    /// Final path component
    pub fn file_name(&self) -> &str {
        let trimmed = self.0.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// Same path seen through another mount point, e.g. `/tmp/x` as `/host/tmp/x`
    pub fn rebased(&self, prefix: &str) -> Self {
        Self(format!("{}{}", prefix.trim_end_matches('/'), self.0))
    }

    /// The path as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// One command to run inside a container
#[derive(Debug, Clone, Default)]
pub struct CommandInvocation {
    /// Argument vector; the first element is the program
    pub args: Vec<String>,
    /// Full environment for the command, or the shell's own when `None`
    pub env: Option<Environment>,
    /// Working directory, or the channel default when `None`
    pub cwd: Option<ContainerPath>,
    /// Capture output instead of streaming it to stdout
    pub capture: bool,
    /// Report a non-zero status instead of failing
    pub allow_failure: bool,
}

impl CommandInvocation {
    /// Create an invocation from an argument vector
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Run with this environment
    pub fn env(mut self, env: &Environment) -> Self {
        self.env = Some(env.clone());
        self
    }

    /// Run from this directory
    pub fn cwd(mut self, cwd: &ContainerPath) -> Self {
        self.cwd = Some(cwd.clone());
        self
    }

    /// Capture output
    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Tolerate a non-zero exit status
    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }

    /// Argument vector as a shell-quoted string for logs
    pub fn display(&self) -> String {
        self.args
            .iter()
            .map(|arg| String::from_utf8_lossy(&protocol::shell_quote(arg.as_bytes())).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured bytes, empty unless the invocation captured
    pub stdout: Vec<u8>,
    /// Exit status
    pub status: i32,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Captured output decoded lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Captured output with surrounding whitespace removed
    pub fn trimmed(&self) -> String {
        self.text().trim().to_string()
    }
}

/// Synchronous command and file channel into one container.
///
/// Methods take `&mut self`: a channel never has more than one command in flight.
#[allow(async_fn_in_trait)]
pub trait ShellChannel {
    /// Run a command and wait for its exit status
    async fn exec(&mut self, invocation: CommandInvocation) -> Result<CommandOutput, ChannelError>;

    /// Copy a host file or directory into the container
    async fn copy_in(&mut self, host_path: &Path, dest: &ContainerPath) -> Result<(), ChannelError>;

    /// Copy a container directory's contents out to a host directory
    async fn copy_out(&mut self, src: &ContainerPath, host_path: &Path) -> Result<(), ChannelError>;

    /// Paths in `dir` matching `pattern`
    async fn glob(
        &mut self,
        dir: &ContainerPath,
        pattern: &str,
    ) -> Result<Vec<ContainerPath>, ChannelError>;

    /// Environment of the container's shell
    async fn environment(&mut self) -> Result<Environment, ChannelError>;

    /// Shut the shell down and remove the container. Safe to call twice.
    async fn close(&mut self) -> Result<(), ChannelError>;

    /// Run a command with default options
    async fn call<I, S>(&mut self, args: I) -> Result<(), ChannelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec(CommandInvocation::new(args)).await.map(|_| ())
    }

    /// Run a command in `env` and return its trimmed output
    async fn capture_in<I, S>(
        &mut self,
        args: I,
        env: Option<&Environment>,
    ) -> Result<String, ChannelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut invocation = CommandInvocation::new(args).capture();
        invocation.env = env.cloned();
        Ok(self.exec(invocation).await?.trimmed())
    }
}

/// Opens container channels and runs one-shot helper containers
#[allow(async_fn_in_trait)]
pub trait ContainerBackend {
    /// Channel type this backend produces
    type Channel: ShellChannel;

    /// Fail with an actionable message if the engine cannot be used
    async fn check_available(&self) -> Result<(), BuildError>;

    /// Start a container from `image` and attach a shell channel to it
    async fn open(
        &self,
        image: &str,
        simulate_32_bit: bool,
        cwd: &ContainerPath,
    ) -> Result<Self::Channel, ChannelError>;

    /// Run `script` with bash in a throwaway container that sees the host root at `/host`
    async fn run_oneshot(&self, image: &str, script: &str) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_path_join() {
        let root = ContainerPath::new("/project");
        assert_eq!(root.join("src/pkg").as_str(), "/project/src/pkg");
        assert_eq!(root.join("").as_str(), "/project");
        assert_eq!(ContainerPath::new("/").join("output").as_str(), "/output");
    }

    #[test]
    fn test_container_path_parent_and_name() {
        let path = ContainerPath::new("/opt/python/cp38-cp38-xc/cross");
        assert_eq!(path.parent().unwrap().as_str(), "/opt/python/cp38-cp38-xc");
        assert_eq!(path.file_name(), "cross");
        assert_eq!(ContainerPath::new("/tmp").parent().unwrap().as_str(), "/");
        assert!(ContainerPath::new("relative").parent().is_none());
    }

    #[test]
    fn test_container_path_rebased() {
        let wheel = ContainerPath::new("/tmp/cibuildwheel/built_wheel/a.whl");
        assert_eq!(
            wheel.rebased("/host").as_str(),
            "/host/tmp/cibuildwheel/built_wheel/a.whl"
        );
    }

    #[test]
    fn test_invocation_display_quotes() {
        let invocation = CommandInvocation::new(["sh", "-c", "echo hi"]);
        assert_eq!(invocation.display(), "sh -c 'echo hi'");
    }

    #[test]
    fn test_output_trimmed() {
        let output = CommandOutput {
            stdout: b"/usr/bin/python\n".to_vec(),
            status: 0,
        };
        assert_eq!(output.trimmed(), "/usr/bin/python");
        assert!(output.success());
    }
}
