//! Container engine selection and availability.

use super::{ContainerBackend, ContainerPath, RemoteShell};
use crate::cli::OutputManager;
use crate::error::{BuildError, ChannelError, ConfigurationError};
use std::fmt;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Timeout for the engine version check (5 seconds)
pub const ENGINE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Platform-specific engine startup instructions
#[cfg(target_os = "macos")]
const ENGINE_START_HELP: &str = "Start Docker Desktop from Applications or Spotlight";

#[cfg(target_os = "linux")]
const ENGINE_START_HELP: &str = "Start Docker daemon: sudo systemctl start docker";

#[cfg(target_os = "windows")]
const ENGINE_START_HELP: &str = "Start Docker Desktop from the Start menu";

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
const ENGINE_START_HELP: &str = "Start the container engine service";

/// Which container CLI drives the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerEngine {
    /// `docker`
    #[default]
    Docker,
    /// `podman`
    Podman,
}

impl ContainerEngine {
    /// Executable name
    pub fn program(&self) -> &'static str {
        match self {
            ContainerEngine::Docker => "docker",
            ContainerEngine::Podman => "podman",
        }
    }
}

impl fmt::Display for ContainerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl FromStr for ContainerEngine {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "docker" => Ok(ContainerEngine::Docker),
            "podman" => Ok(ContainerEngine::Podman),
            other => Err(ConfigurationError::InvalidOption {
                option: "container-engine".to_string(),
                reason: format!("'{other}' is not supported, use docker or podman"),
            }),
        }
    }
}

/// Checks that the engine CLI is installed and answers.
///
/// # Returns
///
/// * `Ok(())` - the engine is available
/// * `Err` - the engine is not installed, or did not answer in time
pub async fn check_engine_available(engine: ContainerEngine) -> Result<(), BuildError> {
    let program = engine.program();

    if let Err(e) = which::which(program) {
        return Err(BuildError::EngineUnavailable {
            engine: program.to_string(),
            reason: format!(
                "{program} command not found: {e}\n\
                 \n\
                 {program} is required to run Linux builds.\n\
                 Install from: https://docs.docker.com/get-docker/"
            ),
        });
    }

    let status_result = timeout(
        ENGINE_CHECK_TIMEOUT,
        Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status(),
    )
    .await;

    match status_result {
        Err(_) => Err(BuildError::EngineUnavailable {
            engine: program.to_string(),
            reason: format!(
                "`{program} --version` timed out after {} seconds.\n\
                 \n\
                 {ENGINE_START_HELP}",
                ENGINE_CHECK_TIMEOUT.as_secs()
            ),
        }),

        Ok(Ok(status)) if status.success() => Ok(()),

        Ok(Ok(status)) => Err(BuildError::EngineUnavailable {
            engine: program.to_string(),
            reason: format!(
                "`{program} --version` failed (exit code: {}).\n\
                 \n\
                 {ENGINE_START_HELP}",
                status.code().unwrap_or(-1)
            ),
        }),

        Ok(Err(e)) => Err(BuildError::EngineUnavailable {
            engine: program.to_string(),
            reason: format!("could not run {program}: {e}"),
        }),
    }
}

/// [`ContainerBackend`] backed by the docker or podman CLI
#[derive(Debug, Clone)]
pub struct EngineBackend {
    engine: ContainerEngine,
    output: OutputManager,
}

impl EngineBackend {
    /// Backend for `engine`
    pub fn new(engine: ContainerEngine) -> Self {
        Self {
            engine,
            output: OutputManager::new(false, false),
        }
    }

    /// Echo commands through `output`
    pub fn with_output(mut self, output: OutputManager) -> Self {
        self.output = output;
        self
    }

    /// The engine this backend drives
    pub fn engine(&self) -> ContainerEngine {
        self.engine
    }
}

impl ContainerBackend for EngineBackend {
    type Channel = RemoteShell;

    async fn check_available(&self) -> Result<(), BuildError> {
        check_engine_available(self.engine).await
    }

    async fn open(
        &self,
        image: &str,
        simulate_32_bit: bool,
        cwd: &ContainerPath,
    ) -> Result<RemoteShell, ChannelError> {
        RemoteShell::open(self.engine, image, simulate_32_bit, cwd, self.output.clone()).await
    }

    async fn run_oneshot(&self, image: &str, script: &str) -> Result<(), ChannelError> {
        let args = vec![
            self.engine.program().to_string(),
            "run".to_string(),
            "--rm".to_string(),
            "--volume=/:/host".to_string(),
            image.to_string(),
            "bash".to_string(),
            "-c".to_string(),
            script.to_string(),
        ];
        log::debug!("running one-shot container: {}", args.join(" "));

        let status = Command::new(&args[0]).args(&args[1..]).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(ChannelError::CommandFailed {
                returncode: status.code().unwrap_or(-1),
                args,
                output: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_parse() {
        assert_eq!("docker".parse::<ContainerEngine>().unwrap(), ContainerEngine::Docker);
        assert_eq!(" podman ".parse::<ContainerEngine>().unwrap(), ContainerEngine::Podman);
        assert!("lxc".parse::<ContainerEngine>().is_err());
    }

    #[test]
    fn test_engine_program() {
        assert_eq!(ContainerEngine::default().program(), "docker");
        assert_eq!(ContainerEngine::Podman.to_string(), "podman");
    }
}
