//! Error types for wheel build operations.
//!
//! This module defines all error types with actionable error messages and recovery suggestions.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for build operations
pub type Result<T> = std::result::Result<T, BuildError>;

/// Main error type for all build operations
#[derive(Error, Debug)]
pub enum BuildError {
    /// Container channel errors
    #[error("{0}")]
    Channel(#[from] ChannelError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),

    /// The container engine is not installed or not responding
    #[error("{engine} is not available: {reason}")]
    EngineUnavailable {
        /// Engine executable name
        engine: String,
        /// Multi-line explanation
        reason: String,
    },

    /// PATH inside the build container resolves a tool to the wrong interpreter
    #[error(
        "{tool} available on PATH doesn't match our installed instance (expected {expected}, found {found}). \
         If you have modified PATH, ensure that you don't overwrite cibuildwheel's entry or insert {tool} above it."
    )]
    PathIntegrity {
        /// Tool name (python or pip)
        tool: String,
        /// Path the tool should resolve to
        expected: String,
        /// Path the tool actually resolved to
        found: String,
    },

    /// A before-all/before-build step used a command outside the allowed set
    #[error(
        "Command '{command}' is not allowed. During cross compilation, in wheel build phase, \
         only pip/python/yum related commands are allowed"
    )]
    RestrictedCommand {
        /// The rejected command
        command: String,
    },

    /// The build produced a pure Python wheel
    #[error(
        "Build failed because a pure Python wheel was generated ({wheel}). \
         If you intend to build a pure-Python wheel, you don't need cibuildwheel - use `pip wheel -w DEST_DIR .` instead."
    )]
    NonPlatformWheel {
        /// File name of the offending wheel
        wheel: String,
    },

    /// A build or repair step finished without leaving a wheel behind
    #[error("No wheel found in {dir}")]
    NoWheelProduced {
        /// Container directory that was searched
        dir: String,
    },

    /// The package directory is not inside the project directory
    #[error("package_dir must be inside the working directory ({package_dir} is not under {project_dir})")]
    PathLayout {
        /// Requested package directory
        package_dir: PathBuf,
        /// Project (working) directory
        project_dir: PathBuf,
    },

    /// `CROSS_ROOT` missing from the build container environment
    #[error("CROSS_ROOT is not set in the cross-build container environment")]
    CrossRootUnset,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors raised by a container shell channel
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The container could not be created or attached
    #[error("Failed to start container from image '{image}': {reason}")]
    Spawn {
        /// Image reference
        image: String,
        /// Reason for the error
        reason: String,
    },

    /// A command inside the container exited non-zero
    #[error("Command {} failed with code {returncode}. {output}", args.join(" "))]
    CommandFailed {
        /// Exit status reported by the container shell
        returncode: i32,
        /// Argument vector of the failed command
        args: Vec<String>,
        /// Captured output, empty when output was streamed
        output: String,
    },

    /// The shell process behind the channel is gone
    #[error("Shell in container '{name}' exited unexpectedly")]
    ProcessDied {
        /// Container name
        name: String,
    },

    /// The channel was used after close
    #[error("Container '{name}' has already been closed")]
    Closed {
        /// Container name
        name: String,
    },

    /// The shell replied with something the framing cannot parse
    #[error("Malformed reply from container '{name}': {reason}")]
    Protocol {
        /// Container name
        name: String,
        /// Reason for the error
        reason: String,
    },

    /// IO errors on the engine process pipes
    #[error("IO error talking to container: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in user-supplied configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Architecture token that names no known architecture
    #[error("Unknown architecture '{token}'")]
    UnknownArchitecture {
        /// The token as given
        token: String,
    },

    /// Architecture set is empty or contains architectures the platform can't build
    #[error("{message}")]
    DisallowedArchitectures {
        /// Full explanation including the allowed set
        message: String,
    },

    /// Malformed environment assignment
    #[error("Malformed environment option '{assignment}'")]
    InvalidEnvironment {
        /// The offending assignment
        assignment: String,
    },

    /// Any other invalid option value
    #[error("Invalid value for {option}: {reason}")]
    InvalidOption {
        /// Option name
        option: String,
        /// Reason for the error
        reason: String,
    },
}

impl BuildError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::Config(_) | BuildError::EngineUnavailable { .. } => 2,
            _ => 1,
        }
    }

    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            BuildError::EngineUnavailable { engine, .. } => vec![
                format!("Install {engine} and make sure it is on PATH"),
                "If you're building on Travis CI, add `services: [docker]` to your .travis.yml".to_string(),
                "If you're building on Circle CI in Linux, add a `setup_remote_docker` step to your .circleci/config.yml"
                    .to_string(),
            ],
            BuildError::Config(ConfigurationError::DisallowedArchitectures { .. })
            | BuildError::Config(ConfigurationError::UnknownArchitecture { .. }) => vec![
                "Use one of auto, native, all, auto64, auto32 or a literal architecture name".to_string(),
                "Cross builds currently target aarch64 only: --archs aarch64".to_string(),
            ],
            BuildError::PathIntegrity { .. } => vec![
                "Append to PATH in --environment instead of replacing it: PATH=$PATH:/extra".to_string(),
            ],
            BuildError::RestrictedCommand { .. } => vec![
                "Split the step so every part after '&&' starts with yum, pip, python or python3".to_string(),
                "Move other setup into the cross-build image itself".to_string(),
            ],
            BuildError::NonPlatformWheel { .. } => vec![
                "Check that setup.py declares ext_modules for the compiled parts".to_string(),
                "Build pure-Python wheels with: pip wheel -w DEST_DIR .".to_string(),
            ],
            BuildError::PathLayout { .. } => vec![
                "Run cibuildwheel from the project root and pass a subdirectory as the package dir".to_string(),
            ],
            BuildError::Channel(ChannelError::ProcessDied { .. }) => vec![
                "Check that the container engine daemon is still running".to_string(),
                "Re-run with RUST_LOG=debug to see the container lifecycle".to_string(),
            ],
            _ => vec!["Check the error message above for specific details".to_string()],
        }
    }

    /// Arguments of the failed container command, if that is what failed
    pub fn failed_command(&self) -> Option<&[String]> {
        match self {
            BuildError::Channel(ChannelError::CommandFailed { args, .. }) => Some(args.as_slice()),
            _ => None,
        }
    }
}
