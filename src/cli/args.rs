//! Command line argument parsing and validation.
//!
//! Every option can also come from a `CIBW_*` environment variable, so CI
//! configuration can live in the job environment.

use crate::architecture::{Host, PlatformName, allowed_architectures_check, parse_config};
use crate::container::ContainerEngine;
use crate::error::{ConfigurationError, Result};
use crate::pipeline::{
    BuildOptions, BuildSelector, DependencyConstraints, ParsedEnvironment, TestSelector,
    format_test_extras,
};
use clap::Parser;
use std::path::PathBuf;

/// Build Linux wheels for other architectures by cross compiling in containers
#[derive(Parser, Debug, Clone)]
#[command(
    name = "cibuildwheel",
    version,
    about = "Build Python wheels for aarch64 Linux on any Linux host",
    long_about = "Cross compile Python wheels in a manylinux cross-build container, then repair and
test each wheel in a container of the target architecture.

Usage:
  cibuildwheel --archs aarch64
  cibuildwheel path/to/package --output-dir dist
  cibuildwheel --print-build-identifiers"
)]
pub struct Args {
    /// Directory containing setup.py, inside the current directory
    #[arg(index = 1, value_name = "PACKAGE_DIR", default_value = ".")]
    pub package_dir: PathBuf,

    /// Destination for the finished wheels
    #[arg(long, env = "CIBW_OUTPUT_DIR", default_value = "wheelhouse")]
    pub output_dir: PathBuf,

    /// Architectures to build, e.g. "aarch64" or "auto"
    #[arg(long, env = "CIBW_ARCHS_LINUX")]
    pub archs: Option<String>,

    /// Identifiers to build (space separated globs)
    #[arg(long, env = "CIBW_BUILD", default_value = "*")]
    pub build: String,

    /// Identifiers to skip (space separated globs)
    #[arg(long, env = "CIBW_SKIP", default_value = "")]
    pub skip: String,

    /// Identifiers whose tests are skipped
    #[arg(long, env = "CIBW_TEST_SKIP", default_value = "")]
    pub test_skip: String,

    /// Run once per platform before any build
    #[arg(long, env = "CIBW_BEFORE_ALL")]
    pub before_all: Option<String>,

    /// Run before each wheel build
    #[arg(long, env = "CIBW_BEFORE_BUILD")]
    pub before_build: Option<String>,

    /// Run in the test virtualenv before the wheel is installed
    #[arg(long, env = "CIBW_BEFORE_TEST")]
    pub before_test: Option<String>,

    /// Repair command; empty to skip repair
    #[arg(
        long,
        env = "CIBW_REPAIR_WHEEL_COMMAND",
        default_value = "auditwheel repair -w {dest_dir} {wheel}"
    )]
    pub repair_wheel_command: String,

    /// Test command; tests are skipped when unset
    #[arg(long, env = "CIBW_TEST_COMMAND")]
    pub test_command: Option<String>,

    /// Requirements installed before testing (space separated)
    #[arg(long, env = "CIBW_TEST_REQUIRES", default_value = "")]
    pub test_requires: String,

    /// Extras installed with the wheel for testing, e.g. "test,docs"
    #[arg(long, env = "CIBW_TEST_EXTRAS", default_value = "")]
    pub test_extras: String,

    /// Environment assignments, e.g. 'CFLAGS="-O3" PATH=$PATH:/extra'
    #[arg(long, env = "CIBW_ENVIRONMENT", default_value = "")]
    pub environment: String,

    /// "pinned", "latest", or a constraints file
    #[arg(long, env = "CIBW_DEPENDENCY_VERSIONS", default_value = "pinned")]
    pub dependency_versions: String,

    /// pip verbosity for the build, -3 to 3
    #[arg(
        long,
        env = "CIBW_BUILD_VERBOSITY",
        default_value_t = 0,
        allow_negative_numbers = true
    )]
    pub build_verbosity: i8,

    /// Native aarch64 image used for repair and test
    #[arg(long, env = "CIBW_MANYLINUX_AARCH64_IMAGE")]
    pub manylinux_aarch64_image: Option<String>,

    /// Cross-build image for aarch64
    #[arg(long, env = "CIBW_MANYLINUX_CROSS_AARCH64_IMAGE")]
    pub manylinux_cross_aarch64_image: Option<String>,

    /// Container engine: docker or podman
    #[arg(long, env = "CIBW_CONTAINER_ENGINE", default_value = "docker")]
    pub container_engine: String,

    /// Print the identifiers that would be built and exit
    #[arg(long)]
    pub print_build_identifiers: bool,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.output_dir.as_os_str().is_empty() {
            return Err("Output directory must not be empty".to_string());
        }
        if self.container_engine.parse::<ContainerEngine>().is_err() {
            return Err(format!(
                "Unsupported container engine '{}', expected docker or podman",
                self.container_engine
            ));
        }
        Ok(())
    }

    /// Architecture selection: `--archs`, then `CIBW_ARCHS`, then `auto`
    pub fn archs_config(&self) -> String {
        self.archs
            .clone()
            .or_else(|| std::env::var("CIBW_ARCHS").ok())
            .unwrap_or_else(|| "auto".to_string())
    }

    /// Selected container engine
    pub fn engine(&self) -> Result<ContainerEngine> {
        Ok(self.container_engine.parse()?)
    }

    /// Resolve into run-wide build options for a build started in `project_dir`
    pub fn build_options(&self, project_dir: PathBuf, host: &Host) -> Result<BuildOptions> {
        let architectures = parse_config(&self.archs_config(), PlatformName::Linux, host)?;
        allowed_architectures_check(PlatformName::Linux, &architectures)?;

        let package_dir = project_dir.join(&self.package_dir);
        let output_dir = project_dir.join(&self.output_dir);
        let mut options = BuildOptions::new(project_dir, package_dir, output_dir)?;

        options.architectures = architectures;
        options.build_selector = BuildSelector::new(&self.build, &self.skip)?;
        options.test_selector = TestSelector::new(&self.test_skip)?;
        options.before_all = non_empty(&self.before_all);
        options.before_build = non_empty(&self.before_build);
        options.before_test = non_empty(&self.before_test);
        options.repair_command = Some(self.repair_wheel_command.trim())
            .filter(|command| !command.is_empty())
            .map(String::from);
        options.test_command = non_empty(&self.test_command);
        options.test_requires = self.test_requires.split_whitespace().map(String::from).collect();
        options.test_extras = format_test_extras(&self.test_extras);
        options.environment = ParsedEnvironment::parse(&self.environment)?;
        options.dependency_constraints =
            DependencyConstraints::from_option(&self.dependency_versions)?;
        options.build_verbosity = self.build_verbosity.clamp(-3, 3);

        for (key, image) in [
            ("aarch64", &self.manylinux_aarch64_image),
            ("cross_aarch64", &self.manylinux_cross_aarch64_image),
        ] {
            if let Some(image) = non_empty(image) {
                if image.contains(char::is_whitespace) {
                    return Err(ConfigurationError::InvalidOption {
                        option: format!("manylinux-{}-image", key.replace('_', "-")),
                        reason: format!("'{image}' is not an image reference"),
                    }
                    .into());
                }
                options.images.insert(key.to_string(), image);
            }
        }

        Ok(options)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Output manager for colored terminal output
    output: super::OutputManager,
}

impl RuntimeConfig {
    /// Create runtime configuration
    pub fn new() -> Self {
        Self::with_output(super::OutputManager::new(false, false))
    }

    /// Runtime configuration printing through `output`
    pub fn with_output(output: super::OutputManager) -> Self {
        Self { output }
    }

    /// Get a reference to the output manager
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }

    /// Print message
    pub fn println(&self, message: &str) {
        let _ = self.output.println(message);
    }

    /// Print error message (always shown)
    pub fn error_println(&self, message: &str) {
        self.output.error(message);
    }

    /// Print message only when verbose
    pub fn verbose_println(&self, message: &str) {
        let _ = self.output.verbose(message);
    }

    /// Print warning message
    pub fn warning_println(&self, message: &str) {
        let _ = self.output.warn(message);
    }

    /// Print indented text
    pub fn indent(&self, message: &str) {
        let _ = self.output.indent(message);
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Positive build verbosity also makes cibuildwheel verbose; the quietest
/// level silences everything but errors
impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        let verbose = args.build_verbosity > 0;
        let quiet = args.build_verbosity <= -3;
        Self::with_output(super::OutputManager::new(verbose, quiet))
    }
}
