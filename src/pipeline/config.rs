//! Runtime configurations available in the cross-build images.

use super::selector::BuildSelector;
use crate::architecture::Architecture;
use crate::container::ContainerPath;
use crate::error::{BuildError, ConfigurationError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

const BUILD_PLATFORMS: &str = include_str!("../../resources/build-platforms.toml");

/// Suffix distinguishing a cross environment root from the native interpreter
pub const CROSS_ENV_SUFFIX: &str = "-xc";

/// One buildable interpreter
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PythonConfiguration {
    /// Python version, e.g. `3.8`
    pub version: String,
    /// Build identifier, e.g. `cp38-manylinux_aarch64`
    pub identifier: String,
    /// Cross environment root inside the cross-build image
    pub path: String,
}

impl PythonConfiguration {
    /// Cross environment root
    pub fn path(&self) -> ContainerPath {
        ContainerPath::new(self.path.as_str())
    }

    /// `bin` of the cross environment; `python` and `pip` must resolve here
    pub fn bin_dir(&self) -> ContainerPath {
        self.path().join("bin")
    }

    /// `bin` of the build interpreter that owns the cross environment
    pub fn build_bin_dir(&self) -> ContainerPath {
        self.build_root().join("bin")
    }

    /// `bin` of the same interpreter in the architecture-native image
    pub fn native_bin_dir(&self) -> ContainerPath {
        let root = self.build_root();
        let native = root.as_str().strip_suffix(CROSS_ENV_SUFFIX).unwrap_or(root.as_str());
        ContainerPath::new(native).join("bin")
    }

    fn build_root(&self) -> ContainerPath {
        self.path().parent().unwrap_or_else(|| self.path())
    }
}

#[derive(Debug, Deserialize)]
struct PlatformSection {
    python_configurations: Vec<PythonConfiguration>,
}

/// Load the configuration table for one build mode
pub fn read_python_configs(section: &str) -> Result<Vec<PythonConfiguration>> {
    let mut table: BTreeMap<String, PlatformSection> = toml::from_str(BUILD_PLATFORMS)?;
    let platform = table.remove(section).ok_or_else(|| {
        BuildError::Config(ConfigurationError::InvalidOption {
            option: "platform".to_string(),
            reason: format!("no python configurations for '{section}'"),
        })
    })?;
    Ok(platform.python_configurations)
}

/// Configurations whose architecture was requested and whose identifier passes the selector
pub fn select_configurations(
    selector: &BuildSelector,
    architectures: &BTreeSet<Architecture>,
) -> Result<Vec<PythonConfiguration>> {
    Ok(read_python_configs("crosslinux")?
        .into_iter()
        .filter(|config| {
            architectures
                .iter()
                .any(|arch| config.identifier.ends_with(arch.value()))
        })
        .filter(|config| selector.matches(&config.identifier))
        .collect())
}
