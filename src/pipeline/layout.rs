//! Fixed paths shared by the cross-build container, the native container and the host.
//!
//! Both containers mount the host root at `/host`, so a file the cross-build
//! container writes under `/host/tmp` is visible to the native container at
//! the same path and to the host under its own `/tmp`.

use crate::container::{ContainerPath, Environment};
use crate::error::{BuildError, Result};
use std::path::{Path, PathBuf};

/// Where the project is copied in every container
pub const PROJECT_DIR: &str = "/project";
/// Collected wheels in the cross-build container
pub const OUTPUT_DIR: &str = "/output";
/// Scratch area for build and repair output
pub const TEMP_DIR: &str = "/tmp/cibuildwheel";
/// Constraints file location inside containers
pub const CONSTRAINTS_FILE: &str = "/constraints.txt";
/// Bin dir of the utility interpreter used for before-all
pub const UTILITY_PYTHON_BIN: &str = "/opt/python/cp38-cp38/bin";

/// Mount point of the host root inside containers
pub const HOST_MOUNT: &str = "/host";

const CONTAINER_TMP: &str = "/tmp";
const DEPS_DIR: &str = "/install_deps";
const INSTALL_DEPS_SCRIPT: &str = "install_deps.sh";
const REPAIR_SCRIPT: &str = "repair_wheel.sh";

/// Toolchain sub-directory of `$CROSS_ROOT` for each target architecture
const TOOLCHAINS: [(&str, &str); 1] = [("aarch64", "/aarch64-unknown-linux-gnueabi/")];

/// Paths used to move files between the two containers through the host
#[derive(Debug, Clone)]
pub struct CrossLayout {
    host_tmp: PathBuf,
}

impl Default for CrossLayout {
    fn default() -> Self {
        Self::new("/tmp")
    }
}

impl CrossLayout {
    /// Layout whose host side of `/host/tmp` is `host_tmp`
    pub fn new(host_tmp: impl Into<PathBuf>) -> Self {
        Self {
            host_tmp: host_tmp.into(),
        }
    }

    /// Built wheels before repair
    pub fn built_wheel_dir(&self) -> ContainerPath {
        ContainerPath::new(TEMP_DIR).join("built_wheel")
    }

    /// Repaired wheels, as seen through the host mount
    pub fn repaired_wheel_dir(&self) -> ContainerPath {
        ContainerPath::new(TEMP_DIR).join("repaired_wheel").rebased(HOST_MOUNT)
    }

    /// `/tmp/cibuildwheel` in the cross-build container
    pub fn temp_dir(&self) -> ContainerPath {
        ContainerPath::new(TEMP_DIR)
    }

    /// Host `/tmp` as seen from inside a container
    pub fn host_tmp_in_container(&self) -> ContainerPath {
        ContainerPath::new(CONTAINER_TMP).rebased(HOST_MOUNT)
    }

    /// Dependency install root on the host, as seen from inside a container
    pub fn host_deps_in_container(&self) -> ContainerPath {
        self.host_tmp_in_container().join(DEPS_DIR)
    }

    /// `usr` of the dependency install root, as seen from inside a container
    pub fn host_deps_usr_in_container(&self) -> ContainerPath {
        self.host_deps_in_container().join("usr")
    }

    /// `usr` of the dependency install root on the host filesystem
    pub fn host_deps_usr(&self) -> PathBuf {
        self.host_tmp.join("install_deps").join("usr")
    }

    /// Install helper shipped in the cross-build image
    pub fn install_deps_script(&self) -> ContainerPath {
        ContainerPath::new(CONTAINER_TMP).join(INSTALL_DEPS_SCRIPT)
    }

    /// Install helper once copied to the host
    pub fn host_install_deps_script(&self) -> PathBuf {
        self.host_tmp.join(INSTALL_DEPS_SCRIPT)
    }

    /// Install helper on the host, as seen from inside a container
    pub fn install_deps_script_in_container(&self) -> ContainerPath {
        self.host_tmp_in_container().join(INSTALL_DEPS_SCRIPT)
    }

    /// Repair helper shipped in the cross-build image
    pub fn repair_script(&self) -> ContainerPath {
        ContainerPath::new(CONTAINER_TMP).join(REPAIR_SCRIPT)
    }

    /// Repair helper once copied to the host, as seen from inside a container
    pub fn repair_script_in_container(&self) -> ContainerPath {
        self.host_tmp_in_container().join(REPAIR_SCRIPT)
    }

    /// Host side of `/host/tmp`
    pub fn host_tmp(&self) -> &Path {
        &self.host_tmp
    }

    /// Toolchain directory that receives installed dependencies
    pub fn toolchain_deps(&self, env: &Environment, target_arch: &str) -> Result<String> {
        let cross_root = env.get_lossy("CROSS_ROOT").ok_or(BuildError::CrossRootUnset)?;
        let toolchain = TOOLCHAINS
            .iter()
            .find(|(arch, _)| *arch == target_arch)
            .map(|(_, dir)| *dir)
            .ok_or_else(|| {
                BuildError::Config(crate::error::ConfigurationError::InvalidOption {
                    option: "archs".to_string(),
                    reason: format!("no cross toolchain for {target_arch}"),
                })
            })?;
        Ok(format!("{cross_root}{toolchain}"))
    }
}

/// Target architecture of a platform tag, e.g. `manylinux_aarch64` to `aarch64`
pub fn platform_tag_to_arch(platform_tag: &str) -> &str {
    platform_tag.strip_prefix("manylinux_").unwrap_or(platform_tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = CrossLayout::default();
        assert_eq!(layout.built_wheel_dir().as_str(), "/tmp/cibuildwheel/built_wheel");
        assert_eq!(
            layout.repaired_wheel_dir().as_str(),
            "/host/tmp/cibuildwheel/repaired_wheel"
        );
        assert_eq!(layout.host_deps_in_container().as_str(), "/host/tmp/install_deps");
        assert_eq!(layout.host_deps_usr_in_container().as_str(), "/host/tmp/install_deps/usr");
        assert_eq!(layout.host_deps_usr(), PathBuf::from("/tmp/install_deps/usr"));
        assert_eq!(
            layout.install_deps_script_in_container().as_str(),
            "/host/tmp/install_deps.sh"
        );
        assert_eq!(layout.repair_script_in_container().as_str(), "/host/tmp/repair_wheel.sh");
    }

    #[test]
    fn test_toolchain_deps() {
        let layout = CrossLayout::default();
        let env: Environment = [("CROSS_ROOT", "/opt/cross")].into_iter().collect();
        assert_eq!(
            layout.toolchain_deps(&env, "aarch64").unwrap(),
            "/opt/cross/aarch64-unknown-linux-gnueabi/"
        );
        assert!(layout.toolchain_deps(&env, "s390x").is_err());
        assert!(matches!(
            layout.toolchain_deps(&Environment::new(), "aarch64"),
            Err(BuildError::CrossRootUnset)
        ));
    }

    #[test]
    fn test_platform_tag_to_arch() {
        assert_eq!(platform_tag_to_arch("manylinux_aarch64"), "aarch64");
    }
}
