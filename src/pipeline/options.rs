//! Run-wide build options.

use super::environment::ParsedEnvironment;
use super::selector::{BuildSelector, TestSelector};
use crate::architecture::Architecture;
use crate::error::{ConfigurationError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PINNED_CONSTRAINTS: &str = include_str!("../../resources/constraints.txt");

/// Default image for each image key
pub const DEFAULT_IMAGES: [(&str, &str); 2] = [
    ("aarch64", "quay.io/pypa/manylinux2014_aarch64:latest"),
    ("cross_aarch64", "quay.io/pypa/manylinux2014_cross_aarch64:latest"),
];

/// Everything a build run needs, fixed for the whole run
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Architectures to build
    pub architectures: BTreeSet<Architecture>,
    /// Which identifiers to build
    pub build_selector: BuildSelector,
    /// Which identifiers to test
    pub test_selector: TestSelector,
    /// Project root; copied into every container
    pub project_dir: PathBuf,
    /// Directory holding setup.py, inside `project_dir`
    pub package_dir: PathBuf,
    /// Where finished wheels land on the host
    pub output_dir: PathBuf,
    /// Runs once per platform in the cross-build container
    pub before_all: Option<String>,
    /// Runs before each wheel build
    pub before_build: Option<String>,
    /// Repairs a built wheel in the native container
    pub repair_command: Option<String>,
    /// Runs in the test virtualenv before installing the wheel
    pub before_test: Option<String>,
    /// Test command; no tests run when unset
    pub test_command: Option<String>,
    /// Extra requirements for the test virtualenv
    pub test_requires: Vec<String>,
    /// Extras suffix appended to the wheel when installing it, e.g. `[test]`
    pub test_extras: String,
    /// User environment assignments
    pub environment: ParsedEnvironment,
    /// pip constraints for the test virtualenv
    pub dependency_constraints: Option<DependencyConstraints>,
    /// -3 (quietest) to 3 (most verbose)
    pub build_verbosity: i8,
    /// Image per key: target arch for native images, `cross_<arch>` for cross images
    pub images: BTreeMap<String, String>,
}

impl BuildOptions {
    /// Options with defaults for everything but the directories
    pub fn new(
        project_dir: impl Into<PathBuf>,
        package_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        Ok(Self {
            architectures: [Architecture::Aarch64].into_iter().collect(),
            build_selector: BuildSelector::new("*", "")?,
            test_selector: TestSelector::new("")?,
            project_dir: project_dir.into(),
            package_dir: package_dir.into(),
            output_dir: output_dir.into(),
            before_all: None,
            before_build: None,
            repair_command: Some("auditwheel repair -w {dest_dir} {wheel}".to_string()),
            before_test: None,
            test_command: None,
            test_requires: Vec::new(),
            test_extras: String::new(),
            environment: ParsedEnvironment::default(),
            dependency_constraints: None,
            build_verbosity: 0,
            images: DEFAULT_IMAGES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }

    /// Image configured for `key`
    pub fn image(&self, key: &str) -> Result<&str> {
        self.images.get(key).map(String::as_str).ok_or_else(|| {
            ConfigurationError::InvalidOption {
                option: "images".to_string(),
                reason: format!("no image configured for '{key}'"),
            }
            .into()
        })
    }
}

/// Turn a comma/space separated extras list into a `[a,b]` suffix
pub fn format_test_extras(extras: &str) -> String {
    let names: Vec<&str> = extras
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();
    if names.is_empty() {
        String::new()
    } else {
        format!("[{}]", names.join(","))
    }
}

/// `-v`/`-q` flags for a build verbosity level
pub fn build_verbosity_flags(level: i8) -> Vec<String> {
    let level = level.clamp(-3, 3);
    match level {
        0 => Vec::new(),
        l if l > 0 => vec![format!("-{}", "v".repeat(l as usize))],
        l => vec![format!("-{}", "q".repeat(l.unsigned_abs() as usize))],
    }
}

/// A pip constraints file, with per-Python-version variants
#[derive(Debug, Clone)]
pub struct DependencyConstraints {
    base_file_path: PathBuf,
    // keeps the unpacked pinned constraints alive
    _pinned_dir: Option<Arc<tempfile::TempDir>>,
}

impl DependencyConstraints {
    /// Constraints from a user-supplied file
    pub fn new(base_file_path: impl Into<PathBuf>) -> Self {
        Self {
            base_file_path: base_file_path.into(),
            _pinned_dir: None,
        }
    }

    /// The constraints bundled with this tool
    pub fn with_defaults() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("cibw-constraints-").tempdir()?;
        let path = dir.path().join("constraints.txt");
        std::fs::write(&path, PINNED_CONSTRAINTS)?;
        Ok(Self {
            base_file_path: path,
            _pinned_dir: Some(Arc::new(dir)),
        })
    }

    /// Interpret `--dependency-versions`: `pinned`, `latest`, or a file path
    pub fn from_option(value: &str) -> Result<Option<Self>> {
        match value.trim() {
            "pinned" => Ok(Some(Self::with_defaults()?)),
            "latest" => Ok(None),
            path => {
                let path = Path::new(path);
                if !path.is_file() {
                    return Err(ConfigurationError::InvalidOption {
                        option: "dependency-versions".to_string(),
                        reason: format!("constraints file {} does not exist", path.display()),
                    }
                    .into());
                }
                Ok(Some(Self::new(path)))
            }
        }
    }

    /// `<stem>-python<XY><ext>` next to the base file if present, else the base file
    pub fn get_for_python_version(&self, version: &str) -> PathBuf {
        let version_parts: Vec<&str> = version.split('.').collect();
        let (Some(major), Some(minor)) = (version_parts.first(), version_parts.get(1)) else {
            return self.base_file_path.clone();
        };

        let stem = self
            .base_file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut specific_name = format!("{stem}-python{major}{minor}");
        if let Some(ext) = self.base_file_path.extension() {
            specific_name.push('.');
            specific_name.push_str(&ext.to_string_lossy());
        }

        let specific = self.base_file_path.with_file_name(specific_name);
        if specific.exists() {
            specific
        } else {
            self.base_file_path.clone()
        }
    }
}
