//! Hints printed after a failed wheel build.

use crate::cli::OutputManager;
use crate::error::BuildError;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const WHEEL_BUILD_COMMANDS: [&[&str]; 3] = [
    &["python", "-m", "pip", "wheel"],
    &["python", "-m", "build"],
    &["python", "setup.py", "bdist_wheel"],
];

/// Whether `args` is one of the wheel build invocations
pub fn is_wheel_build_command(args: &[String]) -> bool {
    WHEEL_BUILD_COMMANDS.iter().any(|prefix| {
        args.len() >= prefix.len() && args.iter().zip(prefix.iter()).all(|(a, p)| a == p)
    })
}

/// Shared objects under `package_dir`, sorted
pub fn find_shared_objects(package_dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(package_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "so"))
        .map(|entry| entry.into_path())
        .collect();
    found.sort();
    found
}

/// Print likely causes when a wheel build command failed.
///
/// Only looks at the host checkout; never changes the outcome of the run.
pub fn troubleshoot(
    package_dir: &Path,
    error: &BuildError,
    output: &OutputManager,
) -> Vec<PathBuf> {
    let Some(args) = error.failed_command() else {
        return Vec::new();
    };
    if !is_wheel_build_command(args) {
        return Vec::new();
    }

    let _ = output.println("Checking for common errors...");
    let so_files = find_shared_objects(package_dir);
    if so_files.is_empty() {
        return so_files;
    }

    output.error(
        "NOTE: Shared object (.so) files found in this project.\n\n\
         These files might be built against the wrong OS, causing problems with auditwheel.\n\n\
         If you're using Cython and have previously done an in-place build,\n\
         remove those build files (*.so and *.c) before starting cibuildwheel.",
    );
    let _ = output.println("  Files detected:");
    for file in &so_files {
        let _ = output.indent(&file.display().to_string());
    }
    so_files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_wheel_build_command() {
        assert!(is_wheel_build_command(&args(&["python", "-m", "pip", "wheel", "."])));
        assert!(is_wheel_build_command(&args(&["python", "-m", "build"])));
        assert!(is_wheel_build_command(&args(&[
            "python",
            "setup.py",
            "bdist_wheel",
            "--dist-dir=/tmp/x"
        ])));
        assert!(!is_wheel_build_command(&args(&["python", "-m"])));
        assert!(!is_wheel_build_command(&args(&["pip", "install", "x"])));
    }

    #[test]
    fn test_troubleshoot_finds_shared_objects() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("pkg/sub")).unwrap();
        std::fs::write(temp_dir.path().join("pkg/sub/_ext.so"), b"").unwrap();
        std::fs::write(temp_dir.path().join("pkg/mod.py"), b"").unwrap();

        let error = BuildError::from(ChannelError::CommandFailed {
            returncode: 1,
            args: args(&["python", "setup.py", "bdist_wheel"]),
            output: String::new(),
        });
        let output = OutputManager::new(false, true);
        let found = troubleshoot(temp_dir.path(), &error, &output);
        assert_eq!(found, vec![temp_dir.path().join("pkg/sub/_ext.so")]);
    }

    #[test]
    fn test_troubleshoot_ignores_other_failures() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("_ext.so"), b"").unwrap();

        let error = BuildError::from(ChannelError::CommandFailed {
            returncode: 1,
            args: args(&["pip", "install", "x"]),
            output: String::new(),
        });
        let output = OutputManager::new(false, true);
        assert!(troubleshoot(temp_dir.path(), &error, &output).is_empty());
        assert!(troubleshoot(temp_dir.path(), &BuildError::CrossRootUnset, &output).is_empty());
    }
}
