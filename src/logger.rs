//! Build progress logging.
//!
//! Wraps [`OutputManager`] with build/step timing, CI log folding and the
//! end-of-run wheel summary.

use crate::cli::OutputManager;
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};

/// CI service the build runs on, for log folding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiProvider {
    /// GitHub Actions
    GitHubActions,
    /// Azure Pipelines
    AzurePipelines,
    /// Travis CI
    TravisCi,
    /// Another CI service without folding support
    Other,
    /// Not running on CI
    None,
}

impl CiProvider {
    /// Detect from well-known environment variables
    pub fn detect() -> Self {
        Self::from_lookup(|key| std::env::var_os(key).is_some())
    }

    fn from_lookup(is_set: impl Fn(&str) -> bool) -> Self {
        if is_set("GITHUB_ACTIONS") {
            CiProvider::GitHubActions
        } else if is_set("AZURE_HTTP_USER_AGENT") {
            CiProvider::AzurePipelines
        } else if is_set("TRAVIS") {
            CiProvider::TravisCi
        } else if ["APPVEYOR", "CIRCLECI", "GITLAB_CI", "CIRRUS_CI", "CI"]
            .iter()
            .any(|key| is_set(key))
        {
            CiProvider::Other
        } else {
            CiProvider::None
        }
    }

    fn fold_start(&self, identifier: &str, name: &str) -> Option<String> {
        match self {
            CiProvider::GitHubActions => Some(format!("::group::{name}")),
            CiProvider::AzurePipelines => Some(format!("##[group]{name}")),
            CiProvider::TravisCi => Some(format!("travis_fold:start:{identifier}\n{name}")),
            CiProvider::Other | CiProvider::None => None,
        }
    }

    fn fold_end(&self, identifier: &str) -> Option<String> {
        match self {
            CiProvider::GitHubActions => Some("::endgroup::".to_string()),
            CiProvider::AzurePipelines => Some("##[endgroup]".to_string()),
            CiProvider::TravisCi => Some(format!("travis_fold:end:{identifier}")),
            CiProvider::Other | CiProvider::None => None,
        }
    }
}

/// One finished build, for the summary
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Build identifier
    pub identifier: String,
    /// File names of the wheels it produced
    pub wheels: Vec<String>,
    /// Wall time of the build
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct LoggerState {
    build: Option<(String, Instant)>,
    step: Option<Instant>,
    finished: Vec<BuildInfo>,
}

/// Progress logger for a build run
#[derive(Debug)]
pub struct BuildLogger {
    output: OutputManager,
    ci: CiProvider,
    state: RefCell<LoggerState>,
}

impl BuildLogger {
    /// Logger on `output`, folding for the detected CI service
    pub fn new(output: OutputManager) -> Self {
        Self::with_ci(output, CiProvider::detect())
    }

    /// Logger for an explicit CI service
    pub fn with_ci(output: OutputManager, ci: CiProvider) -> Self {
        Self {
            output,
            ci,
            state: RefCell::new(LoggerState::default()),
        }
    }

    /// Underlying output manager
    pub fn output(&self) -> &OutputManager {
        &self.output
    }

    /// Start the build of one identifier
    pub fn build_start(&self, identifier: &str) {
        self.step_end();
        let title = format!("Building {identifier} wheel");
        if let Some(fold) = self.ci.fold_start(identifier, &title) {
            let _ = self.output.println(&fold);
        }
        let _ = self.output.section(&title);
        let _ = self.output.println(&build_description(identifier));
        self.state.borrow_mut().build = Some((identifier.to_string(), Instant::now()));
    }

    /// Finish the current build, recording its wheels for the summary
    pub fn build_end(&self, wheels: &[String]) {
        self.step_end();
        let Some((identifier, started)) = self.state.borrow_mut().build.take() else {
            return;
        };
        let duration = started.elapsed();
        let _ = self
            .output
            .success(&format!("{identifier} finished in {:.2}s", duration.as_secs_f64()));
        if let Some(fold) = self.ci.fold_end(&identifier) {
            let _ = self.output.println(&fold);
        }
        self.state.borrow_mut().finished.push(BuildInfo {
            identifier,
            wheels: wheels.to_vec(),
            duration,
        });
    }

    /// Start a step, ending the previous one
    pub fn step(&self, description: &str) {
        self.step_end();
        let _ = self.output.progress(description);
        self.state.borrow_mut().step = Some(Instant::now());
    }

    /// End the current step successfully
    pub fn step_end(&self) {
        if let Some(started) = self.state.borrow_mut().step.take() {
            let _ = self
                .output
                .indent(&format!("✓ {:.2}s", started.elapsed().as_secs_f64()));
        }
    }

    /// End the current step with an error
    pub fn step_end_with_error(&self, message: &str) {
        let elapsed = self.state.borrow_mut().step.take().map(|s| s.elapsed());
        match elapsed {
            Some(elapsed) => self
                .output
                .error(&format!("{:.2}s {message}", elapsed.as_secs_f64())),
            None => self.output.error(message),
        }
    }

    /// Plain informational line
    pub fn notice(&self, message: &str) {
        let _ = self.output.info(message);
    }

    /// Warning line
    pub fn warning(&self, message: &str) {
        let _ = self.output.warn(message);
    }

    /// Builds finished so far
    pub fn finished_builds(&self) -> Vec<BuildInfo> {
        self.state.borrow().finished.clone()
    }

    /// Print every finished wheel with its size and SHA-256, reading from `output_dir`
    pub fn summary(&self, output_dir: &Path) {
        let finished = self.finished_builds();
        if finished.is_empty() {
            return;
        }

        let _ = self.output.section("Build summary");
        let mut count = 0;
        for build in &finished {
            for wheel in &build.wheels {
                count += 1;
                match wheel_digest(&output_dir.join(wheel)) {
                    Ok((size, digest)) => {
                        let _ = self.output.println(&format!(
                            "{wheel} ({} kB, sha256={digest})",
                            size.div_ceil(1024)
                        ));
                    }
                    Err(e) => {
                        log::debug!("could not hash {wheel}: {e}");
                        let _ = self.output.println(wheel);
                    }
                }
            }
            let _ = self.output.indent(&format!(
                "{} built in {:.2}s",
                build.identifier,
                build.duration.as_secs_f64()
            ));
        }
        let _ = self
            .output
            .success(&format!("{count} wheels produced in {}", output_dir.display()));
    }
}

/// Size and hex SHA-256 of a file
pub fn wheel_digest(path: &Path) -> std::io::Result<(u64, String)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher)?;
    Ok((size, hex::encode(hasher.finalize())))
}

/// Human-readable description of a build identifier, e.g. `CPython 3.8 manylinux aarch64`
pub fn build_description(identifier: &str) -> String {
    let Some((python, platform)) = identifier.split_once('-') else {
        return identifier.to_string();
    };

    let interpreter = match python.get(..2) {
        Some("cp") => "CPython",
        Some("pp") => "PyPy",
        _ => return identifier.to_string(),
    };
    let digits = &python[2..];
    let version = match digits.split_at_checked(1) {
        Some((major, minor)) if !minor.is_empty() => format!("{major}.{minor}"),
        _ => digits.to_string(),
    };

    format!("{interpreter} {version} {}", platform.replace('_', " "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_description() {
        assert_eq!(build_description("cp38-manylinux_aarch64"), "CPython 3.8 manylinux aarch64");
        assert_eq!(build_description("cp310-manylinux_aarch64"), "CPython 3.10 manylinux aarch64");
        assert_eq!(build_description("weird"), "weird");
    }

    #[test]
    fn test_ci_detection() {
        assert_eq!(
            CiProvider::from_lookup(|k| k == "GITHUB_ACTIONS" || k == "CI"),
            CiProvider::GitHubActions
        );
        assert_eq!(CiProvider::from_lookup(|k| k == "TRAVIS"), CiProvider::TravisCi);
        assert_eq!(CiProvider::from_lookup(|k| k == "CIRCLECI"), CiProvider::Other);
        assert_eq!(CiProvider::from_lookup(|_| false), CiProvider::None);
    }

    #[test]
    fn test_fold_markers() {
        assert_eq!(
            CiProvider::GitHubActions.fold_start("cp38", "Building").as_deref(),
            Some("::group::Building")
        );
        assert_eq!(CiProvider::AzurePipelines.fold_end("cp38").as_deref(), Some("##[endgroup]"));
        assert_eq!(
            CiProvider::TravisCi.fold_end("cp38").as_deref(),
            Some("travis_fold:end:cp38")
        );
        assert!(CiProvider::None.fold_start("cp38", "x").is_none());
    }

    #[test]
    fn test_wheel_digest() {
        let temp_dir = TempDir::new().unwrap();
        let wheel = temp_dir.path().join("a.whl");
        std::fs::write(&wheel, b"abc").unwrap();
        let (size, digest) = wheel_digest(&wheel).unwrap();
        assert_eq!(size, 3);
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_build_bookkeeping() {
        let logger = BuildLogger::with_ci(OutputManager::new(false, true), CiProvider::None);
        logger.build_start("cp38-manylinux_aarch64");
        logger.step("Building wheel...");
        logger.build_end(&["spam-0.1-cp38-cp38-manylinux2014_aarch64.whl".to_string()]);

        let finished = logger.finished_builds();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].identifier, "cp38-manylinux_aarch64");
        assert_eq!(finished[0].wheels.len(), 1);
    }
}
