//! RAII guard for container cleanup.
//!
//! Removes the container if its channel is dropped without being closed.

use super::ContainerEngine;
use std::time::Duration;
use wait_timeout::ChildExt;

/// How long the engine gets to remove a container from `Drop`
const REMOVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Force-removes a container on drop unless disarmed.
///
/// Uses a bounded wait so an unresponsive daemon cannot hang the process.
pub(super) struct ContainerGuard {
    pub(super) engine: ContainerEngine,
    pub(super) name: String,
    armed: bool,
}

impl ContainerGuard {
    pub(super) fn new(engine: ContainerEngine, name: impl Into<String>) -> Self {
        Self {
            engine,
            name: name.into(),
            armed: true,
        }
    }

    /// The container was removed through the normal path
    pub(super) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        // spawn() + wait_timeout() rather than output(), which can block forever
        let mut child = match std::process::Command::new(self.engine.program())
            .args(["rm", "--force", "-v", &self.name])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(_) => return,
        };

        match child.wait_timeout(REMOVE_TIMEOUT) {
            Ok(Some(status)) => {
                if !status.success() {
                    eprintln!(
                        "Warning: Failed to cleanup container '{}' (exit code: {})",
                        self.name,
                        status.code().unwrap_or(-1)
                    );
                }
            }
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();

                eprintln!(
                    "Warning: Timed out cleaning up container '{}' after {} seconds. \
                     {} daemon may be down.",
                    self.name,
                    REMOVE_TIMEOUT.as_secs(),
                    self.engine
                );
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}
