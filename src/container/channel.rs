//! Persistent interactive shell inside one container.
//!
//! The container is created with `--interactive` and started attached, so its
//! bash reads scripts from our pipe. Commands are framed by
//! [`protocol::build_script`] and answered by a marker footer.

use super::guard::ContainerGuard;
use super::protocol::{self, shell_quote};
use super::{
    CommandInvocation, CommandOutput, ContainerEngine, ContainerPath, Environment, ShellChannel,
};
use crate::cli::OutputManager;
use crate::error::ChannelError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use uuid::Uuid;

/// Interpreter present in every manylinux image, used for helper one-liners
pub const UTILITY_PYTHON: &str = "/opt/python/cp38-cp38/bin/python";

/// How long the shell gets to exit after `exit 0`
const EXIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Ready,
    Dead,
    Closed,
}

/// A [`ShellChannel`] over `docker start --attach --interactive`
pub struct RemoteShell {
    engine: ContainerEngine,
    name: String,
    cwd: ContainerPath,
    state: ChannelState,
    process: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    guard: ContainerGuard,
    output: OutputManager,
}

impl RemoteShell {
    /// Create and start a container running an interactive bash.
    ///
    /// With `simulate_32_bit` the shell runs under `linux32`. The returned
    /// channel has already answered one command and created `cwd`. Commands
    /// that stream their output are echoed through `output`.
    pub async fn open(
        engine: ContainerEngine,
        image: &str,
        simulate_32_bit: bool,
        cwd: &ContainerPath,
        output: OutputManager,
    ) -> Result<Self, ChannelError> {
        let name = format!("cibuildwheel-{}", Uuid::new_v4());
        let spawn_error = |reason: String| ChannelError::Spawn {
            image: image.to_string(),
            reason,
        };

        let mut create = Command::new(engine.program());
        create.args([
            "create",
            "--env=CIBUILDWHEEL",
            &format!("--name={name}"),
            "--interactive",
            "--volume=/:/host:Z",
            image,
        ]);
        if simulate_32_bit {
            create.arg("linux32");
        }
        create.arg("/bin/bash").stdout(Stdio::null());

        let status = create
            .status()
            .await
            .map_err(|e| spawn_error(format!("could not run {engine}: {e}")))?;
        if !status.success() {
            return Err(spawn_error(format!(
                "{engine} create exited with code {}",
                status.code().unwrap_or(-1)
            )));
        }
        let guard = ContainerGuard::new(engine, &name);
        log::debug!("created container {name} from {image}");

        let mut process = Command::new(engine.program())
            .args(["start", "--attach", "--interactive", &name])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(format!("could not attach to {name}: {e}")))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| spawn_error("shell stdin was not captured".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| spawn_error("shell stdout was not captured".to_string()))?;

        let mut shell = Self {
            engine,
            name,
            cwd: cwd.clone(),
            state: ChannelState::Ready,
            process,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            guard,
            output,
        };

        // `cwd` may not exist yet, so these two run from /
        let root = ContainerPath::new("/");
        // blocks until the shell is actually reading
        shell.exec(CommandInvocation::new(["/bin/true"]).cwd(&root)).await?;
        // podman doesn't create the default working directory
        shell
            .exec(CommandInvocation::new(["mkdir", "-p", cwd.as_str()]).cwd(&root))
            .await?;

        Ok(shell)
    }

    /// Generated container name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_ready(&self) -> Result<(), ChannelError> {
        match self.state {
            ChannelState::Ready => Ok(()),
            ChannelState::Dead => Err(ChannelError::ProcessDied {
                name: self.name.clone(),
            }),
            ChannelState::Closed => Err(ChannelError::Closed {
                name: self.name.clone(),
            }),
        }
    }

    fn died(&mut self) -> ChannelError {
        self.state = ChannelState::Dead;
        ChannelError::ProcessDied {
            name: self.name.clone(),
        }
    }

    /// Read until the footer for `marker`; stream or collect everything before it
    async fn read_reply(
        &mut self,
        marker: &str,
        capture: bool,
    ) -> Result<(Vec<u8>, i32), ChannelError> {
        let mut captured = Vec::new();
        let mut sink = tokio::io::stdout();
        let mut line = Vec::new();

        loop {
            line.clear();
            let read = match self.stdout.read_until(b'\n', &mut line).await {
                Ok(read) => read,
                Err(e) => {
                    log::debug!("read from {} failed: {e}", self.name);
                    return Err(self.died());
                }
            };
            if read == 0 {
                return Err(self.died());
            }

            let footer = match protocol::parse_footer(&line, marker) {
                Ok(footer) => footer,
                Err(reason) => {
                    self.state = ChannelState::Dead;
                    return Err(ChannelError::Protocol {
                        name: self.name.clone(),
                        reason,
                    });
                }
            };
            let body = match footer {
                Some(footer) => &line[..footer.output_len],
                None => &line[..],
            };

            if capture {
                captured.extend_from_slice(body);
            } else {
                sink.write_all(body).await?;
            }

            if let Some(footer) = footer {
                if !capture {
                    sink.flush().await?;
                }
                return Ok((captured, footer.status));
            }
        }
    }

    async fn remove_container(&mut self) -> Result<(), ChannelError> {
        let status = Command::new(self.engine.program())
            .args(["rm", "--force", "-v", &self.name])
            .stdout(Stdio::null())
            .status()
            .await?;
        if status.success() {
            self.guard.disarm();
            log::debug!("removed container {}", self.name);
        } else {
            log::warn!(
                "{} rm exited with code {} for {}",
                self.engine,
                status.code().unwrap_or(-1),
                self.name
            );
        }
        Ok(())
    }

    /// Spawn `<engine> exec -i <name> <args>` with std::process, for blocking tar pipes
    fn exec_std(&self, args: &[&str]) -> std::process::Command {
        let mut command = std::process::Command::new(self.engine.program());
        command.args(["exec", "-i", &self.name]).args(args);
        command
    }
}

impl ShellChannel for RemoteShell {
    async fn exec(&mut self, invocation: CommandInvocation) -> Result<CommandOutput, ChannelError> {
        self.ensure_ready()?;

        let marker = Uuid::new_v4().to_string();
        let script = protocol::build_script(&invocation, &self.cwd, &marker);

        if !invocation.capture {
            let _ = self.output.indent(&format!("+ {}", invocation.display()));
        }
        log::debug!("[{}] {}", self.name, invocation.display());

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(self.died());
        };
        let written = async {
            stdin.write_all(&script).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            log::debug!("write to {} failed: {e}", self.name);
            return Err(self.died());
        }

        let (stdout, status) = self.read_reply(&marker, invocation.capture).await?;

        if status != 0 && !invocation.allow_failure {
            return Err(ChannelError::CommandFailed {
                returncode: status,
                args: invocation.args,
                output: String::from_utf8_lossy(&stdout).into_owned(),
            });
        }
        Ok(CommandOutput { stdout, status })
    }

    async fn copy_in(
        &mut self,
        host_path: &Path,
        dest: &ContainerPath,
    ) -> Result<(), ChannelError> {
        self.ensure_ready()?;

        if host_path.is_dir() {
            self.call(["mkdir", "-p", dest.as_str()]).await?;

            // tar through exec rather than `docker cp`: cp hits quota/no-space
            // errors while the host root is bind-mounted
            let mut command =
                self.exec_std(&["tar", "--no-same-owner", "-xC", dest.as_str(), "-f", "-"]);
            let host_path = host_path.to_path_buf();
            let args = vec![format!("tar -xC {dest}")];

            tokio::task::spawn_blocking(move || -> Result<(), ChannelError> {
                let mut child = command.stdin(Stdio::piped()).spawn()?;
                let stdin = child.stdin.take().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "tar stdin was not captured",
                    )
                })?;

                let mut builder = tar::Builder::new(stdin);
                builder.follow_symlinks(false);
                let appended = builder.append_dir_all(".", &host_path);
                // closes the pipe so tar sees EOF even when appending failed
                let finished = builder.into_inner().map(drop);

                let status = child.wait()?;
                appended?;
                finished?;
                if !status.success() {
                    return Err(ChannelError::CommandFailed {
                        returncode: status.code().unwrap_or(-1),
                        args,
                        output: String::new(),
                    });
                }
                Ok(())
            })
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))??;
        } else {
            if let Some(parent) = dest.parent() {
                self.call(["mkdir", "-p", parent.as_str()]).await?;
            }

            let quoted = shell_quote(dest.as_str().as_bytes());
            let redirect = format!("cat > {}", String::from_utf8_lossy(&quoted));
            let mut child = Command::new(self.engine.program())
                .args(["exec", "-i", &self.name, "sh", "-c", &redirect])
                .stdin(Stdio::piped())
                .spawn()?;

            let mut file = tokio::fs::File::open(host_path).await?;
            if let Some(mut stdin) = child.stdin.take() {
                tokio::io::copy(&mut file, &mut stdin).await?;
                stdin.shutdown().await?;
            }

            let status = child.wait().await?;
            if !status.success() {
                return Err(ChannelError::CommandFailed {
                    returncode: status.code().unwrap_or(-1),
                    args: vec!["sh".to_string(), "-c".to_string(), redirect],
                    output: String::new(),
                });
            }
        }
        Ok(())
    }

    async fn copy_out(
        &mut self,
        src: &ContainerPath,
        host_path: &Path,
    ) -> Result<(), ChannelError> {
        self.ensure_ready()?;
        tokio::fs::create_dir_all(host_path).await?;

        match self.engine {
            ContainerEngine::Docker => {
                let mut command = self.exec_std(&["tar", "-cC", src.as_str(), "-f", "-", "."]);
                let host_path = host_path.to_path_buf();
                let args = vec![format!("tar -cC {src}")];

                tokio::task::spawn_blocking(move || -> Result<(), ChannelError> {
                    let mut child = command.stdout(Stdio::piped()).spawn()?;
                    let stdout = child.stdout.take().ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "tar stdout was not captured",
                        )
                    })?;

                    let unpacked = tar::Archive::new(stdout).unpack(&host_path);
                    let status = child.wait()?;
                    unpacked?;
                    if !status.success() {
                        return Err(ChannelError::CommandFailed {
                            returncode: status.code().unwrap_or(-1),
                            args,
                            output: String::new(),
                        });
                    }
                    Ok(())
                })
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))??;
            }
            ContainerEngine::Podman => {
                // podman can't stream the archive through exec reliably
                let archive = ContainerPath::new(format!("/tmp/output-{}.tar", self.name));
                self.call(["tar", "-cC", src.as_str(), "-f", archive.as_str(), "."]).await?;

                let staging = tempfile::tempdir()?;
                let local = staging.path().join("output.tar");
                let status = Command::new(self.engine.program())
                    .arg("cp")
                    .arg(format!("{}:{}", self.name, archive))
                    .arg(&local)
                    .status()
                    .await?;
                if !status.success() {
                    return Err(ChannelError::CommandFailed {
                        returncode: status.code().unwrap_or(-1),
                        args: vec!["podman".to_string(), "cp".to_string(), archive.to_string()],
                        output: String::new(),
                    });
                }

                let host_path = host_path.to_path_buf();
                tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                    let file = std::fs::File::open(&local)?;
                    tar::Archive::new(file).unpack(&host_path)
                })
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))??;

                self.call(["rm", "-f", archive.as_str()]).await?;
            }
        }
        Ok(())
    }

    async fn glob(
        &mut self,
        dir: &ContainerPath,
        pattern: &str,
    ) -> Result<Vec<ContainerPath>, ChannelError> {
        let full_pattern = dir.join(pattern);
        let output = self
            .exec(
                CommandInvocation::new([
                    UTILITY_PYTHON,
                    "-c",
                    "import sys, json, glob; json.dump(sorted(glob.glob(sys.argv[1])), sys.stdout)",
                    full_pattern.as_str(),
                ])
                .capture(),
            )
            .await?;

        let paths: Vec<String> =
            serde_json::from_slice(&output.stdout).map_err(|e| ChannelError::Protocol {
                name: self.name.clone(),
                reason: format!("glob returned invalid JSON: {e}"),
            })?;
        Ok(paths.into_iter().map(ContainerPath::new).collect())
    }

    async fn environment(&mut self) -> Result<Environment, ChannelError> {
        let output = self.exec(CommandInvocation::new(["env", "-0"]).capture()).await?;
        Environment::from_env0(&output.stdout).map_err(|reason| ChannelError::Protocol {
            name: self.name.clone(),
            reason,
        })
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        if self.state == ChannelState::Closed {
            return Ok(());
        }

        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"exit 0\n").await;
            let _ = stdin.flush().await;
        }

        match timeout(EXIT_TIMEOUT, self.process.wait()).await {
            Ok(Ok(status)) => log::debug!("shell in {} exited with {status}", self.name),
            Ok(Err(e)) => log::debug!("waiting for shell in {} failed: {e}", self.name),
            Err(_) => {
                log::warn!(
                    "shell in {} did not exit after {}s, killing",
                    self.name,
                    EXIT_TIMEOUT.as_secs()
                );
                let _ = self.process.kill().await;
            }
        }

        self.state = ChannelState::Closed;
        self.remove_container().await
    }
}
