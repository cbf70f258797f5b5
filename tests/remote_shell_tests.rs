//! RemoteShell driven through a stand-in `docker` whose containers are host
//! processes, so the framing and channel state run without a daemon.

#![cfg(unix)]

use cibuildwheel::cli::OutputManager;
use cibuildwheel::container::{
    CommandInvocation, ContainerEngine, ContainerPath, Environment, RemoteShell, ShellChannel,
};
use cibuildwheel::error::ChannelError;
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

const STUB_ENGINE: &str = r#"#!/bin/sh
case "$1" in
    create|rm) exit 0 ;;
    start) exec /bin/bash ;;
    exec) shift 3; exec "$@" ;;
    --version) echo "stub engine" ;;
    *) echo "unexpected: $*" >&2; exit 1 ;;
esac
"#;

/// Put the stand-in engine first on PATH for this test binary
fn install_stub_engine(root: &Path) {
    let bin = root.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let docker = bin.join("docker");
    std::fs::write(&docker, STUB_ENGINE).unwrap();
    std::fs::set_permissions(&docker, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut paths = vec![bin];
    paths.extend(std::env::split_paths(&std::env::var_os("PATH").unwrap_or_default()));
    let joined = std::env::join_paths(paths).unwrap();
    // SAFETY: runs before the runtime starts, from the only test in this binary
    unsafe { std::env::set_var("PATH", joined) };
}

// One test function: PATH is process-wide state.
#[test]
fn test_remote_shell_over_stub_engine() {
    let work = TempDir::new().unwrap();
    let root = work.path().canonicalize().unwrap();
    install_stub_engine(&root);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let project_dir = root.join("project");
        let project = ContainerPath::new(project_dir.to_str().unwrap());
        let output = OutputManager::new(false, true);

        let mut shell =
            RemoteShell::open(ContainerEngine::Docker, "stub:latest", false, &project, output)
                .await
                .unwrap();
        assert!(project_dir.is_dir());

        // captured output excludes the footer
        let echoed = shell
            .exec(CommandInvocation::new(["echo", "hello"]).capture())
            .await
            .unwrap();
        assert_eq!(echoed.stdout, b"hello\n");
        assert_eq!(echoed.status, 0);

        let unterminated = shell
            .exec(CommandInvocation::new(["printf", "%s", "no newline"]).capture())
            .await
            .unwrap();
        assert_eq!(unterminated.text(), "no newline");

        // streamed output goes to stdout, nothing is collected
        let streamed = shell.exec(CommandInvocation::new(["echo", "streamed"])).await.unwrap();
        assert!(streamed.stdout.is_empty());

        assert_eq!(shell.capture_in(["pwd"], None).await.unwrap(), project.as_str());

        // non-zero status
        let err = shell.call(["false"]).await.unwrap_err();
        assert!(matches!(err, ChannelError::CommandFailed { returncode: 1, .. }));
        let tolerated = shell
            .exec(CommandInvocation::new(["false"]).allow_failure())
            .await
            .unwrap();
        assert_eq!(tolerated.status, 1);

        // a working directory that can't be entered fails instead of running elsewhere
        let missing = ContainerPath::new(root.join("missing").to_str().unwrap());
        let err = shell
            .exec(CommandInvocation::new(["pwd"]).cwd(&missing).capture())
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::CommandFailed { returncode: 1, .. }));

        // environment values are bytes, not text
        let raw = vec![0x66, 0xff, 0xfe, b'\n', b'\'', 0x80];
        let mut env = Environment::new();
        env.insert("CIBW_RAW", OsString::from_vec(raw.clone()));
        let printed = shell
            .exec(CommandInvocation::new(["printenv", "CIBW_RAW"]).env(&env).capture())
            .await
            .unwrap();
        let mut expected = raw;
        expected.push(b'\n');
        assert_eq!(printed.stdout, expected);

        // single files go through `exec -i ... cat`
        let source = root.join("setup.cfg");
        std::fs::write(&source, "[metadata]\nname = spam\n").unwrap();
        let dest = project.join("conf/setup.cfg");
        shell.copy_in(&source, &dest).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(project_dir.join("conf/setup.cfg")).unwrap(),
            "[metadata]\nname = spam\n"
        );

        // the channel survives every failure above
        assert_eq!(shell.capture_in(["echo", "ok"], None).await.unwrap(), "ok");

        shell.close().await.unwrap();
        shell.close().await.unwrap();
        let err = shell.call(["true"]).await.unwrap_err();
        assert!(matches!(err, ChannelError::Closed { .. }));
    });
}
