//! Live tests against a real container engine.
//!
//! Run with `cargo test -- --ignored` on a machine with docker and network access.

use cibuildwheel::container::{
    CommandInvocation, ContainerBackend, ContainerEngine, ContainerPath, EngineBackend, Environment,
    ShellChannel,
};
use cibuildwheel::error::ChannelError;
use tempfile::TempDir;

const IMAGE: &str = "quay.io/pypa/manylinux2014_x86_64:latest";

async fn open() -> <EngineBackend as ContainerBackend>::Channel {
    let backend = EngineBackend::new(ContainerEngine::Docker);
    backend.check_available().await.unwrap();
    backend.open(IMAGE, false, &ContainerPath::new("/project")).await.unwrap()
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_echo_round_trip() {
    let mut shell = open().await;
    let output = shell
        .exec(CommandInvocation::new(["echo", "hello world"]).capture())
        .await
        .unwrap();
    assert_eq!(output.stdout, b"hello world\n");

    // output without a trailing newline still frames correctly
    let output = shell
        .exec(CommandInvocation::new(["printf", "%s", "no newline"]).capture())
        .await
        .unwrap();
    assert_eq!(output.text(), "no newline");

    let pwd = shell.capture_in(["pwd"], None).await.unwrap();
    assert_eq!(pwd, "/project");
    shell.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_failure_status() {
    let mut shell = open().await;
    let output = shell
        .exec(CommandInvocation::new(["false"]).allow_failure())
        .await
        .unwrap();
    assert_eq!(output.status, 1);

    let err = shell.call(["sh", "-c", "exit 3"]).await.unwrap_err();
    assert!(matches!(err, ChannelError::CommandFailed { returncode: 3, .. }));

    // the channel survives a failed command
    assert_eq!(shell.capture_in(["echo", "ok"], None).await.unwrap(), "ok");
    shell.close().await.unwrap();
    shell.close().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
#[ignore = "requires docker"]
async fn test_non_utf8_environment_round_trip() {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    let mut shell = open().await;
    let mut env: Environment = shell.environment().await.unwrap();
    env.insert("CIBW_RAW", OsString::from_vec(vec![0x66, 0xff, 0x6f]));

    let output = shell
        .exec(CommandInvocation::new(["printenv", "CIBW_RAW"]).env(&env).capture())
        .await
        .unwrap();
    assert_eq!(output.stdout, vec![0x66, 0xff, 0x6f, b'\n']);
    shell.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_copy_and_glob() {
    let src = TempDir::new().unwrap();
    std::fs::create_dir_all(src.path().join("pkg")).unwrap();
    std::fs::write(src.path().join("pkg/a.whl"), b"a").unwrap();
    std::fs::write(src.path().join("pkg/b.whl"), b"b").unwrap();
    std::fs::write(src.path().join("setup.py"), b"").unwrap();

    let mut shell = open().await;
    let project = ContainerPath::new("/project");
    shell.copy_in(src.path(), &project).await.unwrap();

    let wheels = shell.glob(&project.join("pkg"), "*.whl").await.unwrap();
    let names: Vec<&str> = wheels.iter().map(ContainerPath::file_name).collect();
    assert_eq!(names, vec!["a.whl", "b.whl"]);

    let dest = TempDir::new().unwrap();
    shell.copy_out(&project.join("pkg"), dest.path()).await.unwrap();
    assert_eq!(std::fs::read(dest.path().join("b.whl")).unwrap(), b"b");
    shell.close().await.unwrap();
}
