#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::{Command, Stdio};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/pipelink-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

#[test]
fn send_reaches_serve_and_both_exit_cleanly() {
    let dir = unique_temp_dir("send");
    let sock_path = dir.join("line.sock");

    let serve = Command::new(env!("CARGO_BIN_EXE_pipelink"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("raw")
        .arg("serve")
        .arg(&sock_path)
        .arg("--once")
        .arg("--no-stdin")
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve should start");

    let send = Command::new(env!("CARGO_BIN_EXE_pipelink"))
        .arg("--log-level")
        .arg("error")
        .arg("send")
        .arg(&sock_path)
        .arg("--data")
        .arg("hello")
        .arg("--line-ending")
        .arg("none")
        .arg("--retry-interval")
        .arg("50ms")
        .output()
        .expect("send should run");
    assert!(
        send.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&send.stderr)
    );

    let served = serve.wait_with_output().expect("serve should exit");
    assert_eq!(served.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&served.stdout), "hello");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_missing_pipe_times_out_with_124() {
    let dir = unique_temp_dir("missing");
    let missing = dir.join("absent.sock");

    let output = Command::new(env!("CARGO_BIN_EXE_pipelink"))
        .arg("send")
        .arg(&missing)
        .arg("--data")
        .arg("hello")
        .arg("--connect-timeout")
        .arg("1s")
        .arg("--retry-interval")
        .arg("100ms")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(124));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not available"), "stderr: {stderr}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn connect_exits_when_pipe_path_cannot_exist() {
    let dir = unique_temp_dir("gone");
    let file = dir.join("plain-file");
    std::fs::write(&file, b"x").expect("file should be writable");

    let output = Command::new(env!("CARGO_BIN_EXE_pipelink"))
        .arg("--log-level")
        .arg("error")
        .arg("connect")
        .arg(file.join("pipe.sock"))
        .arg("--no-stdin")
        .arg("--retry-interval")
        .arg("50ms")
        .output()
        .expect("connect should run");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("went away"), "stderr: {stderr}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn serve_rejects_zero_buffer_size() {
    let output = Command::new(env!("CARGO_BIN_EXE_pipelink"))
        .arg("serve")
        .arg("unused")
        .arg("--buffer-size")
        .arg("0")
        .output()
        .expect("serve should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_pipelink"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("pipelink {}", env!("CARGO_PKG_VERSION"))
    );
}
