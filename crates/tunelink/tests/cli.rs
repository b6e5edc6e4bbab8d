#![cfg(all(unix, feature = "cli"))]

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/tlcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn tunelink() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tunelink"));
    cmd.env_remove("TUNELINK_SOCKET")
        .arg("--log-level")
        .arg("error");
    cmd
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    loop {
        if UnixStream::connect(path).is_ok() {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("connect timeout");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn start_server(sock_path: &Path) -> Child {
    let child = tunelink()
        .arg("serve")
        .arg(sock_path)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve should start");
    wait_for_socket(sock_path, Duration::from_secs(3));
    child
}

fn clients_json(sock_path: &Path) -> serde_json::Value {
    let output = tunelink()
        .arg("--format")
        .arg("json")
        .arg("clients")
        .arg(sock_path)
        .output()
        .expect("clients should run");
    assert!(output.status.success(), "clients failed: {output:?}");
    serde_json::from_slice(&output.stdout).expect("clients output should be json")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().expect("stdout should have a line");
    serde_json::from_str(line).expect("stdout should be json")
}

#[test]
fn version_prints_package_version() {
    let output = tunelink()
        .arg("version")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("tunelink {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn clients_without_server_times_out_with_124() {
    let dir = unique_temp_dir("missing");
    let output = tunelink()
        .arg("clients")
        .arg(dir.join("absent.sock"))
        .arg("--timeout")
        .arg("200ms")
        .output()
        .expect("clients should run");
    assert_eq!(output.status.code(), Some(124));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_reaches_listener_and_prints_echo() {
    let dir = unique_temp_dir("roundtrip");
    let sock_path = dir.join("daemon.sock");
    let mut server = start_server(&sock_path);

    let listener = tunelink()
        .arg("--format")
        .arg("json")
        .arg("listen")
        .arg(&sock_path)
        .arg("--ready")
        .arg("--echo")
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("listen should start");

    let start = Instant::now();
    let listener_id = loop {
        let clients = clients_json(&sock_path);
        if let Some(id) = clients["ready"].as_array().and_then(|ready| ready.first()) {
            break id.as_u64().expect("client id should be a number");
        }
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "listener never became ready"
        );
        thread::sleep(Duration::from_millis(25));
    };

    let output = tunelink()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&sock_path)
        .arg("--to")
        .arg(listener_id.to_string())
        .arg("--data")
        .arg("hello")
        .output()
        .expect("send should run");
    assert!(output.status.success(), "send failed: {output:?}");
    let reply = stdout_json(&output);
    assert_eq!(reply["sender"], listener_id);
    assert_eq!(reply["payload"], "hello");
    assert_eq!(reply["id"], 0);

    let received = listener.wait_with_output().expect("listen should exit");
    assert!(received.status.success(), "listen failed: {received:?}");
    let message = stdout_json(&received);
    assert_eq!(message["destination"], listener_id);
    assert_eq!(message["payload"], "hello");
    assert_ne!(message["id"], 0);

    let _ = server.kill();
    let _ = server.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_unknown_client_fails() {
    let dir = unique_temp_dir("unknown");
    let sock_path = dir.join("daemon.sock");
    let mut server = start_server(&sock_path);

    let output = tunelink()
        .arg("send")
        .arg(&sock_path)
        .arg("--to")
        .arg("9999")
        .arg("--policy")
        .arg("no-reply")
        .arg("--data")
        .arg("lost")
        .output()
        .expect("send should run");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("peer 9999 not found"), "stderr: {stderr}");

    let _ = server.kill();
    let _ = server.wait();
    let _ = std::fs::remove_dir_all(&dir);
}
