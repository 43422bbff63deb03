use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use zara_shiftd_protocol::{Method, Request, Response, PROTOCOL_VERSION};

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_zara-shiftd"))
        .env("HOME", home)
        .env_remove("ZARA_SHIFTD_CONFIG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn zara-shiftd")
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".zara").join("shiftd.sock")
}

fn can_bind_socket(home: &Path) -> bool {
    let probe_path = home.join("probe.sock");
    match UnixListener::bind(&probe_path) {
        Ok(listener) => {
            drop(listener);
            let _ = fs::remove_file(&probe_path);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true,
    }
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("failed to connect to daemon socket");
    serde_json::to_writer(&mut stream, &request).expect("failed to serialize request");
    stream.write_all(b"\n").expect("failed to write request");
    stream.flush().expect("failed to flush request");
    read_response(&mut stream)
}

fn send_raw_request(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("failed to connect to daemon socket");
    stream
        .write_all(payload)
        .expect("failed to write raw payload");
    stream.flush().expect("failed to flush raw payload");
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("failed to parse response JSON")
}

fn health(socket: &Path) -> Response {
    send_request(
        socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetHealth,
            id: Some("health".to_string()),
            params: None,
        },
    )
}

fn temp_home(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in("/tmp")
        .expect("failed to create temp HOME")
}

#[test]
fn daemon_handles_malformed_payload_flood_without_losing_health() {
    let home = temp_home("zara-shiftd-hardening-malformed");
    if !can_bind_socket(home.path()) {
        eprintln!(
            "Skipping malformed flood hardening test: unix socket binding not permitted in this environment."
        );
        return;
    }

    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let mut guard = Some(DaemonGuard { child });
    wait_for_socket(&socket, Duration::from_secs(5));

    for _ in 0..128 {
        let response = send_raw_request(&socket, b"{\"bad_json\": true\n");
        assert!(!response.ok, "malformed payload must be rejected");
        assert_eq!(
            response.error.as_ref().map(|err| err.code.as_str()),
            Some("invalid_json")
        );
    }

    assert!(
        health(&socket).ok,
        "daemon should remain healthy after malformed flood"
    );

    drop(guard.take());
}

#[test]
fn daemon_rejects_bad_envelopes_and_params() {
    let home = temp_home("zara-shiftd-hardening-params");
    if !can_bind_socket(home.path()) {
        eprintln!(
            "Skipping params hardening test: unix socket binding not permitted in this environment."
        );
        return;
    }

    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let mut guard = Some(DaemonGuard { child });
    wait_for_socket(&socket, Duration::from_secs(5));

    let cases: [(&[u8], &str); 5] = [
        (
            b"{\"protocol_version\":99,\"method\":\"get_health\"}\n",
            "protocol_mismatch",
        ),
        (
            b"{\"protocol_version\":1,\"method\":\"drop_tables\"}\n",
            "invalid_json",
        ),
        (
            b"{\"protocol_version\":1,\"method\":\"start_operation\",\"params\":[1]}\n",
            "invalid_params",
        ),
        (
            b"{\"protocol_version\":1,\"method\":\"register_machine\",\"params\":{\"code\":\"A\",\"name\":\"B\",\"extra\":1}}\n",
            "invalid_params",
        ),
        (
            b"{\"protocol_version\":1,\"method\":\"run_rollover\",\"params\":{\"now\":\"yesterday\"}}\n",
            "invalid_timestamp",
        ),
    ];

    for (payload, expected) in cases {
        let response = send_raw_request(&socket, payload);
        assert!(!response.ok);
        assert_eq!(
            response.error.as_ref().map(|err| err.code.as_str()),
            Some(expected),
            "payload {}",
            String::from_utf8_lossy(payload)
        );
    }

    let missing = send_raw_request(
        &socket,
        b"{\"protocol_version\":1,\"method\":\"start_operation\",\"params\":{\"machine_id\":\"nope\",\"operator_id\":\"nobody\"}}\n",
    );
    assert_eq!(
        missing.error.as_ref().map(|err| err.code.as_str()),
        Some("not_found")
    );

    drop(guard.take());
}

#[test]
fn daemon_idle_connection_returns_read_timeout_error() {
    let home = temp_home("zara-shiftd-hardening-timeout");
    if !can_bind_socket(home.path()) {
        eprintln!(
            "Skipping timeout hardening test: unix socket binding not permitted in this environment."
        );
        return;
    }

    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let mut guard = Some(DaemonGuard { child });
    wait_for_socket(&socket, Duration::from_secs(5));

    let mut idle = UnixStream::connect(&socket).expect("failed to connect idle stream");
    let response = read_response(&mut idle);
    assert!(!response.ok, "idle request should return an error");
    assert_eq!(
        response.error.as_ref().map(|err| err.code.as_str()),
        Some("read_timeout")
    );

    drop(guard.take());
}

#[test]
fn daemon_restart_keeps_registered_state() {
    let home = temp_home("zara-shiftd-hardening-restart");
    if !can_bind_socket(home.path()) {
        eprintln!(
            "Skipping restart hardening test: unix socket binding not permitted in this environment."
        );
        return;
    }

    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let mut guard = Some(DaemonGuard { child });
    wait_for_socket(&socket, Duration::from_secs(5));

    let registered = send_raw_request(
        &socket,
        b"{\"protocol_version\":1,\"method\":\"register_machine\",\"params\":{\"code\":\"INJ-09\",\"name\":\"Injetora 9\"}}\n",
    );
    assert!(registered.ok, "register should succeed");

    drop(guard.take());

    let child = spawn_daemon(home.path());
    guard = Some(DaemonGuard { child });
    wait_for_socket(&socket, Duration::from_secs(5));

    let duplicate = send_raw_request(
        &socket,
        b"{\"protocol_version\":1,\"method\":\"register_machine\",\"params\":{\"code\":\"INJ-09\",\"name\":\"Injetora 9\"}}\n",
    );
    assert_eq!(
        duplicate.error.as_ref().map(|err| err.code.as_str()),
        Some("conflict"),
        "machine registered before restart must still exist"
    );

    drop(guard.take());
}
