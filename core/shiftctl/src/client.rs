//! Socket client for zara-shiftd.
//!
//! Mutations are not idempotent, so only connection failures are retried.
//! An error response from the daemon is returned to the caller as is.

use rand::RngCore;
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use zara_shiftd_protocol::{Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION};

const SOCKET_ENV: &str = "ZARA_SHIFTD_SOCKET";
const SOCKET_NAME: &str = "shiftd.sock";
const READ_TIMEOUT_MS: u64 = 10_000;
const WRITE_TIMEOUT_MS: u64 = 1_000;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to connect to daemon: {0}")]
    Connect(String),

    #[error("Failed talking to daemon: {0}")]
    Io(String),

    #[error("Invalid daemon response: {0}")]
    Protocol(String),

    #[error("{code}: {message}")]
    Daemon { code: String, message: String },
}

/// Sends one request and returns the response `data`.
pub fn call(method: Method, params: Option<Value>) -> Result<Value, ClientError> {
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(make_request_id()),
        params,
    };

    let response = send_with_retry(&request)?;
    if response.ok {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    Err(match response.error {
        Some(error) => ClientError::Daemon {
            code: error.code,
            message: error.message,
        },
        None => ClientError::Protocol("error response without details".to_string()),
    })
}

pub fn socket_path() -> Result<PathBuf, ClientError> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| ClientError::Connect("Home directory not found".to_string()))?;
    Ok(home.join(".zara").join(SOCKET_NAME))
}

fn send_with_retry(request: &Request) -> Result<Response, ClientError> {
    match send_request(request) {
        Err(ClientError::Connect(err)) => {
            tracing::warn!(error = %err, method = ?request.method, "Failed to reach daemon; retrying");
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_request(request).inspect_err(|retry_err| {
                tracing::warn!(
                    error = %retry_err,
                    method = ?request.method,
                    "Retry failed reaching daemon"
                );
            })
        }
        other => other,
    }
}

fn send_request(request: &Request) -> Result<Response, ClientError> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket)
        .map_err(|err| ClientError::Connect(format!("{}: {}", socket.display(), err)))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, request)
        .map_err(|err| ClientError::Io(format!("Failed to write request: {}", err)))?;
    stream
        .write_all(b"\n")
        .map_err(|err| ClientError::Io(format!("Failed to flush request: {}", err)))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, ClientError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ClientError::Protocol(
                        "response exceeded maximum size".to_string(),
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ClientError::Io(
                    "timed out waiting for daemon response".to_string(),
                ));
            }
            Err(err) => {
                return Err(ClientError::Io(format!("Failed to read response: {}", err)))
            }
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(ClientError::Protocol("daemon response was empty".to_string()));
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| ClientError::Protocol(format!("response was not valid JSON: {}", err)))
}

fn make_request_id() -> String {
    let mut random = rand::thread_rng();
    format!(
        "req-{}-{}-{:x}",
        chrono::Utc::now().timestamp_millis(),
        std::process::id(),
        random.next_u64()
    )
}
