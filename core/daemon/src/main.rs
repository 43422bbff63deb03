//! zara-shiftd entrypoint.
//!
//! A single-writer service that owns shift tracking state for the plant floor:
//! a socket listener with strict request validation, a SQLite store, and two
//! job threads (shift rollover and stuck-operation sweep).

use chrono::{Duration as ChronoDuration, Utc};
use fs_err as fs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serde_json::Value;
use zara_shiftd_protocol::{
    parse_params, EndOperationParams, ErrorInfo, GetActiveShiftsParams, GetArchivesParams,
    GetNotificationsParams, Method, RecordProductionParams, RecordQualityTestParams,
    RegisterMachineParams, RegisterUserParams, Request, Response, RunRolloverParams,
    SetMachineStatusParams, StartOperationParams, SweepStuckOperationsParams, Validate,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod accumulator;
mod config;
mod db;
mod error;
mod jobs;
mod locks;
mod model;
mod notify;
mod registry;
mod rollover;
mod schedule;
mod state;
mod tracker;

use accumulator::ProductionDelta;
use db::Db;
use error::ShiftError;
use state::SharedState;

const SOCKET_NAME: &str = "shiftd.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "zara-shiftd started");

    let db_path = match daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    let db = match Db::new(db_path) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let shiftd_config = match config::load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            config::ShiftdConfig::default()
        }
    };
    info!(
        shifts = shiftd_config.schedule.shifts.len(),
        utc_offset_minutes = shiftd_config.schedule.utc_offset_minutes,
        rollover_interval_secs = shiftd_config.jobs.rollover_interval_secs,
        sweep_interval_secs = shiftd_config.jobs.sweep_interval_secs,
        "Shift schedule loaded"
    );

    let shared_state = match SharedState::new(db, shiftd_config) {
        Ok(state) => Arc::new(state),
        Err(err) => {
            error!(error = %err, "Failed to build shift schedule");
            std::process::exit(1);
        }
    };

    jobs::spawn_rollover_job(Arc::clone(&shared_state));
    jobs::spawn_sweep_job(Arc::clone(&shared_state));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("ZARA_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".zara").join(SOCKET_NAME))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".zara").join("shiftd").join("state.db"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let now = Utc::now();
    let Request {
        method, id, params, ..
    } = request;

    match method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "rollover_interval_secs": state.config().jobs.rollover_interval_secs,
                "sweep_interval_secs": state.config().jobs.sweep_interval_secs,
            });
            if let Ok(value) = serde_json::to_value(state.schedule().window_at(now)) {
                data["current_window"] = value;
            }
            if let Ok(value) = serde_json::to_value(state.jobs_snapshot()) {
                data["jobs"] = value;
            }
            Response::ok(id, data)
        }
        Method::RegisterMachine => respond(id, params, |p: RegisterMachineParams| {
            state.register_machine(&p, now)
        }),
        Method::RegisterUser => respond(id, params, |p: RegisterUserParams| {
            state.register_user(&p, now)
        }),
        Method::StartOperation => respond(id, params, |p: StartOperationParams| {
            state.start_operation(&p.machine_id, &p.operator_id, p.notes.as_deref(), now)
        }),
        Method::EndOperation => respond(id, params, |p: EndOperationParams| {
            state.end_operation(&p.operation_id, p.notes.as_deref(), now)
        }),
        Method::SetMachineStatus => respond(id, params, |p: SetMachineStatusParams| {
            state.set_machine_status(&p.machine_id, p.status, now)
        }),
        Method::RecordProduction => respond(id, params, |p: RecordProductionParams| {
            state.record_production(&p.machine_id, &p.operator_id, ProductionDelta::from(&p), now)
        }),
        Method::RecordQualityTest => respond(id, params, |p: RecordQualityTestParams| {
            state.record_quality_test(&p.machine_id, &p.operator_id, p.approved, now)
        }),
        Method::RunRollover => respond(id, params, |p: RunRolloverParams| {
            state.run_requested_rollover(p.now_override(), now)
        }),
        Method::SweepStuckOperations => respond(id, params, |p: SweepStuckOperationsParams| {
            let hours = p
                .max_age_hours
                .unwrap_or(state.config().jobs.stuck_operation_max_age_hours);
            state.sweep_stuck_operations(ChronoDuration::hours(i64::from(hours)), now)
        }),
        Method::GetActiveShifts => respond(id, params, |p: GetActiveShiftsParams| {
            match p.machine_id {
                Some(machine_id) => state
                    .active_shift(&machine_id)
                    .map(|shift| shift.into_iter().collect::<Vec<_>>()),
                None => state.active_shifts(),
            }
        }),
        Method::GetArchives => respond(id, params, |p: GetArchivesParams| {
            state.list_archives(p.machine_id.as_deref(), p.effective_limit())
        }),
        Method::GetNotifications => respond(id, params, |p: GetNotificationsParams| {
            state.notifications(&p)
        }),
    }
}

/// Decodes params, runs `op`, and maps its outcome onto a response.
fn respond<P, T, F>(id: Option<String>, params: Option<Value>, op: F) -> Response
where
    P: DeserializeOwned + Validate,
    T: Serialize,
    F: FnOnce(P) -> Result<T, ShiftError>,
{
    let parsed = match parse_params::<P>(params) {
        Ok(parsed) => parsed,
        Err(err) => return Response::error_with_info(id, err),
    };

    match op(parsed) {
        Ok(value) => match serde_json::to_value(&value) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                "serialization_error",
                format!("Failed to serialize response: {}", err),
            ),
        },
        Err(err) => {
            match &err {
                ShiftError::Storage { .. } => warn!(error = %err, "Request failed"),
                _ => tracing::debug!(error = %err, "Request rejected"),
            }
            Response::error(id, err.code(), err.to_string())
        }
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
