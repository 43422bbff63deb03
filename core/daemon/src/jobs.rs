//! Periodic job threads.
//!
//! Each job sleeps its configured interval between ticks. A failed tick is
//! logged and recorded in the health snapshot; the next tick retries.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

use crate::state::{JobKind, SharedState};

pub fn spawn_rollover_job(state: Arc<SharedState>) {
    let interval = Duration::from_secs(state.config().jobs.rollover_interval_secs);
    thread::spawn(move || loop {
        run_rollover_tick(&state, Utc::now());
        thread::sleep(interval);
    });
}

pub fn spawn_sweep_job(state: Arc<SharedState>) {
    let interval = Duration::from_secs(state.config().jobs.sweep_interval_secs);
    thread::spawn(move || loop {
        thread::sleep(interval);
        run_sweep_tick(&state, Utc::now());
    });
}

pub fn run_rollover_tick(state: &SharedState, now: DateTime<Utc>) {
    match state.run_rollover(now) {
        Ok(report) => {
            state.record_job_run(
                JobKind::Rollover,
                now,
                report.rolled_over.len(),
                report.errors.len(),
                report.errors.first().map(|failure| failure.message.clone()),
            );
        }
        Err(err) => {
            warn!(error = %err, "Periodic shift rollover failed");
            state.record_job_run(JobKind::Rollover, now, 0, 0, Some(err.to_string()));
        }
    }
}

pub fn run_sweep_tick(state: &SharedState, now: DateTime<Utc>) {
    let max_age =
        ChronoDuration::hours(i64::from(state.config().jobs.stuck_operation_max_age_hours));
    match state.sweep_stuck_operations(max_age, now) {
        Ok(report) => {
            state.record_job_run(
                JobKind::Sweep,
                now,
                report.cancelled.len(),
                report.errors.len(),
                report.errors.first().map(|failure| failure.message.clone()),
            );
        }
        Err(err) => {
            warn!(error = %err, "Periodic stuck-operation sweep failed");
            state.record_job_run(JobKind::Sweep, now, 0, 0, Some(err.to_string()));
        }
    }
}
