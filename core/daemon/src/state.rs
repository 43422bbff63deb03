//! Daemon-wide shared state.
//!
//! One `SharedState` is created at startup and shared by every connection
//! thread and job thread. The core components add their operations to it in
//! their own modules (`tracker`, `accumulator`, `rollover`, `notify`,
//! `registry`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

use crate::config::ShiftdConfig;
use crate::db::Db;
use crate::locks::MachineLocks;
use crate::model::format_timestamp;
use crate::schedule::ShiftSchedule;

pub struct SharedState {
    db: Db,
    config: ShiftdConfig,
    schedule: ShiftSchedule,
    locks: MachineLocks,
    jobs: Mutex<JobsSnapshot>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobsSnapshot {
    pub rollover: JobRunSnapshot,
    pub sweep: JobRunSnapshot,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobRunSnapshot {
    pub runs: u64,
    pub last_run_at: Option<String>,
    /// Machines rolled over, or operations cancelled, by the last run.
    pub last_affected: usize,
    pub last_failures: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum JobKind {
    Rollover,
    Sweep,
}

impl SharedState {
    pub fn new(db: Db, config: ShiftdConfig) -> Result<Self, String> {
        let schedule = ShiftSchedule::from_config(&config.schedule)?;
        Ok(Self {
            db,
            config,
            schedule,
            locks: MachineLocks::new(),
            jobs: Mutex::new(JobsSnapshot::default()),
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn config(&self) -> &ShiftdConfig {
        &self.config
    }

    pub fn schedule(&self) -> &ShiftSchedule {
        &self.schedule
    }

    pub fn locks(&self) -> &MachineLocks {
        &self.locks
    }

    pub fn jobs_snapshot(&self) -> JobsSnapshot {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn record_job_run(
        &self,
        kind: JobKind,
        ran_at: DateTime<Utc>,
        affected: usize,
        failures: usize,
        error: Option<String>,
    ) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = match kind {
            JobKind::Rollover => &mut jobs.rollover,
            JobKind::Sweep => &mut jobs.sweep,
        };
        entry.runs = entry.runs.saturating_add(1);
        entry.last_run_at = Some(format_timestamp(ran_at));
        entry.last_affected = affected;
        entry.last_failures = failures;
        entry.last_error = error;
    }
}
