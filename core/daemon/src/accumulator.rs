//! Shift accumulator.
//!
//! Production and quality events add to the counters of the machine's open
//! shift. Every event runs under the machine lock inside one IMMEDIATE
//! transaction, so concurrent events never lose an update and an event that
//! races a rollover lands in whichever shift is open when it gets the lock.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use zara_shiftd_protocol::RecordProductionParams;

use crate::db;
use crate::error::{Result, ShiftError};
use crate::model::{format_timestamp, new_id, ShiftData};
use crate::schedule::ShiftWindow;
use crate::state::SharedState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProductionDelta {
    pub total_production: i64,
    pub downtime: i64,
    pub running_time: i64,
    /// Replaces the stored target when present.
    pub target_production: Option<i64>,
}

impl ProductionDelta {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("total_production", self.total_production),
            ("downtime", self.downtime),
            ("running_time", self.running_time),
        ] {
            if value < 0 {
                return Err(ShiftError::Validation(format!(
                    "{} must not be negative",
                    field
                )));
            }
        }
        if let Some(target) = self.target_production {
            if target <= 0 {
                return Err(ShiftError::Validation(
                    "target_production must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl From<&RecordProductionParams> for ProductionDelta {
    fn from(params: &RecordProductionParams) -> Self {
        Self {
            total_production: params.total_production,
            downtime: params.downtime,
            running_time: params.running_time,
            target_production: params.target_production,
        }
    }
}

pub fn compute_efficiency(total_production: i64, target_production: i64) -> f64 {
    total_production as f64 / target_production.max(1) as f64
}

impl SharedState {
    pub fn record_production(
        &self,
        machine_id: &str,
        operator_id: &str,
        delta: ProductionDelta,
        now: DateTime<Utc>,
    ) -> Result<ShiftData> {
        delta.validate()?;
        let shift = self.apply_to_active_shift(machine_id, operator_id, now, |shift| {
            shift.total_production = shift.total_production.saturating_add(delta.total_production);
            shift.downtime = shift.downtime.saturating_add(delta.downtime);
            shift.running_time = shift.running_time.saturating_add(delta.running_time);
            if let Some(target) = delta.target_production {
                shift.target_production = target;
            }
        })?;
        tracing::debug!(
            machine_id,
            shift_id = %shift.id,
            added = delta.total_production,
            total = shift.total_production,
            "Production recorded"
        );
        Ok(shift)
    }

    pub fn record_quality_test(
        &self,
        machine_id: &str,
        operator_id: &str,
        approved: bool,
        now: DateTime<Utc>,
    ) -> Result<ShiftData> {
        let shift = self.apply_to_active_shift(machine_id, operator_id, now, |shift| {
            shift.quality_tests = shift.quality_tests.saturating_add(1);
            if approved {
                shift.approved_tests = shift.approved_tests.saturating_add(1);
            } else {
                shift.rejected_tests = shift.rejected_tests.saturating_add(1);
            }
        })?;
        tracing::debug!(
            machine_id,
            shift_id = %shift.id,
            approved,
            quality_tests = shift.quality_tests,
            "Quality test recorded"
        );
        Ok(shift)
    }

    pub fn active_shifts(&self) -> Result<Vec<ShiftData>> {
        self.db().with_connection(db::list_active_shifts)
    }

    pub fn active_shift(&self, machine_id: &str) -> Result<Option<ShiftData>> {
        self.db()
            .with_connection(|conn| db::active_shift_for_machine(conn, machine_id))
    }

    fn apply_to_active_shift(
        &self,
        machine_id: &str,
        operator_id: &str,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut ShiftData),
    ) -> Result<ShiftData> {
        self.locks().with_machine(machine_id, || {
            self.db().with_transaction(|tx| {
                if db::get_machine(tx, machine_id)?.is_none() {
                    return Err(ShiftError::not_found("machine", machine_id));
                }
                if db::get_user(tx, operator_id)?.is_none() {
                    return Err(ShiftError::not_found("operator", operator_id));
                }

                let mut shift = match db::active_shift_for_machine(tx, machine_id)? {
                    Some(shift) => shift,
                    None => {
                        let window = self.schedule().window_at(now);
                        self.open_shift(tx, machine_id, operator_id, &window, now)?
                    }
                };

                apply(&mut shift);
                shift.efficiency =
                    compute_efficiency(shift.total_production, shift.target_production);
                shift.updated_at = format_timestamp(now);

                if !db::update_shift_counters(tx, &shift)? {
                    return Err(ShiftError::storage(
                        "Failed to update shift counters",
                        format!("shift {} is no longer open", shift.id),
                    ));
                }
                Ok(shift)
            })
        })
    }

    /// Inserts a zeroed shift for `window`. Callers hold the machine lock and
    /// have checked that no shift is open.
    pub(crate) fn open_shift(
        &self,
        conn: &Connection,
        machine_id: &str,
        operator_id: &str,
        window: &ShiftWindow,
        now: DateTime<Utc>,
    ) -> Result<ShiftData> {
        let timestamp = format_timestamp(now);
        let shift = ShiftData {
            id: new_id(),
            machine_id: machine_id.to_string(),
            operator_id: operator_id.to_string(),
            shift_type: window.shift_type,
            shift_start: format_timestamp(window.starts_at),
            shift_end: format_timestamp(window.ends_at),
            total_production: 0,
            target_production: self.config().production.default_target,
            efficiency: 0.0,
            downtime: 0,
            running_time: 0,
            quality_tests: 0,
            approved_tests: 0,
            rejected_tests: 0,
            is_active: true,
            is_archived: false,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        };
        db::insert_shift(conn, &shift)?;
        tracing::info!(
            machine_id,
            shift_id = %shift.id,
            shift_type = shift.shift_type.as_str(),
            "Shift opened"
        );
        Ok(shift)
    }
}
