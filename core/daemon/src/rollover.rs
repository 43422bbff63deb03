//! Shift rollover engine.
//!
//! Per machine: NO_ACTIVE_SHIFT -> ACTIVE_SHIFT -> ARCHIVING -> NO_ACTIVE_SHIFT.
//! A run archives every open shift whose window has elapsed and opens the
//! shift for the current window. Running twice with the same `now` is a
//! no-op the second time.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use zara_shiftd_protocol::NotificationPriority;

use crate::db;
use crate::error::{Result, ShiftError};
use crate::model::{format_timestamp, parse_timestamp, ProductionArchive};
use crate::notify::{NotificationDraft, SHIFT_ROLLOVER};
use crate::schedule::ShiftWindow;
use crate::state::SharedState;

/// Slack allowed between a requested rollover time and the daemon clock.
const MAX_REQUEST_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize)]
pub struct RolloverReport {
    pub ran_at: String,
    pub window: ShiftWindow,
    pub rolled_over: Vec<RolledOverMachine>,
    pub already_current: Vec<String>,
    pub not_elapsed: Vec<String>,
    /// Archived, but no operator is known to open the next shift.
    pub deferred: Vec<String>,
    pub errors: Vec<RolloverFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RolledOverMachine {
    pub machine_id: String,
    pub archived_shift_id: String,
    pub archive_id: String,
    pub new_shift_id: Option<String>,
    pub operator_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RolloverFailure {
    pub machine_id: String,
    pub code: &'static str,
    pub message: String,
}

enum MachineOutcome {
    AlreadyCurrent,
    NotElapsed,
    RolledOver(RolledOverMachine),
}

impl SharedState {
    pub fn run_rollover(&self, now: DateTime<Utc>) -> Result<RolloverReport> {
        let window = self.schedule().window_at(now);
        let candidates = self.active_shifts()?;

        let mut report = RolloverReport {
            ran_at: format_timestamp(now),
            window,
            rolled_over: Vec::new(),
            already_current: Vec::new(),
            not_elapsed: Vec::new(),
            deferred: Vec::new(),
            errors: Vec::new(),
        };

        for candidate in candidates {
            let machine_id = candidate.machine_id;
            match self.roll_machine(&machine_id, &window, now) {
                Ok(MachineOutcome::AlreadyCurrent) => report.already_current.push(machine_id),
                Ok(MachineOutcome::NotElapsed) => report.not_elapsed.push(machine_id),
                Ok(MachineOutcome::RolledOver(rolled)) => {
                    if rolled.new_shift_id.is_none() {
                        report.deferred.push(machine_id);
                    }
                    report.rolled_over.push(rolled);
                }
                Err(err) => {
                    tracing::warn!(error = %err, machine_id = %machine_id, "Shift rollover failed");
                    report.errors.push(RolloverFailure {
                        code: err.code(),
                        message: err.to_string(),
                        machine_id,
                    });
                }
            }
        }

        if !report.rolled_over.is_empty() || !report.errors.is_empty() {
            tracing::info!(
                shift_type = window.shift_type.as_str(),
                rolled_over = report.rolled_over.len(),
                deferred = report.deferred.len(),
                errors = report.errors.len(),
                "Shift rollover completed"
            );
        }
        Ok(report)
    }

    /// Manual trigger. `requested` may evaluate boundaries in the past; a
    /// time ahead of the daemon clock would archive live shifts early and is
    /// rejected.
    pub fn run_requested_rollover(
        &self,
        requested: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<RolloverReport> {
        let at = match requested {
            Some(requested)
                if requested.signed_duration_since(now)
                    > Duration::seconds(MAX_REQUEST_SKEW_SECS) =>
            {
                return Err(ShiftError::Validation(format!(
                    "rollover time {} is ahead of the daemon clock {}",
                    format_timestamp(requested),
                    format_timestamp(now)
                )));
            }
            Some(requested) => requested,
            None => now,
        };
        self.run_rollover(at)
    }

    pub fn list_archives(
        &self,
        machine_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ProductionArchive>> {
        self.db()
            .with_connection(|conn| db::list_archives(conn, machine_id, limit))
    }

    fn roll_machine(
        &self,
        machine_id: &str,
        window: &ShiftWindow,
        now: DateTime<Utc>,
    ) -> Result<MachineOutcome> {
        self.locks().with_machine(machine_id, || {
            self.db().with_transaction(|tx| {
                let shift = match db::active_shift_for_machine(tx, machine_id)? {
                    Some(shift) => shift,
                    None => return Ok(MachineOutcome::AlreadyCurrent),
                };
                if shift.shift_type == window.shift_type
                    && shift.shift_start == format_timestamp(window.starts_at)
                {
                    return Ok(MachineOutcome::AlreadyCurrent);
                }

                let shift_end = parse_timestamp(&shift.shift_end).ok_or_else(|| {
                    ShiftError::storage(
                        "Corrupt shift row",
                        format!("shift {} has invalid shift_end {:?}", shift.id, shift.shift_end),
                    )
                })?;
                if shift_end > now {
                    return Ok(MachineOutcome::NotElapsed);
                }

                let archived_at = format_timestamp(now);
                if !db::archive_shift(tx, &shift.id, &archived_at)? {
                    return Ok(MachineOutcome::AlreadyCurrent);
                }

                let machine = db::get_machine(tx, machine_id)?
                    .ok_or_else(|| ShiftError::not_found("machine", machine_id))?;
                let operator_name = db::get_user(tx, &shift.operator_id)?
                    .map(|user| user.name)
                    .unwrap_or_else(|| shift.operator_id.clone());
                let archive = ProductionArchive::from_shift(&shift, &machine, operator_name, now);
                db::insert_archive(tx, &archive)?;

                let next_operator = db::latest_operator_for_machine(tx, machine_id)?;
                let new_shift = match &next_operator {
                    Some(operator_id) => {
                        Some(self.open_shift(tx, machine_id, operator_id, window, now)?)
                    }
                    None => None,
                };

                let draft = NotificationDraft {
                    notification_type: SHIFT_ROLLOVER,
                    title: format!("{} shift closed on {}", shift.shift_type.as_str(), machine.code),
                    message: format!(
                        "{} ({}) closed its {} shift with {} of {} produced.",
                        machine.name,
                        machine.code,
                        shift.shift_type.as_str(),
                        shift.total_production,
                        shift.target_production
                    ),
                    priority: NotificationPriority::Low,
                    metadata: serde_json::json!({
                        "machine_id": machine.id,
                        "machine_code": machine.code,
                        "archived_shift_id": shift.id,
                        "archive_id": archive.id,
                        "shift_type": shift.shift_type.as_str(),
                        "total_production": shift.total_production,
                        "efficiency": shift.efficiency,
                        "new_shift_id": new_shift.as_ref().map(|s| s.id.clone()),
                    }),
                };
                self.notify_roles(tx, &draft, now)?;

                tracing::info!(
                    machine_id,
                    shift_id = %shift.id,
                    archive_id = %archive.id,
                    new_shift_id = ?new_shift.as_ref().map(|s| s.id.as_str()),
                    "Shift archived"
                );

                Ok(MachineOutcome::RolledOver(RolledOverMachine {
                    machine_id: machine_id.to_string(),
                    archived_shift_id: shift.id,
                    archive_id: archive.id,
                    new_shift_id: new_shift.map(|s| s.id),
                    operator_id: next_operator,
                }))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::ProductionDelta;
    use crate::model::ShiftData;
    use crate::state::test_support::*;
    use std::sync::Arc;
    use std::thread;
    use zara_shiftd_protocol::{ShiftType, UserRole};

    fn produce(total: i64) -> ProductionDelta {
        ProductionDelta {
            total_production: total,
            downtime: 12,
            running_time: 300,
            target_production: Some(400),
        }
    }

    fn open_shifts(state: &SharedState, machine_id: &str) -> Vec<ShiftData> {
        state
            .db()
            .with_connection(|conn| db::list_shifts_for_machine(conn, machine_id))
            .expect("shifts")
            .into_iter()
            .filter(|shift| shift.is_active && !shift.is_archived)
            .collect()
    }

    #[test]
    fn archives_counters_and_opens_zeroed_shift() {
        let test = test_state();
        let state = &test.state;
        let admin = seed_user(state, "Admin", UserRole::Admin);
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);

        state
            .start_operation(&machine.id, &op.id, None, at("2026-03-10T06:10:00Z"))
            .expect("start");
        state
            .record_quality_test(&machine.id, &op.id, false, at("2026-03-10T08:00:00Z"))
            .expect("quality");
        let before = state
            .record_production(&machine.id, &op.id, produce(100), at("2026-03-10T13:00:00Z"))
            .expect("produce");

        let report = state
            .run_rollover(at("2026-03-10T14:00:00Z"))
            .expect("rollover");
        assert_eq!(report.window.shift_type, ShiftType::Afternoon);
        assert_eq!(report.rolled_over.len(), 1);
        assert!(report.deferred.is_empty());
        let rolled = &report.rolled_over[0];
        assert_eq!(rolled.archived_shift_id, before.id);
        assert_eq!(rolled.operator_id.as_deref(), Some(op.id.as_str()));

        let archives = state.list_archives(Some(&machine.id), 10).expect("archives");
        assert_eq!(archives.len(), 1);
        let archive = &archives[0];
        assert_eq!(archive.id, rolled.archive_id);
        assert_eq!(archive.shift_type, ShiftType::Morning);
        assert_eq!(archive.machine_code, "INJ-01");
        assert_eq!(archive.operator_name, "Ana");
        assert_eq!(archive.total_production, 100);
        assert_eq!(archive.target_production, before.target_production);
        assert_eq!(archive.efficiency, before.efficiency);
        assert_eq!(archive.downtime, before.downtime);
        assert_eq!(archive.running_time, before.running_time);
        assert_eq!(archive.quality_tests, 1);
        assert_eq!(archive.rejected_tests, 1);
        assert_eq!(archive.approved_tests, 0);

        let current = state
            .active_shift(&machine.id)
            .expect("query")
            .expect("new shift");
        assert_eq!(Some(current.id.clone()), rolled.new_shift_id);
        assert_eq!(current.total_production, 0);
        assert_eq!(current.shift_type, ShiftType::Afternoon);
        assert_eq!(current.shift_start, "2026-03-10T14:00:00.000Z");

        let notifications = state
            .db()
            .with_connection(|conn| db::list_notifications(conn, &admin.id, false, 10))
            .expect("inbox");
        assert!(notifications
            .iter()
            .any(|n| n.notification_type == SHIFT_ROLLOVER));
    }

    #[test]
    fn requested_time_ahead_of_clock_is_rejected() {
        let test = test_state();
        let state = &test.state;
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);
        let clock = at("2026-03-10T06:10:00Z");
        state
            .start_operation(&machine.id, &op.id, None, clock)
            .expect("start");
        let opened = state
            .record_production(&machine.id, &op.id, produce(5), clock)
            .expect("produce");

        let err = state
            .run_requested_rollover(Some(at("2030-01-01T15:00:00Z")), clock)
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");

        let current = state
            .active_shift(&machine.id)
            .expect("query")
            .expect("shift still open");
        assert_eq!(current.id, opened.id);
        assert!(state.list_archives(None, 10).expect("archives").is_empty());

        let later = at("2026-03-10T15:00:00Z");
        let skewed = state
            .run_requested_rollover(Some(later + Duration::seconds(30)), later)
            .expect("small skew allowed");
        assert_eq!(skewed.rolled_over.len(), 1);

        let past = state
            .run_requested_rollover(Some(at("2026-03-10T14:00:00Z")), later)
            .expect("past time allowed");
        assert_eq!(past.already_current, vec![machine.id.clone()]);
    }

    #[test]
    fn event_racing_rollover_lands_in_exactly_one_shift() {
        for _ in 0..10 {
            let test = test_state();
            let state = Arc::clone(&test.state);
            let machine = seed_machine(&state, "INJ-01");
            let op = seed_user(&state, "Ana", UserRole::Operator);
            state
                .start_operation(&machine.id, &op.id, None, at("2026-03-10T06:10:00Z"))
                .expect("start");
            let boundary = at("2026-03-10T14:00:00Z");

            let mut handles: Vec<_> = (0..8)
                .map(|_| {
                    let state = Arc::clone(&state);
                    let machine_id = machine.id.clone();
                    let operator_id = op.id.clone();
                    thread::spawn(move || {
                        state
                            .record_production(&machine_id, &operator_id, produce(1), boundary)
                            .expect("record");
                    })
                })
                .collect();
            handles.push({
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    let report = state.run_rollover(boundary).expect("rollover");
                    assert!(report.errors.is_empty());
                })
            });
            for handle in handles {
                handle.join().expect("join");
            }

            let archives = state.list_archives(Some(&machine.id), 10).expect("archives");
            assert_eq!(archives.len(), 1);
            let open = open_shifts(&state, &machine.id);
            assert_eq!(open.len(), 1);
            assert_eq!(open[0].shift_type, ShiftType::Afternoon);
            assert_eq!(archives[0].total_production + open[0].total_production, 8);
        }
    }

    #[test]
    fn second_run_with_same_now_is_a_noop() {
        let test = test_state();
        let state = &test.state;
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);
        state
            .start_operation(&machine.id, &op.id, None, at("2026-03-10T06:10:00Z"))
            .expect("start");

        let boundary = at("2026-03-10T14:00:00Z");
        let first = state.run_rollover(boundary).expect("first");
        assert_eq!(first.rolled_over.len(), 1);

        let second = state.run_rollover(boundary).expect("second");
        assert!(second.rolled_over.is_empty());
        assert_eq!(second.already_current, vec![machine.id.clone()]);

        assert_eq!(state.list_archives(None, 10).expect("archives").len(), 1);
        assert_eq!(open_shifts(state, &machine.id).len(), 1);
    }

    #[test]
    fn defers_new_shift_without_a_known_operator() {
        let test = test_state();
        let state = &test.state;
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);
        state
            .record_production(&machine.id, &op.id, produce(5), at("2026-03-10T07:00:00Z"))
            .expect("produce");

        let report = state
            .run_rollover(at("2026-03-10T14:30:00Z"))
            .expect("rollover");
        assert_eq!(report.deferred, vec![machine.id.clone()]);
        assert_eq!(report.rolled_over[0].new_shift_id, None);
        assert!(state.active_shift(&machine.id).expect("query").is_none());

        let reopened = state
            .record_production(&machine.id, &op.id, produce(2), at("2026-03-10T15:00:00Z"))
            .expect("produce again");
        assert_eq!(reopened.total_production, 2);
        assert_eq!(reopened.shift_type, ShiftType::Afternoon);
    }

    #[test]
    fn skips_shifts_whose_window_has_not_elapsed() {
        let test = test_state();
        let state = &test.state;
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);
        state
            .start_operation(&machine.id, &op.id, None, at("2026-03-10T14:10:00Z"))
            .expect("start");

        // Same window: already current.
        let report = state
            .run_rollover(at("2026-03-10T20:00:00Z"))
            .expect("rollover");
        assert_eq!(report.already_current, vec![machine.id.clone()]);

        // A clock behind the open shift never archives it.
        let report = state
            .run_rollover(at("2026-03-10T07:00:00Z"))
            .expect("rollover");
        assert_eq!(report.not_elapsed, vec![machine.id.clone()]);
        assert!(state.list_archives(None, 10).expect("archives").is_empty());
    }

    #[test]
    fn failure_on_one_machine_does_not_stop_the_batch() {
        let test = test_state();
        let state = &test.state;
        let broken = seed_machine(state, "INJ-01");
        let healthy = seed_machine(state, "INJ-02");
        let op = seed_user(state, "Ana", UserRole::Operator);
        let morning = at("2026-03-10T07:00:00Z");
        for machine in [&broken, &healthy] {
            state
                .start_operation(&machine.id, &op.id, None, morning)
                .expect("start");
        }
        state
            .db()
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE shift_data SET shift_end = 'garbage' WHERE machine_id = ?1",
                    [&broken.id],
                )
                .map_err(|err| ShiftError::storage("corrupt", err))
            })
            .expect("corrupt");

        let report = state
            .run_rollover(at("2026-03-10T14:00:00Z"))
            .expect("rollover");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].machine_id, broken.id);
        assert_eq!(report.errors[0].code, "storage_error");
        assert_eq!(report.rolled_over.len(), 1);
        assert_eq!(report.rolled_over[0].machine_id, healthy.id);

        // The broken machine's shift is untouched.
        assert_eq!(open_shifts(state, &broken.id).len(), 1);
    }

    #[test]
    fn keeps_one_open_shift_across_a_day_of_rollovers() {
        let test = test_state();
        let state = &test.state;
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);
        state
            .start_operation(&machine.id, &op.id, None, at("2026-03-10T06:00:00Z"))
            .expect("start");

        for now in [
            "2026-03-10T10:00:00Z",
            "2026-03-10T14:00:00Z",
            "2026-03-10T14:00:30Z",
            "2026-03-10T22:00:00Z",
            "2026-03-11T03:00:00Z",
            "2026-03-11T06:00:00Z",
        ] {
            state.run_rollover(at(now)).expect("rollover");
            assert_eq!(open_shifts(state, &machine.id).len(), 1, "at {}", now);
        }

        let archives = state.list_archives(Some(&machine.id), 10).expect("archives");
        assert_eq!(archives.len(), 3);
        // Newest first.
        assert_eq!(archives[0].shift_type, ShiftType::Night);
    }
}
