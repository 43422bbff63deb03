//! Operation tracker.
//!
//! Starts and ends machine operations, drives machine status, and cancels
//! operations that were never ended.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use zara_shiftd_protocol::{MachineStatus, NotificationPriority, OperationStatus};

use crate::db;
use crate::error::{Result, ShiftError};
use crate::model::{format_timestamp, new_id, Machine, MachineOperation};
use crate::notify::{NotificationDraft, MACHINE_STATUS_CHANGE, STUCK_OPERATION_CANCELLED};
use crate::state::SharedState;

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub ran_at: String,
    pub max_age_hours: i64,
    pub cancelled: Vec<MachineOperation>,
    pub errors: Vec<SweepFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub operation_id: String,
    pub machine_id: String,
    pub code: &'static str,
    pub message: String,
}

impl SharedState {
    pub fn start_operation(
        &self,
        machine_id: &str,
        operator_id: &str,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MachineOperation> {
        let operation = self.locks().with_machine(machine_id, || {
            self.db().with_transaction(|tx| {
                let machine = db::get_machine(tx, machine_id)?
                    .ok_or_else(|| ShiftError::not_found("machine", machine_id))?;
                let operator = db::get_user(tx, operator_id)?
                    .ok_or_else(|| ShiftError::not_found("operator", operator_id))?;
                if !operator.is_active {
                    return Err(ShiftError::Validation(format!(
                        "operator {} is inactive",
                        operator_id
                    )));
                }
                if let Some(active) = db::active_operation_for_machine(tx, machine_id)? {
                    return Err(ShiftError::Conflict(format!(
                        "machine {} already has active operation {}",
                        machine.code, active.id
                    )));
                }

                let operation = MachineOperation {
                    id: new_id(),
                    machine_id: machine_id.to_string(),
                    operator_id: operator_id.to_string(),
                    status: OperationStatus::Active,
                    start_time: format_timestamp(now),
                    end_time: None,
                    notes: append_note("", notes.unwrap_or_default()),
                };
                db::insert_operation(tx, &operation)?;
                self.transition_machine(tx, &machine, MachineStatus::Running, now)?;

                if db::active_shift_for_machine(tx, machine_id)?.is_none() {
                    let window = self.schedule().window_at(now);
                    self.open_shift(tx, machine_id, operator_id, &window, now)?;
                }
                Ok(operation)
            })
        })?;

        tracing::info!(
            operation_id = %operation.id,
            machine_id,
            operator_id,
            "Operation started"
        );
        Ok(operation)
    }

    /// Completes an ACTIVE operation. Machine status is left as is.
    pub fn end_operation(
        &self,
        operation_id: &str,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MachineOperation> {
        let existing = self
            .db()
            .with_connection(|conn| db::get_operation(conn, operation_id))?
            .filter(|operation| operation.status == OperationStatus::Active)
            .ok_or_else(|| ShiftError::not_found("active operation", operation_id))?;

        let operation = self.locks().with_machine(&existing.machine_id, || {
            self.db().with_transaction(|tx| {
                let current = db::get_operation(tx, operation_id)?
                    .filter(|operation| operation.status == OperationStatus::Active)
                    .ok_or_else(|| ShiftError::not_found("active operation", operation_id))?;

                let notes = append_note(&current.notes, notes.unwrap_or_default());
                let end_time = format_timestamp(now);
                if !db::close_operation(
                    tx,
                    operation_id,
                    OperationStatus::Completed,
                    &end_time,
                    &notes,
                )? {
                    return Err(ShiftError::not_found("active operation", operation_id));
                }

                Ok(MachineOperation {
                    status: OperationStatus::Completed,
                    end_time: Some(end_time),
                    notes,
                    ..current
                })
            })
        })?;

        tracing::info!(
            operation_id,
            machine_id = %operation.machine_id,
            "Operation ended"
        );
        Ok(operation)
    }

    /// Cancels ACTIVE operations that started strictly before `now - max_age`
    /// and stops their machines. One failing operation does not stop the
    /// sweep.
    pub fn sweep_stuck_operations(&self, max_age: Duration, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = now.checked_sub_signed(max_age).ok_or_else(|| {
            ShiftError::Validation(format!(
                "max age of {}h reaches past the representable time range",
                max_age.num_hours()
            ))
        })?;
        let cutoff = format_timestamp(cutoff);
        let candidates = self
            .db()
            .with_connection(|conn| db::list_active_operations_started_before(conn, &cutoff))?;

        let mut report = SweepReport {
            ran_at: format_timestamp(now),
            max_age_hours: max_age.num_hours(),
            cancelled: Vec::new(),
            errors: Vec::new(),
        };

        for candidate in candidates {
            match self.cancel_stuck_operation(&candidate, max_age, now) {
                Ok(Some(cancelled)) => {
                    tracing::warn!(
                        operation_id = %cancelled.id,
                        machine_id = %cancelled.machine_id,
                        started_at = %cancelled.start_time,
                        "Stuck operation cancelled"
                    );
                    report.cancelled.push(cancelled);
                }
                Ok(None) => {
                    tracing::debug!(
                        operation_id = %candidate.id,
                        "Operation ended before it could be cancelled"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        operation_id = %candidate.id,
                        machine_id = %candidate.machine_id,
                        "Failed to cancel stuck operation"
                    );
                    report.errors.push(SweepFailure {
                        operation_id: candidate.id.clone(),
                        machine_id: candidate.machine_id.clone(),
                        code: err.code(),
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    pub fn set_machine_status(
        &self,
        machine_id: &str,
        status: MachineStatus,
        now: DateTime<Utc>,
    ) -> Result<Machine> {
        self.locks().with_machine(machine_id, || {
            self.db().with_transaction(|tx| {
                let machine = db::get_machine(tx, machine_id)?
                    .ok_or_else(|| ShiftError::not_found("machine", machine_id))?;
                self.transition_machine(tx, &machine, status, now)
            })
        })
    }

    fn cancel_stuck_operation(
        &self,
        candidate: &MachineOperation,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<MachineOperation>> {
        self.locks().with_machine(&candidate.machine_id, || {
            self.db().with_transaction(|tx| {
                let current = match db::get_operation(tx, &candidate.id)? {
                    Some(operation) if operation.status == OperationStatus::Active => operation,
                    _ => return Ok(None),
                };

                let diagnostic = format!(
                    "Auto-cancelled: operation exceeded {}h without being ended",
                    max_age.num_hours()
                );
                let notes = append_note(&current.notes, &diagnostic);
                let end_time = format_timestamp(now);
                if !db::close_operation(
                    tx,
                    &current.id,
                    OperationStatus::Cancelled,
                    &end_time,
                    &notes,
                )? {
                    return Ok(None);
                }

                let machine = db::get_machine(tx, &current.machine_id)?
                    .ok_or_else(|| ShiftError::not_found("machine", current.machine_id.clone()))?;
                db::set_machine_status(tx, &machine.id, MachineStatus::Stopped, &end_time)?;

                let draft = NotificationDraft {
                    notification_type: STUCK_OPERATION_CANCELLED,
                    title: format!("Operation cancelled on {}", machine.code),
                    message: format!(
                        "Operation on {} ({}) ran for more than {}h without being ended and was cancelled; the machine is now STOPPED.",
                        machine.name,
                        machine.code,
                        max_age.num_hours()
                    ),
                    priority: NotificationPriority::High,
                    metadata: serde_json::json!({
                        "operation_id": current.id,
                        "machine_id": machine.id,
                        "machine_code": machine.code,
                        "operator_id": current.operator_id,
                        "started_at": current.start_time,
                        "max_age_hours": max_age.num_hours(),
                        "from": machine.status.as_str(),
                        "to": MachineStatus::Stopped.as_str(),
                    }),
                };
                self.notify_roles(tx, &draft, now)?;

                Ok(Some(MachineOperation {
                    status: OperationStatus::Cancelled,
                    end_time: Some(end_time),
                    notes,
                    ..current
                }))
            })
        })
    }

    /// Writes a status change and notifies. Unchanged status is a no-op.
    fn transition_machine(
        &self,
        conn: &Connection,
        machine: &Machine,
        to: MachineStatus,
        now: DateTime<Utc>,
    ) -> Result<Machine> {
        if machine.status == to {
            return Ok(machine.clone());
        }

        let updated_at = format_timestamp(now);
        db::set_machine_status(conn, &machine.id, to, &updated_at)?;

        let draft = NotificationDraft {
            notification_type: MACHINE_STATUS_CHANGE,
            title: format!("{} is now {}", machine.code, to.as_str()),
            message: format!(
                "Machine {} ({}) changed from {} to {}.",
                machine.name,
                machine.code,
                machine.status.as_str(),
                to.as_str()
            ),
            priority: status_priority(to),
            metadata: serde_json::json!({
                "machine_id": machine.id,
                "machine_code": machine.code,
                "from": machine.status.as_str(),
                "to": to.as_str(),
            }),
        };
        self.notify_roles(conn, &draft, now)?;

        tracing::info!(
            machine_id = %machine.id,
            from = machine.status.as_str(),
            to = to.as_str(),
            "Machine status changed"
        );
        Ok(Machine {
            status: to,
            updated_at,
            ..machine.clone()
        })
    }
}

fn status_priority(status: MachineStatus) -> NotificationPriority {
    match status {
        MachineStatus::Error => NotificationPriority::High,
        MachineStatus::Maintenance | MachineStatus::Testing => NotificationPriority::Medium,
        MachineStatus::Running | MachineStatus::Stopped => NotificationPriority::Low,
    }
}

/// Appends `note` on its own line. Blank notes leave `existing` unchanged.
fn append_note(existing: &str, note: &str) -> String {
    let note = note.trim();
    if note.is_empty() {
        existing.to_string()
    } else if existing.is_empty() {
        note.to_string()
    } else {
        format!("{}\n{}", existing, note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::*;
    use zara_shiftd_protocol::UserRole;

    fn inbox(state: &SharedState, user_id: &str) -> Vec<crate::model::Notification> {
        state
            .db()
            .with_connection(|conn| db::list_notifications(conn, user_id, false, 100))
            .expect("inbox")
    }

    fn machine_status(state: &SharedState, machine_id: &str) -> MachineStatus {
        state
            .db()
            .with_connection(|conn| db::get_machine(conn, machine_id))
            .expect("query")
            .expect("machine")
            .status
    }

    #[test]
    fn start_runs_machine_and_opens_shift() {
        let test = test_state();
        let state = &test.state;
        let admin = seed_user(state, "Admin", UserRole::Admin);
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);

        let operation = state
            .start_operation(&machine.id, &op.id, Some("setup molde 12"), at("2026-03-10T06:30:00Z"))
            .expect("start");
        assert_eq!(operation.status, OperationStatus::Active);
        assert_eq!(operation.notes, "setup molde 12");
        assert_eq!(machine_status(state, &machine.id), MachineStatus::Running);

        let shift = state
            .active_shift(&machine.id)
            .expect("query")
            .expect("shift opened");
        assert_eq!(shift.operator_id, op.id);

        let notifications = inbox(state, &admin.id);
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].notification_type, MACHINE_STATUS_CHANGE);
        assert_eq!(notifications[0].metadata["from"], "STOPPED");
        assert_eq!(notifications[0].metadata["to"], "RUNNING");
    }

    #[test]
    fn second_start_conflicts() {
        let test = test_state();
        let state = &test.state;
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);
        let now = at("2026-03-10T06:30:00Z");

        state
            .start_operation(&machine.id, &op.id, None, now)
            .expect("start");
        let err = state
            .start_operation(&machine.id, &op.id, None, now)
            .unwrap_err();
        assert!(matches!(err, ShiftError::Conflict(_)));
    }

    #[test]
    fn start_rejects_unknown_and_inactive_operators() {
        let test = test_state();
        let state = &test.state;
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);
        let now = at("2026-03-10T06:30:00Z");

        let err = state
            .start_operation("missing", &op.id, None, now)
            .unwrap_err();
        assert!(matches!(err, ShiftError::NotFound { entity: "machine", .. }));

        state
            .db()
            .with_connection(|conn| {
                conn.execute("UPDATE users SET is_active = 0 WHERE id = ?1", [&op.id])
                    .map_err(|err| ShiftError::storage("deactivate", err))
            })
            .expect("deactivate");
        let err = state
            .start_operation(&machine.id, &op.id, None, now)
            .unwrap_err();
        assert!(matches!(err, ShiftError::Validation(_)));
    }

    #[test]
    fn start_on_running_machine_does_not_notify() {
        let test = test_state();
        let state = &test.state;
        let admin = seed_user(state, "Admin", UserRole::Admin);
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);
        let now = at("2026-03-10T06:30:00Z");

        let first = state
            .start_operation(&machine.id, &op.id, None, now)
            .expect("start");
        state.end_operation(&first.id, None, now).expect("end");
        state
            .start_operation(&machine.id, &op.id, None, now)
            .expect("restart");

        assert_eq!(inbox(state, &admin.id).len(), 1);
    }

    #[test]
    fn end_appends_notes_and_keeps_machine_running() {
        let test = test_state();
        let state = &test.state;
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);

        let started = state
            .start_operation(&machine.id, &op.id, Some("lote 7"), at("2026-03-10T06:30:00Z"))
            .expect("start");
        let ended = state
            .end_operation(&started.id, Some("sem ocorrencias"), at("2026-03-10T09:00:00Z"))
            .expect("end");

        assert_eq!(ended.status, OperationStatus::Completed);
        assert_eq!(ended.end_time.as_deref(), Some("2026-03-10T09:00:00.000Z"));
        assert_eq!(ended.notes, "lote 7\nsem ocorrencias");
        assert_eq!(machine_status(state, &machine.id), MachineStatus::Running);

        let err = state
            .end_operation(&started.id, None, at("2026-03-10T09:01:00Z"))
            .unwrap_err();
        assert!(matches!(err, ShiftError::NotFound { .. }));
    }

    #[test]
    fn sweep_respects_age_boundary() {
        let test = test_state();
        let state = &test.state;
        let admin = seed_user(state, "Admin", UserRole::Admin);
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);
        let started_at = at("2026-03-10T06:00:00Z");
        let max_age = Duration::hours(24);

        let operation = state
            .start_operation(&machine.id, &op.id, None, started_at)
            .expect("start");

        for hours in [23, 24] {
            let report = state
                .sweep_stuck_operations(max_age, started_at + Duration::hours(hours))
                .expect("sweep");
            assert!(report.cancelled.is_empty(), "cancelled at T+{}h", hours);
        }
        assert_eq!(machine_status(state, &machine.id), MachineStatus::Running);

        let report = state
            .sweep_stuck_operations(max_age, started_at + Duration::hours(25))
            .expect("sweep");
        assert_eq!(report.cancelled.len(), 1);
        let cancelled = &report.cancelled[0];
        assert_eq!(cancelled.id, operation.id);
        assert_eq!(cancelled.status, OperationStatus::Cancelled);
        assert_eq!(
            cancelled.notes,
            "Auto-cancelled: operation exceeded 24h without being ended"
        );
        assert_eq!(machine_status(state, &machine.id), MachineStatus::Stopped);

        let stored = state
            .db()
            .with_connection(|conn| db::get_operation(conn, &operation.id))
            .expect("query")
            .expect("operation");
        assert_eq!(stored.status, OperationStatus::Cancelled);

        let notifications = inbox(state, &admin.id);
        let stuck = notifications
            .iter()
            .find(|n| n.notification_type == STUCK_OPERATION_CANCELLED)
            .expect("stuck notification");
        assert_eq!(stuck.priority, NotificationPriority::High);
        assert_eq!(stuck.metadata["operation_id"], operation.id.as_str());
        assert_eq!(stuck.metadata["from"], "RUNNING");
        assert_eq!(stuck.metadata["to"], "STOPPED");

        let again = state
            .sweep_stuck_operations(max_age, started_at + Duration::hours(26))
            .expect("sweep again");
        assert!(again.cancelled.is_empty());
        assert!(again.errors.is_empty());
    }

    #[test]
    fn sweep_rejects_age_beyond_time_range() {
        let test = test_state();
        let state = &test.state;
        let machine = seed_machine(state, "INJ-01");
        let op = seed_user(state, "Ana", UserRole::Operator);
        let now = at("2026-03-10T06:00:00Z");
        state
            .start_operation(&machine.id, &op.id, None, now)
            .expect("start");

        let err = state
            .sweep_stuck_operations(Duration::hours(i64::from(u32::MAX)), now)
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert_eq!(machine_status(state, &machine.id), MachineStatus::Running);
    }

    #[test]
    fn set_status_is_noop_when_unchanged() {
        let test = test_state();
        let state = &test.state;
        let admin = seed_user(state, "Admin", UserRole::Admin);
        let machine = seed_machine(state, "INJ-01");
        let now = at("2026-03-10T10:00:00Z");

        let same = state
            .set_machine_status(&machine.id, MachineStatus::Stopped, now)
            .expect("noop");
        assert_eq!(same.status, MachineStatus::Stopped);
        assert!(inbox(state, &admin.id).is_empty());

        let updated = state
            .set_machine_status(&machine.id, MachineStatus::Maintenance, now)
            .expect("maintenance");
        assert_eq!(updated.status, MachineStatus::Maintenance);
        let notifications = inbox(state, &admin.id);
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].priority, NotificationPriority::Medium);

        let err = state
            .set_machine_status("missing", MachineStatus::Running, now)
            .unwrap_err();
        assert!(matches!(err, ShiftError::NotFound { .. }));
    }

    #[test]
    fn notes_are_appended_on_new_lines() {
        assert_eq!(append_note("", "  "), "");
        assert_eq!(append_note("", "a"), "a");
        assert_eq!(append_note("a", " b "), "a\nb");
    }
}
