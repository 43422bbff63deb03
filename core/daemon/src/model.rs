//! Records persisted by the daemon.
//!
//! Records reference each other by id only. Timestamps are RFC3339 UTC
//! strings with millisecond precision so that SQL string comparison matches
//! chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use zara_shiftd_protocol::{
    MachineStatus, NotificationPriority, OperationStatus, ShiftType, UserRole,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Machine {
    pub id: String,
    pub code: String,
    pub name: String,
    pub location: Option<String>,
    pub status: MachineStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineOperation {
    pub id: String,
    pub machine_id: String,
    pub operator_id: String,
    pub status: OperationStatus,
    pub start_time: String,
    pub end_time: Option<String>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShiftData {
    pub id: String,
    pub machine_id: String,
    pub operator_id: String,
    pub shift_type: ShiftType,
    pub shift_start: String,
    pub shift_end: String,
    pub total_production: i64,
    pub target_production: i64,
    pub efficiency: f64,
    pub downtime: i64,
    pub running_time: i64,
    pub quality_tests: i64,
    pub approved_tests: i64,
    pub rejected_tests: i64,
    pub is_active: bool,
    pub is_archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductionArchive {
    pub id: String,
    pub shift_data_id: String,
    pub machine_id: String,
    pub machine_code: String,
    pub machine_name: String,
    pub operator_id: String,
    pub operator_name: String,
    pub shift_type: ShiftType,
    pub shift_start: String,
    pub shift_end: String,
    pub total_production: i64,
    pub target_production: i64,
    pub efficiency: f64,
    pub downtime: i64,
    pub running_time: i64,
    pub quality_tests: i64,
    pub approved_tests: i64,
    pub rejected_tests: i64,
    pub archived_at: String,
}

impl ProductionArchive {
    /// Snapshot of a closing shift. Counters are copied verbatim.
    pub fn from_shift(
        shift: &ShiftData,
        machine: &Machine,
        operator_name: String,
        archived_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            shift_data_id: shift.id.clone(),
            machine_id: machine.id.clone(),
            machine_code: machine.code.clone(),
            machine_name: machine.name.clone(),
            operator_id: shift.operator_id.clone(),
            operator_name,
            shift_type: shift.shift_type,
            shift_start: shift.shift_start.clone(),
            shift_end: shift.shift_end.clone(),
            total_production: shift.total_production,
            target_production: shift.target_production,
            efficiency: shift.efficiency,
            downtime: shift.downtime,
            running_time: shift.running_time,
            quality_tests: shift.quality_tests,
            approved_tests: shift.approved_tests,
            rejected_tests: shift.rejected_tests,
            archived_at: format_timestamp(archived_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub read: bool,
    pub metadata: Value,
    pub created_at: String,
}

pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_lexically() {
        let early = Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        let early_text = format_timestamp(early);
        let late_text = format_timestamp(late);
        assert_eq!(early_text, "2026-03-09T23:59:59.000Z");
        assert!(early_text < late_text);
        assert_eq!(parse_timestamp(&late_text), Some(late));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_id(), new_id());
    }
}
