//! IPC protocol types and validation for zara-shiftd.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation (numeric ranges, entity
//! existence); the checks here only reject requests that are malformed on
//! the wire.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

const MAX_ID_LEN: usize = 128;
const MAX_CODE_LEN: usize = 64;
const MAX_NAME_LEN: usize = 200;
const MAX_NOTES_LEN: usize = 2000;
const MAX_LIST_LIMIT: usize = 1000;
/// Upper bound for a stuck-operation max age, on the wire and in config.
pub const MAX_SWEEP_AGE_HOURS: u32 = 24 * 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    RegisterMachine,
    RegisterUser,
    StartOperation,
    EndOperation,
    SetMachineStatus,
    RecordProduction,
    RecordQualityTest,
    RunRollover,
    SweepStuckOperations,
    GetActiveShifts,
    GetArchives,
    GetNotifications,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Domain enums
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStatus {
    Running,
    Stopped,
    Maintenance,
    Error,
    Testing,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Running => "RUNNING",
            MachineStatus::Stopped => "STOPPED",
            MachineStatus::Maintenance => "MAINTENANCE",
            MachineStatus::Error => "ERROR",
            MachineStatus::Testing => "TESTING",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "RUNNING" => Some(MachineStatus::Running),
            "STOPPED" => Some(MachineStatus::Stopped),
            "MAINTENANCE" => Some(MachineStatus::Maintenance),
            "ERROR" => Some(MachineStatus::Error),
            "TESTING" => Some(MachineStatus::Testing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Active,
    Completed,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Active => "ACTIVE",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(OperationStatus::Active),
            "COMPLETED" => Some(OperationStatus::Completed),
            "CANCELLED" => Some(OperationStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftType {
    Morning,
    Afternoon,
    Night,
}

impl ShiftType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftType::Morning => "MORNING",
            ShiftType::Afternoon => "AFTERNOON",
            ShiftType::Night => "NIGHT",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "MORNING" => Some(ShiftType::Morning),
            "AFTERNOON" => Some(ShiftType::Afternoon),
            "NIGHT" => Some(ShiftType::Night),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Manager,
    Leader,
    Operator,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Manager => "MANAGER",
            UserRole::Leader => "LEADER",
            UserRole::Operator => "OPERATOR",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "ADMIN" => Some(UserRole::Admin),
            "MANAGER" => Some(UserRole::Manager),
            "LEADER" => Some(UserRole::Leader),
            "OPERATOR" => Some(UserRole::Operator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "LOW",
            NotificationPriority::Medium => "MEDIUM",
            NotificationPriority::High => "HIGH",
            NotificationPriority::Urgent => "URGENT",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "LOW" => Some(NotificationPriority::Low),
            "MEDIUM" => Some(NotificationPriority::Medium),
            "HIGH" => Some(NotificationPriority::High),
            "URGENT" => Some(NotificationPriority::Urgent),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Method params
// ─────────────────────────────────────────────────────────────────────────────

/// Wire-level checks for a params payload.
pub trait Validate {
    fn validate(&self) -> Result<(), ErrorInfo>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterMachineParams {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl Validate for RegisterMachineParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_bounded(&self.code, "code", MAX_CODE_LEN)?;
        require_bounded(&self.name, "name", MAX_NAME_LEN)?;
        optional_bounded(&self.location, "location", MAX_NAME_LEN)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterUserParams {
    pub name: String,
    pub role: UserRole,
    #[serde(default)]
    pub email: Option<String>,
}

impl Validate for RegisterUserParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_bounded(&self.name, "name", MAX_NAME_LEN)?;
        if let Some(email) = &self.email {
            let email = email.trim();
            if email.len() > MAX_NAME_LEN || !email.contains('@') {
                return Err(ErrorInfo::new(
                    "invalid_value",
                    "email must be a valid address",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartOperationParams {
    pub machine_id: String,
    pub operator_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Validate for StartOperationParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.machine_id, "machine_id")?;
        require_id(&self.operator_id, "operator_id")?;
        optional_bounded(&self.notes, "notes", MAX_NOTES_LEN)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndOperationParams {
    pub operation_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Validate for EndOperationParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.operation_id, "operation_id")?;
        optional_bounded(&self.notes, "notes", MAX_NOTES_LEN)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetMachineStatusParams {
    pub machine_id: String,
    pub status: MachineStatus,
}

impl Validate for SetMachineStatusParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.machine_id, "machine_id")
    }
}

/// Production counters are signed on the wire so that a negative delta reaches
/// the daemon and is rejected there as a validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordProductionParams {
    pub machine_id: String,
    pub operator_id: String,
    pub total_production: i64,
    #[serde(default)]
    pub downtime: i64,
    #[serde(default)]
    pub running_time: i64,
    #[serde(default)]
    pub target_production: Option<i64>,
}

impl Validate for RecordProductionParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.machine_id, "machine_id")?;
        require_id(&self.operator_id, "operator_id")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordQualityTestParams {
    pub machine_id: String,
    pub operator_id: String,
    pub approved: bool,
}

impl Validate for RecordQualityTestParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.machine_id, "machine_id")?;
        require_id(&self.operator_id, "operator_id")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunRolloverParams {
    /// Evaluate boundaries as of this instant instead of the daemon clock.
    #[serde(default)]
    pub now: Option<String>,
}

impl RunRolloverParams {
    pub fn now_override(&self) -> Option<DateTime<Utc>> {
        self.now
            .as_deref()
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl Validate for RunRolloverParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        match &self.now {
            Some(value) if DateTime::parse_from_rfc3339(value).is_err() => Err(ErrorInfo::new(
                "invalid_timestamp",
                "now must be RFC3339",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepStuckOperationsParams {
    #[serde(default)]
    pub max_age_hours: Option<u32>,
}

impl Validate for SweepStuckOperationsParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        match self.max_age_hours {
            Some(0) => Err(ErrorInfo::new(
                "invalid_value",
                "max_age_hours must be greater than zero",
            )),
            Some(hours) if hours > MAX_SWEEP_AGE_HOURS => Err(ErrorInfo::new(
                "invalid_value",
                format!("max_age_hours must be {} or fewer", MAX_SWEEP_AGE_HOURS),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetActiveShiftsParams {
    /// Restricts the view to one machine.
    #[serde(default)]
    pub machine_id: Option<String>,
}

impl Validate for GetActiveShiftsParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        if let Some(machine_id) = &self.machine_id {
            require_id(machine_id, "machine_id")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetArchivesParams {
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl GetArchivesParams {
    pub fn effective_limit(&self) -> usize {
        clamp_limit(self.limit)
    }
}

impl Validate for GetArchivesParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        if let Some(machine_id) = &self.machine_id {
            require_id(machine_id, "machine_id")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetNotificationsParams {
    pub user_id: String,
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl GetNotificationsParams {
    pub fn effective_limit(&self) -> usize {
        clamp_limit(self.limit)
    }
}

impl Validate for GetNotificationsParams {
    fn validate(&self) -> Result<(), ErrorInfo> {
        require_id(&self.user_id, "user_id")
    }
}

/// Decodes and validates a params payload. A missing payload is treated as an
/// empty object so that methods whose params are all optional accept it.
pub fn parse_params<T>(params: Option<Value>) -> Result<T, ErrorInfo>
where
    T: DeserializeOwned + Validate,
{
    let value = params.unwrap_or_else(|| Value::Object(Default::default()));
    if !value.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }
    let parsed: T = serde_json::from_value(value)
        .map_err(|err| ErrorInfo::new("invalid_params", format!("params are invalid: {}", err)))?;
    parsed.validate()?;
    Ok(parsed)
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(100).clamp(1, MAX_LIST_LIMIT)
}

fn require_id(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_value",
            format!("{} must be {} characters or fewer", field, MAX_ID_LEN),
        ));
    }
    Ok(())
}

fn require_bounded(value: &str, field: &str, max: usize) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > max {
        return Err(ErrorInfo::new(
            "invalid_value",
            format!("{} must be {} characters or fewer", field, max),
        ));
    }
    Ok(())
}

fn optional_bounded(value: &Option<String>, field: &str, max: usize) -> Result<(), ErrorInfo> {
    match value {
        Some(candidate) if candidate.len() > max => Err(ErrorInfo::new(
            "invalid_value",
            format!("{} must be {} characters or fewer", field, max),
        )),
        _ => Ok(()),
    }
}
