//! Runtime configuration for zara-shiftd.
//!
//! Loaded from `~/.zara/shiftd.toml` (or `ZARA_SHIFTD_CONFIG`). Every section
//! is optional; a missing file yields the defaults below.

use serde::Deserialize;
use std::path::PathBuf;
use zara_shiftd_protocol::{ShiftType, UserRole, MAX_SWEEP_AGE_HOURS};

use crate::schedule::ShiftSchedule;

const CONFIG_ENV: &str = "ZARA_SHIFTD_CONFIG";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ShiftdConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub production: ProductionConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_shifts")]
    pub shifts: Vec<ShiftBoundaryConfig>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            shifts: default_shifts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ShiftBoundaryConfig {
    pub shift_type: ShiftType,
    /// Local wall-clock start, "HH:MM".
    pub start: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductionConfig {
    #[serde(default = "default_target")]
    pub default_target: i64,
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            default_target: default_target(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_rollover_interval")]
    pub rollover_interval_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_stuck_age")]
    pub stuck_operation_max_age_hours: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            rollover_interval_secs: default_rollover_interval(),
            sweep_interval_secs: default_sweep_interval(),
            stuck_operation_max_age_hours: default_stuck_age(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_roles")]
    pub roles: Vec<UserRole>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            roles: default_roles(),
        }
    }
}

fn default_shifts() -> Vec<ShiftBoundaryConfig> {
    vec![
        ShiftBoundaryConfig {
            shift_type: ShiftType::Morning,
            start: "06:00".to_string(),
        },
        ShiftBoundaryConfig {
            shift_type: ShiftType::Afternoon,
            start: "14:00".to_string(),
        },
        ShiftBoundaryConfig {
            shift_type: ShiftType::Night,
            start: "22:00".to_string(),
        },
    ]
}

fn default_target() -> i64 {
    1000
}

fn default_rollover_interval() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_stuck_age() -> u32 {
    24
}

fn default_roles() -> Vec<UserRole> {
    vec![UserRole::Admin, UserRole::Manager]
}

impl ShiftdConfig {
    pub fn validate(&self) -> Result<(), String> {
        ShiftSchedule::from_config(&self.schedule)?;
        if self.production.default_target <= 0 {
            return Err("production.default_target must be positive".to_string());
        }
        if self.jobs.rollover_interval_secs == 0 || self.jobs.sweep_interval_secs == 0 {
            return Err("job intervals must be at least one second".to_string());
        }
        if self.jobs.stuck_operation_max_age_hours == 0 {
            return Err("jobs.stuck_operation_max_age_hours must be positive".to_string());
        }
        if self.jobs.stuck_operation_max_age_hours > MAX_SWEEP_AGE_HOURS {
            return Err(format!(
                "jobs.stuck_operation_max_age_hours must be {} or fewer",
                MAX_SWEEP_AGE_HOURS
            ));
        }
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".zara").join("shiftd.toml"))
}

pub fn load_config(path: Option<PathBuf>) -> Result<ShiftdConfig, String> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(ShiftdConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| {
        format!(
            "Failed to read config {}: {}",
            config_path.display(),
            err
        )
    })?;
    let config = toml::from_str::<ShiftdConfig>(&content).map_err(|err| {
        format!(
            "Failed to parse config {}: {}",
            config_path.display(),
            err
        )
    })?;
    config
        .validate()
        .map_err(|err| format!("Invalid config {}: {}", config_path.display(), err))?;
    Ok(config)
}
