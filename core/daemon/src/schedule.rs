//! Shift boundary table.
//!
//! Maps a wall-clock instant to the shift window containing it. Boundaries
//! are local times at a fixed UTC offset; each window runs from its boundary
//! to the next one, wrapping past midnight.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use zara_shiftd_protocol::ShiftType;

use crate::config::ScheduleConfig;

const MAX_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShiftWindow {
    pub shift_type: ShiftType,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Boundary {
    shift_type: ShiftType,
    start: NaiveTime,
}

#[derive(Debug, Clone)]
pub struct ShiftSchedule {
    offset: FixedOffset,
    /// Sorted by `start`, non-empty.
    boundaries: Vec<Boundary>,
}

impl ShiftSchedule {
    pub fn new(utc_offset_minutes: i32, shifts: &[(ShiftType, NaiveTime)]) -> Result<Self, String> {
        if utc_offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(format!(
                "utc_offset_minutes must be within ±{}",
                MAX_OFFSET_MINUTES
            ));
        }
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .ok_or_else(|| format!("Invalid UTC offset: {} minutes", utc_offset_minutes))?;

        if shifts.is_empty() {
            return Err("schedule must define at least one shift".to_string());
        }

        let mut boundaries: Vec<Boundary> = shifts
            .iter()
            .map(|(shift_type, start)| Boundary {
                shift_type: *shift_type,
                start: *start,
            })
            .collect();
        boundaries.sort_by_key(|boundary| boundary.start);

        for pair in boundaries.windows(2) {
            if pair[0].start == pair[1].start {
                return Err(format!(
                    "shifts {} and {} share start time {}",
                    pair[0].shift_type.as_str(),
                    pair[1].shift_type.as_str(),
                    pair[0].start.format("%H:%M")
                ));
            }
        }
        for (index, boundary) in boundaries.iter().enumerate() {
            if boundaries[index + 1..]
                .iter()
                .any(|other| other.shift_type == boundary.shift_type)
            {
                return Err(format!(
                    "shift type {} is listed more than once",
                    boundary.shift_type.as_str()
                ));
            }
        }

        Ok(Self { offset, boundaries })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self, String> {
        let mut shifts = Vec::with_capacity(config.shifts.len());
        for shift in &config.shifts {
            let start = NaiveTime::parse_from_str(shift.start.trim(), "%H:%M").map_err(|err| {
                format!(
                    "Invalid start time {:?} for {}: {}",
                    shift.start,
                    shift.shift_type.as_str(),
                    err
                )
            })?;
            shifts.push((shift.shift_type, start));
        }
        Self::new(config.utc_offset_minutes, &shifts)
    }

    pub fn window_at(&self, now: DateTime<Utc>) -> ShiftWindow {
        let local = now.with_timezone(&self.offset).naive_local();
        let time = local.time();
        let last = self.boundaries.len() - 1;

        let (start_date, index) = match self
            .boundaries
            .iter()
            .rposition(|boundary| boundary.start <= time)
        {
            Some(index) => (local.date(), index),
            // Before the first boundary of the day: still in yesterday's last shift.
            None => (local.date() - Duration::days(1), last),
        };

        let starts_local = start_date.and_time(self.boundaries[index].start);
        let ends_local = if index < last {
            start_date.and_time(self.boundaries[index + 1].start)
        } else {
            (start_date + Duration::days(1)).and_time(self.boundaries[0].start)
        };

        ShiftWindow {
            shift_type: self.boundaries[index].shift_type,
            starts_at: self.to_utc(starts_local),
            ends_at: self.to_utc(ends_local),
        }
    }

    fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }
}
