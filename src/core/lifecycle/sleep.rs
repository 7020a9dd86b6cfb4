use chrono::Timelike;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Recurring hour range during which idle agents are parked `sleeping`
/// instead of `idle`. A window whose start is at or past its end wraps
/// midnight: `{22, 6}` covers hours 22..23 and 0..5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepSchedule {
    #[serde(rename = "startHour")]
    pub start_hour: u32,
    #[serde(rename = "endHour")]
    pub end_hour: u32,
    pub timezone: String,
    pub enabled: bool,
}

impl Default for SleepSchedule {
    fn default() -> Self {
        Self {
            start_hour: 22,
            end_hour: 6,
            timezone: "UTC".to_string(),
            enabled: false,
        }
    }
}

impl SleepSchedule {
    pub fn is_active_now(&self) -> bool {
        if !self.enabled {
            return false;
        }
        let tz: chrono_tz::Tz = match self.timezone.parse() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(
                    "sleep schedule has unknown timezone {:?}, falling back to UTC",
                    self.timezone
                );
                chrono_tz::UTC
            }
        };
        let hour = chrono::Utc::now().with_timezone(&tz).hour();
        self.contains_hour(hour)
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        if self.start_hour >= self.end_hour {
            hour >= self.start_hour || hour < self.end_hour
        } else {
            hour >= self.start_hour && hour < self.end_hour
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.start_hour > 24 || self.end_hour > 24 {
            return Err(format!(
                "hours must be within 0..=24, got start={} end={}",
                self.start_hour, self.end_hour
            ));
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(format!("unknown IANA timezone: {}", self.timezone));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: u32, end: u32) -> SleepSchedule {
        SleepSchedule {
            start_hour: start,
            end_hour: end,
            timezone: "UTC".into(),
            enabled: true,
        }
    }

    #[test]
    fn wrap_around_midnight() {
        let w = window(22, 6);
        for hour in [22, 23, 0, 1, 2, 3, 4, 5] {
            assert!(w.contains_hour(hour), "hour {hour} should sleep");
        }
        for hour in [6, 7, 12, 21] {
            assert!(!w.contains_hour(hour), "hour {hour} should be awake");
        }
    }

    #[test]
    fn plain_range_is_half_open() {
        let w = window(9, 17);
        assert!(w.contains_hour(9));
        assert!(w.contains_hour(16));
        assert!(!w.contains_hour(17));
        assert!(!w.contains_hour(8));
    }

    #[test]
    fn full_day_window_matches_every_hour() {
        let w = window(0, 24);
        for hour in 0..24 {
            assert!(w.contains_hour(hour));
        }
        assert!(w.is_active_now());
    }

    #[test]
    fn disabled_schedule_is_never_active() {
        let mut w = window(0, 24);
        w.enabled = false;
        assert!(!w.is_active_now());
    }

    #[test]
    fn validation_rejects_bad_hours_and_zones() {
        assert!(window(25, 6).validate().is_err());
        let mut w = window(22, 6);
        w.timezone = "Mars/Olympus".into();
        assert!(w.validate().is_err());
        assert!(window(22, 6).validate().is_ok());
    }

    #[test]
    fn named_zone_parses() {
        let mut w = window(22, 6);
        w.timezone = "America/New_York".into();
        assert!(w.validate().is_ok());
    }
}
