use crate::error::{ConfigError, Error};
use crate::schedule::WardClock;
use chrono::{FixedOffset, NaiveTime, TimeDelta};
use serde::Deserialize;

const MAX_MISSED_GRACE_DAYS: i64 = 7;

///
/// Ward clock settings
///
/// `anchor` is the local time of day that fixed-frequency schedules align to.
/// Calendar days, including the day a progress note applies to, are resolved in `utc_offset_minutes`.
///
#[derive(Clone, Debug, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "ScheduleConfig::default_anchor")]
    pub anchor: String,

    #[serde(default)]
    pub utc_offset_minutes: i32,

    #[serde(default = "ScheduleConfig::default_missed_grace_minutes")]
    pub missed_grace_minutes: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            anchor: ScheduleConfig::default_anchor(),
            utc_offset_minutes: 0,
            missed_grace_minutes: ScheduleConfig::default_missed_grace_minutes(),
        }
    }
}

impl ScheduleConfig {
    pub fn default_anchor() -> String {
        "06:00".to_string()
    }

    pub const fn default_missed_grace_minutes() -> i64 {
        60
    }

    pub fn anchor(&self) -> Result<NaiveTime, Error> {
        NaiveTime::parse_from_str(self.anchor.trim(), "%H:%M").map_err(|_| {
            ConfigError::InvalidAnchorTime {
                value: self.anchor.to_owned(),
            }
            .into()
        })
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, Error> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ConfigError::InvalidUtcOffset {
                    minutes: self.utc_offset_minutes,
                }
                .into()
            })
    }

    pub fn clock(&self) -> Result<WardClock, Error> {
        Ok(WardClock::new(self.anchor()?, self.utc_offset()?))
    }

    /// Negative values are treated as no grace
    pub fn missed_grace(&self) -> Result<TimeDelta, Error> {
        TimeDelta::try_minutes(self.missed_grace_minutes.max(0))
            .filter(|grace| *grace <= TimeDelta::days(MAX_MISSED_GRACE_DAYS))
            .ok_or_else(|| {
                ConfigError::InvalidParameter {
                    name: "schedule.missed_grace_minutes".to_string(),
                    value: self.missed_grace_minutes.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_is_parsed_as_hours_and_minutes() {
        let config = ScheduleConfig {
            anchor: "08:30".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.anchor().unwrap(),
            NaiveTime::from_hms_opt(8, 30, 0).unwrap()
        );
    }

    #[test]
    fn invalid_anchor_is_a_config_error() {
        let config = ScheduleConfig {
            anchor: "25:00".to_string(),
            ..Default::default()
        };
        let err = config.clock().unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidAnchorTime { .. })
        ));
    }

    #[test]
    fn utc_offset_out_of_range_is_a_config_error() {
        let config = ScheduleConfig {
            utc_offset_minutes: 24 * 60,
            ..Default::default()
        };
        assert!(matches!(
            config.utc_offset().unwrap_err(),
            Error::Config(ConfigError::InvalidUtcOffset { minutes: 1440 })
        ));
    }

    #[test]
    fn negative_grace_is_clamped() {
        let config = ScheduleConfig {
            missed_grace_minutes: -5,
            ..Default::default()
        };
        assert_eq!(config.missed_grace().unwrap(), TimeDelta::zero());
    }

    #[test]
    fn absurd_values_are_config_errors() {
        let config = ScheduleConfig {
            utc_offset_minutes: i32::MAX,
            missed_grace_minutes: i64::MAX,
            ..Default::default()
        };

        assert!(matches!(
            config.utc_offset().unwrap_err(),
            Error::Config(ConfigError::InvalidUtcOffset { minutes: i32::MAX })
        ));
        assert!(matches!(
            config.missed_grace().unwrap_err(),
            Error::Config(ConfigError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn grace_of_a_week_is_accepted() {
        let config = ScheduleConfig {
            missed_grace_minutes: 7 * 24 * 60,
            ..Default::default()
        };
        assert_eq!(config.missed_grace().unwrap(), TimeDelta::days(7));
    }
}
