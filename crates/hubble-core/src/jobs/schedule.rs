//! When a scheduler wakes

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{HubError, HubResult};

/// Wake cadence of a [`super::JobScheduler`]
#[derive(Debug, Clone)]
pub enum Schedule {
    Cron(Box<cron::Schedule>),
    Interval(Duration),
    /// Never wakes
    Disabled,
}

impl Schedule {
    /// Parse a cron expression
    ///
    /// Five fields (`min hour dom month dow`) run at second zero; six or
    /// seven fields are taken as is, seconds first.
    pub fn cron(expr: &str) -> HubResult<Self> {
        let expr = expr.trim();
        let normalized = match expr.split_whitespace().count() {
            5 => format!("0 {}", expr),
            6 | 7 => expr.to_string(),
            n => {
                return Err(HubError::invalid_param(format!(
                    "cron expression must have 5 to 7 fields, got {}: {}",
                    n, expr
                )))
            }
        };
        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            HubError::invalid_param(format!("invalid cron expression {}: {}", expr, e))
        })?;
        Ok(Schedule::Cron(Box::new(schedule)))
    }

    /// Like [`Schedule::cron`], but `disabled` or an empty string disables
    pub fn parse(text: &str) -> HubResult<Self> {
        match text.trim() {
            "" | "disabled" | "off" => Ok(Schedule::Disabled),
            expr => Self::cron(expr),
        }
    }

    pub fn interval(every: Duration) -> HubResult<Self> {
        if every.is_zero() {
            return Err(HubError::invalid_param("interval must not be zero"));
        }
        Ok(Schedule::Interval(every))
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Schedule::Disabled)
    }

    /// Time from `now` until the next wake, `None` if there is none
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Schedule::Cron(schedule) => {
                let next = schedule.after(&now).next()?;
                Some((next - now).to_std().unwrap_or(Duration::ZERO))
            }
            Schedule::Interval(every) => Some(*every),
            Schedule::Disabled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_field_cron_runs_on_the_minute() {
        let schedule = Schedule::cron("*/10 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 3, 30).unwrap();
        assert_eq!(
            schedule.next_delay(now),
            Some(Duration::from_secs(6 * 60 + 30))
        );
    }

    #[test]
    fn test_six_field_cron_keeps_seconds() {
        let schedule = Schedule::cron("30 0 */2 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(schedule.next_delay(now), Some(Duration::from_secs(3600 + 30)));
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(Schedule::cron("* * *").is_err());
        assert!(Schedule::cron("nope nope nope nope nope").is_err());
        assert!(Schedule::interval(Duration::ZERO).is_err());
    }

    #[test]
    fn test_disabled_never_wakes() {
        let schedule = Schedule::parse("disabled").unwrap();
        assert!(schedule.is_disabled());
        assert_eq!(schedule.next_delay(Utc::now()), None);
        assert!(Schedule::parse("").unwrap().is_disabled());
    }

    #[test]
    fn test_interval() {
        let schedule = Schedule::interval(Duration::from_secs(60)).unwrap();
        assert_eq!(schedule.next_delay(Utc::now()), Some(Duration::from_secs(60)));
    }
}
