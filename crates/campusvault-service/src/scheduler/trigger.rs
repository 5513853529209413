//! Calendar triggers: fixed wall-clock times, daily or on one weekday.

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, TimeZone, Weekday};
use std::fmt;
use std::str::FromStr;

/// When a job fires, in the scheduler's local time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Every day at `hour:minute`.
    Daily { hour: u32, minute: u32 },
    /// Every `weekday` at `hour:minute`.
    Weekly {
        weekday: Weekday,
        hour: u32,
        minute: u32,
    },
}

/// Errors parsing a trigger string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerParseError {
    #[error("invalid time `{0}`, expected HH:MM")]
    InvalidTime(String),

    #[error("invalid weekday `{0}`")]
    InvalidWeekday(String),

    #[error("invalid trigger `{0}`, expected `HH:MM` or `<weekday> HH:MM`")]
    Malformed(String),
}

impl Trigger {
    pub fn daily(hour: u32, minute: u32) -> Result<Self, TriggerParseError> {
        check_time(hour, minute)?;
        Ok(Self::Daily { hour, minute })
    }

    pub fn weekly(weekday: Weekday, hour: u32, minute: u32) -> Result<Self, TriggerParseError> {
        check_time(hour, minute)?;
        Ok(Self::Weekly {
            weekday,
            hour,
            minute,
        })
    }

    fn time(&self) -> (u32, u32) {
        match *self {
            Self::Daily { hour, minute } | Self::Weekly { hour, minute, .. } => (hour, minute),
        }
    }

    fn fires_on(&self, date: NaiveDate) -> bool {
        match *self {
            Self::Daily { .. } => true,
            Self::Weekly { weekday, .. } => date.weekday() == weekday,
        }
    }

    /// First firing strictly after `after`, in `after`'s time zone.
    ///
    /// A wall-clock time skipped by a DST jump fires at the first valid
    /// instant after the gap; a repeated one fires on its first occurrence.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let (hour, minute) = self.time();
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let start = after.date_naive();

        // One week covers every weekday; the extra days absorb DST edge cases.
        (0..=8u64)
            .filter_map(|offset| start.checked_add_days(Days::new(offset)))
            .filter(|date| self.fires_on(*date))
            .filter_map(|date| {
                let naive = date.and_time(time);
                tz.from_local_datetime(&naive)
                    .earliest()
                    .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
            })
            .find(|candidate| candidate > after)
    }
}

fn check_time(hour: u32, minute: u32) -> Result<(), TriggerParseError> {
    if hour > 23 || minute > 59 {
        return Err(TriggerParseError::InvalidTime(format!("{hour:02}:{minute:02}")));
    }
    Ok(())
}

fn parse_time(raw: &str) -> Result<(u32, u32), TriggerParseError> {
    let invalid = || TriggerParseError::InvalidTime(raw.to_string());
    let (hour, minute) = raw.split_once(':').ok_or_else(invalid)?;
    let hour = hour.parse().map_err(|_| invalid())?;
    let minute = minute.parse().map_err(|_| invalid())?;
    check_time(hour, minute).map_err(|_| invalid())?;
    Ok((hour, minute))
}

impl FromStr for Trigger {
    type Err = TriggerParseError;

    /// `"03:00"` is daily, `"sun 02:00"` is weekly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        match parts.as_slice() {
            [time] => {
                let (hour, minute) = parse_time(time)?;
                Self::daily(hour, minute)
            }
            [day, time] => {
                let weekday = day
                    .parse::<Weekday>()
                    .map_err(|_| TriggerParseError::InvalidWeekday(day.to_string()))?;
                let (hour, minute) = parse_time(time)?;
                Self::weekly(weekday, hour, minute)
            }
            _ => Err(TriggerParseError::Malformed(s.to_string())),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Daily { hour, minute } => write!(f, "{hour:02}:{minute:02}"),
            Self::Weekly {
                weekday,
                hour,
                minute,
            } => write!(
                f,
                "{} {hour:02}:{minute:02}",
                weekday.to_string().to_lowercase()
            ),
        }
    }
}
