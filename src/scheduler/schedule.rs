//! When timers fire.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use tokio::time::Instant;

use super::solar::{next_solar_event, Location};
use crate::error::{InsteonError, Result};

/// One day.
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Time of day for a daily timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyTime {
    /// Local wall-clock time.
    At(NaiveTime),
    Sunrise,
    Sunset,
}

impl DailyTime {
    /// Wait from `now` until the next occurrence.
    pub fn delay_from<Tz: TimeZone>(
        &self,
        now: DateTime<Tz>,
        location: Option<Location>,
    ) -> Result<Duration> {
        match self {
            DailyTime::At(time) => {
                let mut delta = time.signed_duration_since(now.time());
                if delta < chrono::Duration::zero() {
                    delta += chrono::Duration::days(1);
                }
                delta
                    .to_std()
                    .map_err(|e| InsteonError::InvalidParameter(e.to_string()))
            }
            DailyTime::Sunrise | DailyTime::Sunset => {
                let location = location.ok_or_else(|| {
                    InsteonError::InvalidParameter(format!(
                        "{} timers need a configured location",
                        self
                    ))
                })?;
                let now = now.with_timezone(&Utc);
                let event = next_solar_event(now, location, *self == DailyTime::Sunset)
                    .ok_or_else(|| {
                        InsteonError::InvalidParameter(format!(
                            "No {} within a year at {:?}",
                            self, location
                        ))
                    })?;
                (event - now)
                    .to_std()
                    .map_err(|e| InsteonError::InvalidParameter(e.to_string()))
            }
        }
    }
}

impl FromStr for DailyTime {
    type Err = InsteonError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "sunrise" => return Ok(DailyTime::Sunrise),
            "sunset" => return Ok(DailyTime::Sunset),
            _ => {}
        }
        NaiveTime::parse_from_str(s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .map(DailyTime::At)
            .map_err(|_| {
                InsteonError::InvalidParameter(format!(
                    "Invalid time '{}': expected HH:MM:SS, sunrise or sunset",
                    s
                ))
            })
    }
}

impl fmt::Display for DailyTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DailyTime::At(t) => write!(f, "{}", t.format("%H:%M:%S")),
            DailyTime::Sunrise => f.write_str("sunrise"),
            DailyTime::Sunset => f.write_str("sunset"),
        }
    }
}

/// Repetition state of a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    period: Duration,
    remaining: Option<u32>,
    fired: u64,
}

impl Schedule {
    /// Every `period`, `count` times (forever when `None`).
    pub fn interval(period: Duration, count: Option<u32>) -> Result<Self> {
        if period.is_zero() {
            return Err(InsteonError::InvalidParameter(
                "Interval must be greater than zero".into(),
            ));
        }
        if count == Some(0) {
            return Err(InsteonError::InvalidParameter(
                "Event count must be at least 1".into(),
            ));
        }
        Ok(Self {
            period,
            remaining: count,
            fired: 0,
        })
    }

    /// Once a day, forever.
    pub fn daily() -> Self {
        Self {
            period: DAY,
            remaining: None,
            fired: 0,
        }
    }

    /// Record a firing at `at` and return the next deadline, or `None` when
    /// the count is used up.
    pub fn fire(&mut self, at: Instant) -> Option<Instant> {
        self.fired += 1;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                return None;
            }
        }
        Some(at + self.period)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Firings left, `None` for unbounded.
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }
}
