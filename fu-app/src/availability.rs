//! Operator availability and promised return times.
//!
//! Pure computation over the configured business timezone; never reads host local time.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorStatus {
    Working,
    Lunch,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub status: OperatorStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub timezone: Tz,
    pub open_at: NaiveTime,
    pub close_at: NaiveTime,
    pub lunch_start: NaiveTime,
    pub lunch_end: NaiveTime,
    pub lunch_return: NaiveTime,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::Berlin,
            open_at: hm(8, 0),
            close_at: hm(18, 0),
            lunch_start: hm(12, 0),
            lunch_end: hm(13, 0),
            lunch_return: hm(13, 30),
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

impl BusinessHours {
    pub fn is_available(&self, now: DateTime<Utc>) -> Availability {
        let local = now.with_timezone(&self.timezone);
        let time = local.time();

        let status = if is_weekend(local.weekday())
            || time < self.open_at
            || time >= self.close_at
        {
            OperatorStatus::Offline
        } else if time >= self.lunch_start && time < self.lunch_end {
            OperatorStatus::Lunch
        } else {
            OperatorStatus::Working
        };

        Availability {
            available: status == OperatorStatus::Working,
            status,
        }
    }

    /// When the operator will plausibly be back, given the status observed at `now`.
    ///
    /// Never earlier than `now`.
    pub fn next_return_time(&self, now: DateTime<Utc>, status: OperatorStatus) -> DateTime<Utc> {
        let local = now.with_timezone(&self.timezone);
        let today = local.date_naive();

        let candidate = match status {
            OperatorStatus::Working => now,
            OperatorStatus::Lunch => self.at_local(today, self.lunch_return),
            OperatorStatus::Offline => {
                if !is_weekend(local.weekday()) && local.time() < self.open_at {
                    self.at_local(today, self.open_at)
                } else {
                    self.at_local(next_business_day(today), self.open_at)
                }
            }
        };
        candidate.max(now)
    }

    /// Availability check and return time in one step, as used at intake.
    pub fn promised_return_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let availability = self.is_available(now);
        self.next_return_time(now, availability.status)
    }

    pub fn local_hour(&self, at: DateTime<Utc>) -> u32 {
        at.with_timezone(&self.timezone).hour()
    }

    fn at_local(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = date.and_time(time);
        if let Some(t) = self.timezone.from_local_datetime(&naive).earliest() {
            return t.with_timezone(&Utc);
        }
        // Wall-clock time skipped by a DST jump.
        let shifted = naive + chrono::Duration::hours(1);
        match self.timezone.from_local_datetime(&shifted).earliest() {
            Some(t) => t.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&naive),
        }
    }
}

fn next_business_day(from: NaiveDate) -> NaiveDate {
    let mut day = from;
    loop {
        day = match day.checked_add_days(Days::new(1)) {
            Some(d) => d,
            None => return from,
        };
        if !is_weekend(day.weekday()) {
            return day;
        }
    }
}
