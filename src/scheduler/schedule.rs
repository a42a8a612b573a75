use crate::error::PipelineError;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// How often the pipeline runs. A run for logical date `d` covers the
/// interval `[d, next(d))` and becomes due once that interval has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Schedule {
    Once,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Every(Duration),
}

impl Schedule {
    /// Start of the interval following the one starting at `t`
    pub fn next_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Once => None,
            Schedule::Hourly => t.checked_add_signed(Duration::hours(1)),
            Schedule::Daily => t.checked_add_signed(Duration::days(1)),
            Schedule::Weekly => t.checked_add_signed(Duration::weeks(1)),
            Schedule::Monthly => t.checked_add_months(Months::new(1)),
            Schedule::Every(d) => t.checked_add_signed(*d),
        }
    }

    /// First interval boundary at or after `start`
    pub fn align(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Schedule::Once | Schedule::Every(_) => start,
            Schedule::Hourly => {
                let floor = start
                    .with_minute(0)
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(start);
                if floor < start {
                    floor + Duration::hours(1)
                } else {
                    floor
                }
            }
            Schedule::Daily => ceil_to_midnight(start),
            Schedule::Weekly => {
                let day = ceil_to_midnight(start);
                let offset = (7 - day.weekday().num_days_from_sunday()) % 7;
                day + Duration::days(offset as i64)
            }
            Schedule::Monthly => {
                let day = ceil_to_midnight(start);
                if day.day() == 1 {
                    day
                } else {
                    first_of_next_month(day).unwrap_or(day)
                }
            }
        }
    }

    /// Logical dates whose interval has fully elapsed by `now`, oldest first
    pub fn due_logical_dates(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let first = self.align(start);
        if *self == Schedule::Once {
            return if first <= now { vec![first] } else { Vec::new() };
        }

        let mut due = Vec::new();
        let mut current = first;
        while let Some(end) = self.next_after(current) {
            if end > now {
                break;
            }
            due.push(current);
            current = end;
        }
        due
    }

    /// Interval length for schedules whose intervals never vary
    fn fixed_interval(&self) -> Option<Duration> {
        match self {
            Schedule::Hourly => Some(Duration::hours(1)),
            Schedule::Daily => Some(Duration::days(1)),
            Schedule::Weekly => Some(Duration::weeks(1)),
            Schedule::Every(d) => Some(*d),
            Schedule::Once | Schedule::Monthly => None,
        }
    }

    /// Most recent logical date that is due at `now`
    pub fn latest_due(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let first = self.align(start);
        if *self == Schedule::Once {
            return (first <= now).then_some(first);
        }

        match self.fixed_interval() {
            Some(step) => {
                let elapsed = intervals_elapsed(first, step, now)?;
                if elapsed == 0 {
                    None
                } else {
                    nth_boundary(first, step, elapsed - 1)
                }
            }
            None => self.due_logical_dates(start, now).pop(),
        }
    }

    /// Moment the next logical date after `now` becomes due, if any
    pub fn next_fire_time(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let first = self.align(start);
        if *self == Schedule::Once {
            return (first > now).then_some(first);
        }

        if let Some(step) = self.fixed_interval() {
            let elapsed = intervals_elapsed(first, step, now)?;
            return nth_boundary(first, step, elapsed.checked_add(1)?);
        }

        let mut current = first;
        loop {
            let end = self.next_after(current)?;
            if end > now {
                return Some(end);
            }
            current = end;
        }
    }

    /// Logical dates between `from` and `to` inclusive
    pub fn logical_dates_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let mut dates = Vec::new();
        let mut current = self.align(from);
        while current <= to {
            dates.push(current);
            match self.next_after(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        dates
    }
}

/// Midnight UTC at the start of `date`
pub fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

/// Whole intervals of length `step` between `first` and `now`
fn intervals_elapsed(first: DateTime<Utc>, step: Duration, now: DateTime<Utc>) -> Option<i64> {
    let step_ms = step.num_milliseconds();
    if step_ms <= 0 {
        return None;
    }
    if now < first {
        return Some(0);
    }
    Some((now - first).num_milliseconds() / step_ms)
}

fn nth_boundary(first: DateTime<Utc>, step: Duration, n: i64) -> Option<DateTime<Utc>> {
    let offset = step.num_milliseconds().checked_mul(n)?;
    first.checked_add_signed(Duration::milliseconds(offset))
}

fn ceil_to_midnight(t: DateTime<Utc>) -> DateTime<Utc> {
    let floor = midnight(t.date_naive());
    if floor < t {
        floor + Duration::days(1)
    } else {
        floor
    }
}

fn first_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let first = NaiveDate::from_ymd_opt(t.year(), t.month(), 1)?;
    Some(midnight(first.checked_add_months(Months::new(1))?))
}

impl FromStr for Schedule {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "@once" => return Ok(Schedule::Once),
            "@hourly" => return Ok(Schedule::Hourly),
            "@daily" => return Ok(Schedule::Daily),
            "@weekly" => return Ok(Schedule::Weekly),
            "@monthly" => return Ok(Schedule::Monthly),
            _ => {}
        }

        let spec = s
            .strip_prefix("every ")
            .ok_or_else(|| PipelineError::InvalidSchedule(s.to_string()))?
            .trim();
        let split = spec
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| PipelineError::InvalidSchedule(s.to_string()))?;
        let (amount, unit) = spec.split_at(split);
        let amount: i64 = amount
            .parse()
            .map_err(|_| PipelineError::InvalidSchedule(s.to_string()))?;
        if amount <= 0 {
            return Err(PipelineError::InvalidSchedule(s.to_string()));
        }
        let interval = match unit.trim() {
            "s" => Duration::seconds(amount),
            "m" => Duration::minutes(amount),
            "h" => Duration::hours(amount),
            "d" => Duration::days(amount),
            _ => return Err(PipelineError::InvalidSchedule(s.to_string())),
        };
        Ok(Schedule::Every(interval))
    }
}

impl TryFrom<String> for Schedule {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Once => f.write_str("@once"),
            Schedule::Hourly => f.write_str("@hourly"),
            Schedule::Daily => f.write_str("@daily"),
            Schedule::Weekly => f.write_str("@weekly"),
            Schedule::Monthly => f.write_str("@monthly"),
            Schedule::Every(d) => write!(f, "every {}s", d.num_seconds()),
        }
    }
}
