//! Monitor trigger-time arithmetic.
//!
//! [`MonitorTimeSetting`] is the loosely-typed configuration as users save
//! it; [`Schedule`] is its validated form, one variant per mode/unit with
//! exactly the parameters that variant needs. [`next_run`] validates and
//! computes in one step.
//!
//! All arithmetic is calendar arithmetic in UTC. Wall-clock candidates
//! (daily/weekly/monthly) that are equal to `now` count as already passed,
//! so a monitor recomputed at its own fire time moves to the next
//! occurrence. A day-of-month beyond the end of the target month is
//! clamped to the month's last day (31 in April fires on the 30th).

use chrono::{
    Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Weekday,
};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Raw setting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerMode {
    /// Fire immediately (one-shot "run now").
    Now,
    /// Fire once at a fixed date.
    AtSomeDate,
    Periodically,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodUnit {
    EveryMinute,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// How a monitor's next run is computed, as configured by users.
///
/// Only the fields the selected mode/unit needs have to be present;
/// [`Schedule::try_from`] rejects a setting with a missing or out-of-range
/// required field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorTimeSetting {
    pub mode: TriggerMode,
    #[serde(default)]
    pub unit: Option<PeriodUnit>,
    /// Target for [`TriggerMode::AtSomeDate`].
    #[serde(default)]
    pub fixed_date: Option<Timestamp>,
    /// Time of day (UTC) for daily, weekly and monthly units.
    #[serde(default)]
    pub time_of_day: Option<NaiveTime>,
    /// ISO day of week, 1 = Monday ... 7 = Sunday.
    #[serde(default)]
    pub day_of_week: Option<u32>,
    /// 1..=31, clamped to the month's length.
    #[serde(default)]
    pub day_of_month: Option<u32>,
    /// Minutes (every-minute) or hours (hourly) between runs.
    #[serde(default)]
    pub increment: Option<u32>,
}

impl MonitorTimeSetting {
    /// A setting that fires immediately.
    pub fn now() -> Self {
        Self::with_mode(TriggerMode::Now)
    }

    /// A periodic setting with only the unit filled in.
    pub fn periodically(unit: PeriodUnit) -> Self {
        Self {
            unit: Some(unit),
            ..Self::with_mode(TriggerMode::Periodically)
        }
    }

    fn with_mode(mode: TriggerMode) -> Self {
        Self {
            mode,
            unit: None,
            fixed_date: None,
            time_of_day: None,
            day_of_week: None,
            day_of_month: None,
            increment: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Validated schedule
// ---------------------------------------------------------------------------

/// A validated time setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Now,
    AtDate(Timestamp),
    EveryMinutes(u32),
    EveryHours(u32),
    Daily { at: NaiveTime },
    Weekly { weekday: Weekday, at: NaiveTime },
    Monthly { day: u32, at: NaiveTime },
}

impl TryFrom<&MonitorTimeSetting> for Schedule {
    type Error = CoreError;

    fn try_from(setting: &MonitorTimeSetting) -> Result<Self, Self::Error> {
        match setting.mode {
            TriggerMode::Now => Ok(Schedule::Now),
            TriggerMode::AtSomeDate => setting
                .fixed_date
                .map(Schedule::AtDate)
                .ok_or_else(|| CoreError::config("AT_SOME_DATE requires fixed_date")),
            TriggerMode::Periodically => {
                let unit = setting
                    .unit
                    .ok_or_else(|| CoreError::config("PERIODICALLY requires a unit"))?;
                periodic(unit, setting)
            }
        }
    }
}

fn periodic(unit: PeriodUnit, setting: &MonitorTimeSetting) -> Result<Schedule, CoreError> {
    let time_of_day = || {
        setting
            .time_of_day
            .ok_or_else(|| CoreError::config(format!("{unit:?} requires time_of_day")))
    };

    match unit {
        PeriodUnit::EveryMinute => Ok(Schedule::EveryMinutes(increment(setting, unit)?)),
        PeriodUnit::Hourly => Ok(Schedule::EveryHours(increment(setting, unit)?)),
        PeriodUnit::Daily => Ok(Schedule::Daily { at: time_of_day()? }),
        PeriodUnit::Weekly => {
            let iso = setting
                .day_of_week
                .ok_or_else(|| CoreError::config("WEEKLY requires day_of_week"))?;
            Ok(Schedule::Weekly {
                weekday: iso_weekday(iso)?,
                at: time_of_day()?,
            })
        }
        PeriodUnit::Monthly => {
            let day = setting
                .day_of_month
                .ok_or_else(|| CoreError::config("MONTHLY requires day_of_month"))?;
            if !(1..=31).contains(&day) {
                return Err(CoreError::config(format!(
                    "day_of_month must be between 1 and 31, got {day}"
                )));
            }
            Ok(Schedule::Monthly {
                day,
                at: time_of_day()?,
            })
        }
    }
}

fn increment(setting: &MonitorTimeSetting, unit: PeriodUnit) -> Result<u32, CoreError> {
    match setting.increment {
        None => Err(CoreError::config(format!("{unit:?} requires increment"))),
        Some(0) => Err(CoreError::config("increment must be at least 1")),
        Some(n) => Ok(n),
    }
}

fn iso_weekday(iso: u32) -> Result<Weekday, CoreError> {
    match iso {
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        7 => Ok(Weekday::Sun),
        other => Err(CoreError::config(format!(
            "day_of_week must be between 1 (Monday) and 7 (Sunday), got {other}"
        ))),
    }
}

impl Schedule {
    /// `Now` and `AtDate` fire once; everything else repeats.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Schedule::Now | Schedule::AtDate(_))
    }

    /// Compute the next trigger time.
    ///
    /// Interval units (`EveryMinutes`, `EveryHours`) need `last_exec`: the
    /// next run is one increment after it once it lies in the past, and
    /// `last_exec` itself otherwise. Repeated calls before the job runs
    /// therefore never advance more than one increment.
    pub fn next_run(
        &self,
        last_exec: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<Timestamp, CoreError> {
        match *self {
            Schedule::Now => Ok(now),
            Schedule::AtDate(date) => Ok(date),
            Schedule::EveryMinutes(n) => {
                advance_once(last_exec, now, TimeDelta::minutes(i64::from(n)), "EVERY_MINUTE")
            }
            Schedule::EveryHours(n) => {
                advance_once(last_exec, now, TimeDelta::hours(i64::from(n)), "HOURLY")
            }
            Schedule::Daily { at } => {
                let today = now.date_naive().and_time(at);
                if today.and_utc() > now {
                    Ok(today.and_utc())
                } else {
                    shift_days(today, 1)
                }
            }
            Schedule::Weekly { weekday, at } => {
                let current = i64::from(now.weekday().number_from_monday());
                let target = i64::from(weekday.number_from_monday());
                let this_week = shift(now.date_naive().and_time(at), target - current)?;
                if this_week.and_utc() > now {
                    Ok(this_week.and_utc())
                } else {
                    shift_days(this_week, 7)
                }
            }
            Schedule::Monthly { day, at } => {
                let first = first_of_month(now.date_naive())?;
                let this_month = clamped_day(first, day)?.and_time(at);
                if this_month.and_utc() > now {
                    return Ok(this_month.and_utc());
                }
                let next_first = first
                    .checked_add_months(Months::new(1))
                    .ok_or_else(overflow)?;
                Ok(clamped_day(next_first, day)?.and_time(at).and_utc())
            }
        }
    }
}

/// Validate `setting` and compute its next trigger time.
pub fn next_run(
    setting: &MonitorTimeSetting,
    last_exec: Option<Timestamp>,
    now: Timestamp,
) -> Result<Timestamp, CoreError> {
    Schedule::try_from(setting)?.next_run(last_exec, now)
}

// ---------------------------------------------------------------------------
// Calendar helpers
// ---------------------------------------------------------------------------

fn advance_once(
    last_exec: Option<Timestamp>,
    now: Timestamp,
    step: TimeDelta,
    unit: &str,
) -> Result<Timestamp, CoreError> {
    let last = last_exec
        .ok_or_else(|| CoreError::config(format!("{unit} requires a last execution date")))?;
    if last < now {
        last.checked_add_signed(step).ok_or_else(overflow)
    } else {
        Ok(last)
    }
}

fn shift(at: NaiveDateTime, days: i64) -> Result<NaiveDateTime, CoreError> {
    at.checked_add_signed(TimeDelta::days(days)).ok_or_else(overflow)
}

fn shift_days(at: NaiveDateTime, days: u64) -> Result<Timestamp, CoreError> {
    at.checked_add_days(Days::new(days))
        .map(|dt| dt.and_utc())
        .ok_or_else(overflow)
}

fn first_of_month(date: NaiveDate) -> Result<NaiveDate, CoreError> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).ok_or_else(overflow)
}

/// Day `day` of the month starting at `first`, clamped to the month's end.
fn clamped_day(first: NaiveDate, day: u32) -> Result<NaiveDate, CoreError> {
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(overflow)?;
    let day = day.min(last.day());
    NaiveDate::from_ymd_opt(first.year(), first.month(), day).ok_or_else(overflow)
}

fn overflow() -> CoreError {
    CoreError::Internal("calendar arithmetic out of range".to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
