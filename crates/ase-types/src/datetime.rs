//! Date and time wire conversions.
//!
//! ASE has four datetime layouts:
//! - DATETIME: 4-byte days since 1900-01-01 plus 4-byte ticks of 1/300 s;
//! - SMALLDATETIME: 2-byte days since 1900-01-01 plus 2-byte minutes;
//! - BIGDATETIME: 8-byte microseconds since 0001-01-01 00:00:00;
//! - BIGTIME: 8-byte microseconds since midnight.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::TypeError;

const TICKS_PER_SECOND: i64 = 300;
const TICKS_PER_DAY: i64 = 86_400 * TICKS_PER_SECOND;
const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

fn epoch_1900() -> NaiveDateTime {
    // Statically valid date.
    #[allow(clippy::unwrap_used)]
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap().and_time(NaiveTime::MIN)
}

fn epoch_0001() -> NaiveDateTime {
    #[allow(clippy::unwrap_used)]
    NaiveDate::from_ymd_opt(1, 1, 1).unwrap().and_time(NaiveTime::MIN)
}

/// Convert a DATETIME wire pair to a timestamp.
pub fn datetime_from_wire(days: i32, ticks: u32) -> Result<NaiveDateTime, TypeError> {
    let micros = i64::from(ticks) * MICROS_PER_SECOND / TICKS_PER_SECOND;
    epoch_1900()
        .checked_add_signed(Duration::days(i64::from(days)))
        .and_then(|dt| dt.checked_add_signed(Duration::microseconds(micros)))
        .ok_or_else(|| TypeError::InvalidDateTime(format!("days {days}, ticks {ticks}")))
}

/// Convert a timestamp to a DATETIME wire pair.
pub fn datetime_to_wire(value: NaiveDateTime) -> Result<(i32, u32), TypeError> {
    let delta = value.signed_duration_since(epoch_1900());
    let micros = delta.num_microseconds().ok_or_else(|| {
        TypeError::InvalidDateTime(value.to_string())
    })?;
    let mut days = micros.div_euclid(MICROS_PER_DAY);
    let in_day = micros.rem_euclid(MICROS_PER_DAY);
    let mut ticks = (in_day * TICKS_PER_SECOND + MICROS_PER_SECOND / 2) / MICROS_PER_SECOND;
    // Half-tick rounding in the last 1667 µs of a day lands on a full day
    // of ticks; that instant belongs to the next day.
    if ticks == TICKS_PER_DAY {
        days += 1;
        ticks = 0;
    }
    let days = i32::try_from(days)
        .map_err(|_| TypeError::InvalidDateTime(value.to_string()))?;
    Ok((days, ticks as u32))
}

/// Convert a SMALLDATETIME wire pair to a timestamp.
pub fn shortdate_from_wire(days: u16, minutes: u16) -> Result<NaiveDateTime, TypeError> {
    epoch_1900()
        .checked_add_signed(Duration::days(i64::from(days)))
        .and_then(|dt| dt.checked_add_signed(Duration::minutes(i64::from(minutes))))
        .ok_or_else(|| TypeError::InvalidDateTime(format!("days {days}, minutes {minutes}")))
}

/// Convert a timestamp to a SMALLDATETIME wire pair, minute precision.
pub fn shortdate_to_wire(value: NaiveDateTime) -> Result<(u16, u16), TypeError> {
    let delta = value.date().signed_duration_since(epoch_1900().date());
    let days = u16::try_from(delta.num_days())
        .map_err(|_| TypeError::InvalidDateTime(value.to_string()))?;
    let minutes = (value.time().num_seconds_from_midnight() / 60) as u16;
    Ok((days, minutes))
}

/// Convert a BIGDATETIME microsecond count to a timestamp.
pub fn bigdatetime_from_wire(micros: u64) -> Result<NaiveDateTime, TypeError> {
    let micros = i64::try_from(micros)
        .map_err(|_| TypeError::InvalidDateTime(format!("bigdatetime {micros}")))?;
    epoch_0001()
        .checked_add_signed(Duration::microseconds(micros))
        .ok_or_else(|| TypeError::InvalidDateTime(format!("bigdatetime {micros}")))
}

/// Convert a timestamp to a BIGDATETIME microsecond count.
pub fn bigdatetime_to_wire(value: NaiveDateTime) -> Result<u64, TypeError> {
    let delta = value.signed_duration_since(epoch_0001());
    let micros = delta
        .num_microseconds()
        .filter(|m| *m >= 0)
        .ok_or_else(|| TypeError::InvalidDateTime(value.to_string()))?;
    Ok(micros as u64)
}

/// Convert a BIGTIME microsecond count to a time of day.
pub fn bigtime_from_wire(micros: u64) -> Result<NaiveTime, TypeError> {
    if micros >= MICROS_PER_DAY as u64 {
        return Err(TypeError::InvalidDateTime(format!("bigtime {micros}")));
    }
    let secs = (micros / MICROS_PER_SECOND as u64) as u32;
    let sub_micro = (micros % MICROS_PER_SECOND as u64) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, sub_micro * 1000)
        .ok_or_else(|| TypeError::InvalidDateTime(format!("bigtime {micros}")))
}

/// Convert a time of day to a BIGTIME microsecond count.
#[must_use]
pub fn bigtime_to_wire(value: NaiveTime) -> u64 {
    u64::from(value.num_seconds_from_midnight()) * MICROS_PER_SECOND as u64
        + u64::from(value.nanosecond() / 1000)
}
