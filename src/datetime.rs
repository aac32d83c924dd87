//! Packs a wall-clock timestamp into the 32-bit DOS date/time word used by
//! ZIP local and central-directory headers.

use chrono::{DateTime, Datelike, TimeZone, Timelike};

/// Packs `t`'s wall-clock fields (whatever `TimeZone` the caller chose) into
/// the little-endian 32-bit DOS date/time value: low 16 bits are the DOS
/// time, high 16 bits the DOS date. Sub-second precision is discarded.
pub fn dos_date_time<Tz: TimeZone>(t: &DateTime<Tz>) -> u32 {
    let dos_time = dos_time(t);
    let dos_date = dos_date(t);
    (dos_time as u32) | ((dos_date as u32) << 16)
}

fn dos_time<Tz: TimeZone>(t: &DateTime<Tz>) -> u16 {
    let seconds = (t.second() / 2) as u16;
    let minutes = t.minute() as u16;
    let hours = t.hour() as u16;
    seconds | (minutes << 5) | (hours << 11)
}

fn dos_date<Tz: TimeZone>(t: &DateTime<Tz>) -> u16 {
    let day = t.day() as u16;
    let month = t.month() as u16;
    let year = t.year().saturating_sub(1980).max(0) as u16;
    day | (month << 5) | (year << 9)
}
