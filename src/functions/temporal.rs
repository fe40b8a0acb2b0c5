//! Temporal builtin functions.
//!
//! `date`, `datetime`, `time`, `localdatetime`, `localtime`, `timestamp`
//! and `duration` produce component maps rather than opaque values, so the
//! results compose with lookups and comparisons like any other map. Each
//! accepts an ISO string, epoch milliseconds, or a component map; the
//! zero-argument forms use the current instant.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use regex::Regex;

use crate::error::{Error, Result};
use crate::value::{Record, Value};

/// Quarter (1-4) of a month (1-12).
fn quarter(month: u32) -> i64 {
    i64::from((month - 1) / 3 + 1)
}

/// Parse a temporal argument into a UTC instant.
fn parse_temporal_arg(arg: &Value, fn_name: &str) -> Result<DateTime<Utc>> {
    match arg {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Ok(Utc.from_utc_datetime(&naive));
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                let naive = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
                    Error::Eval(format!("{fn_name}(): Invalid temporal string: '{s}'"))
                })?;
                return Ok(Utc.from_utc_datetime(&naive));
            }
            Err(Error::Eval(format!(
                "{fn_name}(): Invalid temporal string: '{s}'"
            )))
        }
        Value::Int(ms) => Ok(Utc
            .timestamp_millis_opt(*ms)
            .single()
            .ok_or_else(|| Error::Eval(format!("{fn_name}(): epoch out of range")))?),
        Value::Float(ms) => Ok(Utc
            .timestamp_millis_opt(*ms as i64)
            .single()
            .ok_or_else(|| Error::Eval(format!("{fn_name}(): epoch out of range")))?),
        Value::Map(m) => {
            let now = Utc::now();
            let get = |key: &str, default: i64| -> i64 {
                m.get(key).and_then(Value::as_integer).unwrap_or(default)
            };
            let year = get("year", i64::from(now.year())) as i32;
            let month = get("month", 1) as u32;
            let day = get("day", 1) as u32;
            let hour = get("hour", 0) as u32;
            let minute = get("minute", 0) as u32;
            let second = get("second", 0) as u32;
            let millisecond = get("millisecond", 0) as u32;
            let date = NaiveDate::from_ymd_opt(year, month, day)
                .ok_or_else(|| Error::Eval(format!("{fn_name}(): invalid date components")))?;
            let naive = date
                .and_hms_milli_opt(hour, minute, second, millisecond)
                .ok_or_else(|| Error::Eval(format!("{fn_name}(): invalid time components")))?;
            Ok(Utc.from_utc_datetime(&naive))
        }
        other => Err(Error::Eval(format!(
            "{fn_name}(): Expected a string, number (epoch millis), or map argument, got {}",
            other.type_name()
        ))),
    }
}

fn argument(args: &[Value], fn_name: &str) -> Result<DateTime<Utc>> {
    match args.first() {
        None | Some(Value::Null) => Ok(Utc::now()),
        Some(arg) => parse_temporal_arg(arg, fn_name),
    }
}

fn datetime_record<Tz: TimeZone>(dt: &DateTime<Tz>, utc: bool) -> Record {
    let millisecond = i64::from(dt.timestamp_subsec_millis());
    let mut rec = Record::new();
    rec.insert("year".into(), Value::Int(i64::from(dt.year())));
    rec.insert("month".into(), Value::Int(i64::from(dt.month())));
    rec.insert("day".into(), Value::Int(i64::from(dt.day())));
    rec.insert("hour".into(), Value::Int(i64::from(dt.hour())));
    rec.insert("minute".into(), Value::Int(i64::from(dt.minute())));
    rec.insert("second".into(), Value::Int(i64::from(dt.second())));
    rec.insert("millisecond".into(), Value::Int(millisecond));
    rec.insert("epochMillis".into(), Value::Int(dt.timestamp_millis()));
    rec.insert("epochSeconds".into(), Value::Int(dt.timestamp()));
    rec.insert(
        "dayOfWeek".into(),
        Value::Int(i64::from(dt.weekday().number_from_monday())),
    );
    rec.insert("dayOfYear".into(), Value::Int(i64::from(dt.ordinal())));
    rec.insert("quarter".into(), Value::Int(quarter(dt.month())));
    let formatted = format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}{}",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        millisecond,
        if utc { "Z" } else { "" }
    );
    rec.insert("formatted".into(), Value::String(formatted));
    rec
}

fn time_record<Tz: TimeZone>(dt: &DateTime<Tz>, utc: bool) -> Record {
    let millisecond = i64::from(dt.timestamp_subsec_millis());
    let mut rec = Record::new();
    rec.insert("hour".into(), Value::Int(i64::from(dt.hour())));
    rec.insert("minute".into(), Value::Int(i64::from(dt.minute())));
    rec.insert("second".into(), Value::Int(i64::from(dt.second())));
    rec.insert("millisecond".into(), Value::Int(millisecond));
    let formatted = format!(
        "{:02}:{:02}:{:02}.{:03}{}",
        dt.hour(),
        dt.minute(),
        dt.second(),
        millisecond,
        if utc { "Z" } else { "" }
    );
    rec.insert("formatted".into(), Value::String(formatted));
    rec
}

/// Current or parsed UTC datetime as a component map.
pub fn datetime(args: &[Value]) -> Result<Value> {
    if args.first().is_some_and(Value::is_null) {
        return Ok(Value::Null);
    }
    let dt = argument(args, "datetime")?;
    Ok(Value::Map(datetime_record(&dt, true)))
}

/// Current or parsed local datetime as a component map.
pub fn localdatetime(args: &[Value]) -> Result<Value> {
    if args.first().is_some_and(Value::is_null) {
        return Ok(Value::Null);
    }
    let dt = argument(args, "localdatetime")?.with_timezone(&Local);
    Ok(Value::Map(datetime_record(&dt, false)))
}

/// Date-only component map.
pub fn date(args: &[Value]) -> Result<Value> {
    if args.first().is_some_and(Value::is_null) {
        return Ok(Value::Null);
    }
    let dt = argument(args, "date")?;
    let midnight = dt
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| Error::Eval("date(): invalid date".into()))?;
    let mut rec = Record::new();
    rec.insert("year".into(), Value::Int(i64::from(dt.year())));
    rec.insert("month".into(), Value::Int(i64::from(dt.month())));
    rec.insert("day".into(), Value::Int(i64::from(dt.day())));
    rec.insert("epochMillis".into(), Value::Int(midnight.timestamp_millis()));
    rec.insert(
        "dayOfWeek".into(),
        Value::Int(i64::from(dt.weekday().number_from_monday())),
    );
    rec.insert("dayOfYear".into(), Value::Int(i64::from(dt.ordinal())));
    rec.insert("quarter".into(), Value::Int(quarter(dt.month())));
    rec.insert(
        "formatted".into(),
        Value::String(format!("{:04}-{:02}-{:02}", dt.year(), dt.month(), dt.day())),
    );
    Ok(Value::Map(rec))
}

/// Time-of-day component map in UTC.
pub fn time(args: &[Value]) -> Result<Value> {
    if args.first().is_some_and(Value::is_null) {
        return Ok(Value::Null);
    }
    let dt = argument(args, "time")?;
    Ok(Value::Map(time_record(&dt, true)))
}

/// Time-of-day component map in local time.
pub fn localtime(args: &[Value]) -> Result<Value> {
    if args.first().is_some_and(Value::is_null) {
        return Ok(Value::Null);
    }
    let dt = argument(args, "localtime")?.with_timezone(&Local);
    Ok(Value::Map(time_record(&dt, false)))
}

/// Current epoch milliseconds.
pub fn timestamp(_args: &[Value]) -> Result<Value> {
    Ok(Value::Int(Utc::now().timestamp_millis()))
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^P(?:(\d+(?:\.\d+)?)Y)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)W)?(?:(\d+(?:\.\d+)?)D)?(?:T(?:(\d+(?:\.\d+)?)H)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)S)?)?$",
        )
        .expect("duration pattern is valid")
    })
}

struct DurationComponents {
    years: f64,
    months: f64,
    weeks: f64,
    days: f64,
    hours: f64,
    minutes: f64,
    seconds: f64,
    milliseconds: Option<i64>,
    nanoseconds: Option<i64>,
}

fn parse_duration_string(s: &str) -> Result<DurationComponents> {
    let captures = duration_regex().captures(s).ok_or_else(|| {
        Error::Eval(format!("duration(): Invalid ISO 8601 duration string: '{s}'"))
    })?;
    let group = |i: usize| -> f64 {
        captures
            .get(i)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    Ok(DurationComponents {
        years: group(1),
        months: group(2),
        weeks: group(3),
        days: group(4),
        hours: group(5),
        minutes: group(6),
        seconds: group(7),
        milliseconds: None,
        nanoseconds: None,
    })
}

fn components_from_map(m: &Record) -> DurationComponents {
    let get = |key: &str| -> f64 {
        m.get(key)
            .and_then(Value::as_number)
            .unwrap_or(0.0)
    };
    DurationComponents {
        years: get("years"),
        months: get("months"),
        weeks: get("weeks"),
        days: get("days"),
        hours: get("hours"),
        minutes: get("minutes"),
        seconds: get("seconds"),
        milliseconds: m.get("milliseconds").and_then(Value::as_integer),
        nanoseconds: m.get("nanoseconds").and_then(Value::as_integer),
    }
}

fn build_duration_record(c: &DurationComponents) -> Record {
    let seconds_whole = c.seconds.trunc() as i64;
    let fractional = c.seconds - c.seconds.trunc();
    let milliseconds = c
        .milliseconds
        .unwrap_or_else(|| (fractional * 1000.0).round() as i64);
    let nanoseconds = c
        .nanoseconds
        .unwrap_or_else(|| ((fractional * 1_000_000_000.0).round() as i64) % 1_000_000);

    let total_days = (c.days + c.weeks * 7.0) as i64;
    let total_seconds = (c.hours * 3600.0 + c.minutes * 60.0) as i64 + seconds_whole;
    let total_months = (c.years * 12.0 + c.months) as i64;

    let mut formatted = String::from("P");
    if c.years != 0.0 {
        formatted.push_str(&format!("{}Y", c.years as i64));
    }
    if c.months != 0.0 {
        formatted.push_str(&format!("{}M", c.months as i64));
    }
    if c.weeks != 0.0 {
        formatted.push_str(&format!("{}W", c.weeks as i64));
    }
    let bare_days = total_days - (c.weeks as i64) * 7;
    if bare_days != 0 {
        formatted.push_str(&format!("{bare_days}D"));
    }
    if c.hours != 0.0 || c.minutes != 0.0 || seconds_whole != 0 || milliseconds != 0 {
        formatted.push('T');
        if c.hours != 0.0 {
            formatted.push_str(&format!("{}H", c.hours as i64));
        }
        if c.minutes != 0.0 {
            formatted.push_str(&format!("{}M", c.minutes as i64));
        }
        if seconds_whole != 0 || milliseconds != 0 {
            if milliseconds != 0 {
                formatted.push_str(&format!("{seconds_whole}.{milliseconds:03}S"));
            } else {
                formatted.push_str(&format!("{seconds_whole}S"));
            }
        }
    }
    if formatted == "P" {
        formatted = "PT0S".to_string();
    }

    let mut rec = Record::new();
    rec.insert("years".into(), Value::Int(c.years as i64));
    rec.insert("months".into(), Value::Int(c.months as i64));
    rec.insert("weeks".into(), Value::Int(c.weeks as i64));
    rec.insert("days".into(), Value::Int(total_days));
    rec.insert("hours".into(), Value::Int(c.hours as i64));
    rec.insert("minutes".into(), Value::Int(c.minutes as i64));
    rec.insert("seconds".into(), Value::Int(seconds_whole));
    rec.insert("milliseconds".into(), Value::Int(milliseconds));
    rec.insert("nanoseconds".into(), Value::Int(nanoseconds));
    rec.insert("totalMonths".into(), Value::Int(total_months));
    rec.insert("totalDays".into(), Value::Int(total_days));
    rec.insert("totalSeconds".into(), Value::Int(total_seconds));
    rec.insert("formatted".into(), Value::String(formatted));
    rec
}

/// Span-of-time component map from an ISO 8601 string or a component map.
pub fn duration(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::Map(build_duration_record(&parse_duration_string(
            s,
        )?))),
        Value::Map(m) => Ok(Value::Map(build_duration_record(&components_from_map(m)))),
        _ => Err(Error::Eval("duration() expects a string or map argument".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_get<'a>(v: &'a Value, key: &str) -> &'a Value {
        match v {
            Value::Map(m) => &m[key],
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn test_datetime_from_iso_string() {
        let v = datetime(&[Value::from("2024-03-05T10:20:30.400Z")]).unwrap();
        assert_eq!(map_get(&v, "year"), &Value::Int(2024));
        assert_eq!(map_get(&v, "month"), &Value::Int(3));
        assert_eq!(map_get(&v, "day"), &Value::Int(5));
        assert_eq!(map_get(&v, "hour"), &Value::Int(10));
        assert_eq!(map_get(&v, "millisecond"), &Value::Int(400));
        assert_eq!(map_get(&v, "quarter"), &Value::Int(1));
        assert_eq!(
            map_get(&v, "formatted"),
            &Value::from("2024-03-05T10:20:30.400Z")
        );
    }

    #[test]
    fn test_date_day_of_week_and_quarter() {
        // 2024-07-01 was a Monday in Q3.
        let v = date(&[Value::from("2024-07-01")]).unwrap();
        assert_eq!(map_get(&v, "dayOfWeek"), &Value::Int(1));
        assert_eq!(map_get(&v, "quarter"), &Value::Int(3));
        assert_eq!(map_get(&v, "formatted"), &Value::from("2024-07-01"));
    }

    #[test]
    fn test_datetime_epoch_round_trip() {
        let v = datetime(&[Value::Int(1_700_000_000_000)]).unwrap();
        assert_eq!(map_get(&v, "epochMillis"), &Value::Int(1_700_000_000_000));
        assert_eq!(map_get(&v, "epochSeconds"), &Value::Int(1_700_000_000));
    }

    #[test]
    fn test_datetime_from_component_map() {
        let mut m = Record::new();
        m.insert("year".into(), Value::Int(2023));
        m.insert("month".into(), Value::Int(2));
        m.insert("day".into(), Value::Int(28));
        let v = datetime(&[Value::Map(m)]).unwrap();
        assert_eq!(map_get(&v, "year"), &Value::Int(2023));
        assert_eq!(map_get(&v, "hour"), &Value::Int(0));
    }

    #[test]
    fn test_duration_iso_string() {
        let v = duration(&[Value::from("P1Y2M3DT4H5M6S")]).unwrap();
        assert_eq!(map_get(&v, "years"), &Value::Int(1));
        assert_eq!(map_get(&v, "months"), &Value::Int(2));
        assert_eq!(map_get(&v, "days"), &Value::Int(3));
        assert_eq!(map_get(&v, "hours"), &Value::Int(4));
        assert_eq!(map_get(&v, "totalMonths"), &Value::Int(14));
        assert_eq!(map_get(&v, "formatted"), &Value::from("P1Y2M3DT4H5M6S"));
    }

    #[test]
    fn test_duration_weeks_fold_into_days() {
        let v = duration(&[Value::from("P2W")]).unwrap();
        assert_eq!(map_get(&v, "weeks"), &Value::Int(2));
        assert_eq!(map_get(&v, "days"), &Value::Int(14));
        assert_eq!(map_get(&v, "totalDays"), &Value::Int(14));
    }

    #[test]
    fn test_duration_map_argument() {
        let mut m = Record::new();
        m.insert("days".into(), Value::Int(14));
        m.insert("hours".into(), Value::Int(16));
        let v = duration(&[Value::Map(m)]).unwrap();
        assert_eq!(map_get(&v, "days"), &Value::Int(14));
        assert_eq!(map_get(&v, "hours"), &Value::Int(16));
        assert_eq!(map_get(&v, "totalSeconds"), &Value::Int(16 * 3600));
    }

    #[test]
    fn test_duration_null() {
        assert_eq!(duration(&[Value::Null]).unwrap(), Value::Null);
    }

    #[test]
    fn test_time_only() {
        let v = time(&[Value::from("2024-03-05T10:20:30.400Z")]).unwrap();
        assert_eq!(map_get(&v, "hour"), &Value::Int(10));
        assert_eq!(map_get(&v, "formatted"), &Value::from("10:20:30.400Z"));
    }
}
