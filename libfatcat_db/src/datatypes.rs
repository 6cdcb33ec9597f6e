//! Field-level predicates.
//!
//! Everything here judges a value that is present; whether a field is required at all is decided
//! one level up. Predicates that take a [`Reporter`] log a diagnostic on failure and return
//! `false`, they never raise.
use bson::Bson;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::macros::{date, format_description};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use super::report::Reporter;

/// No document may be dated before the start of production
pub const EARLIEST_DATE: Date = date!(2017 - 01 - 01);

static DATE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap());
static HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]+$").unwrap());
static ALPHA_NUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+$").unwrap());
static ALPHA_NUM_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());
static ALPHA_NUM_HYPHEN_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap());

/// Type tags used by the schema files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    #[serde(rename = "str")]
    Str,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "list")]
    List,
    #[serde(rename = "dict")]
    Dict,
    #[serde(rename = "unixtime")]
    UnixTime,
    #[serde(rename = "list-of-dicts")]
    ListOfDicts,
    #[serde(rename = "list2d")]
    List2d,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Str => "str",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Number => "number",
            TypeTag::Bool => "bool",
            TypeTag::List => "list",
            TypeTag::Dict => "dict",
            TypeTag::UnixTime => "unixtime",
            TypeTag::ListOfDicts => "list-of-dicts",
            TypeTag::List2d => "list2d",
        };
        write!(f, "{name}")
    }
}

/// Render a list of tags for diagnostics, e.g. `int|float`
pub fn tag_names(tags: &[TypeTag]) -> String {
    tags.iter()
        .map(|t| t.to_string())
        .collect::<Vec<String>>()
        .join("|")
}

/// Does the value match any of the tags?
///
/// The composite tags (`unixtime`, `list-of-dicts`, `list2d`) are tried before the primitive
/// ones. `unixtime` only asserts the shape (a finite double); the date range is judged by
/// [`valid_unix_time`].
pub fn is_instance(value: &Bson, tags: &[TypeTag]) -> bool {
    tags.iter().any(|tag| match tag {
        TypeTag::UnixTime => matches!(value, Bson::Double(x) if x.is_finite()),
        TypeTag::ListOfDicts => match value {
            Bson::Array(items) => items.iter().all(|i| matches!(i, Bson::Document(_))),
            _ => false,
        },
        TypeTag::List2d => match value {
            Bson::Array(rows) => {
                !rows.is_empty() && rows.iter().all(|r| matches!(r, Bson::Array(_)))
            }
            _ => false,
        },
        TypeTag::Str => matches!(value, Bson::String(_)),
        TypeTag::Int => is_integer(value),
        TypeTag::Float => matches!(value, Bson::Double(_)),
        TypeTag::Number => is_number(value),
        TypeTag::Bool => matches!(value, Bson::Boolean(_)),
        TypeTag::List => matches!(value, Bson::Array(_)),
        TypeTag::Dict => matches!(value, Bson::Document(_)),
    })
}

pub fn is_integer(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_))
}

pub fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

/// Numeric value of an int or float
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(x) => Some(*x),
        _ => None,
    }
}

/// Integer value of an int; doubles are not integers
pub fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(*i as i64),
        Bson::Int64(i) => Some(*i),
        _ => None,
    }
}

fn now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

fn earliest() -> PrimitiveDateTime {
    PrimitiveDateTime::new(EARLIEST_DATE, Time::MIDNIGHT)
}

/// Parse a `yyyy-mm-dd` prefixed date or date-time into UTC.
///
/// Accepts a bare date, `T` or space separated times with optional fractional seconds, and
/// RFC 3339 strings carrying an offset.
pub fn parse_date_time(s: &str) -> Option<PrimitiveDateTime> {
    if !DATE_PREFIX.is_match(s) {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        let utc = dt.to_offset(time::UtcOffset::UTC);
        return Some(PrimitiveDateTime::new(utc.date(), utc.time()));
    }
    PrimitiveDateTime::parse(
        s,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            s,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(
            s,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(
            s,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(s, format_description!("[year]-[month]-[day] [hour]:[minute]"))
    })
    .ok()
    .or_else(|| {
        Date::parse(s, format_description!("[year]-[month]-[day]"))
            .ok()
            .map(|d| PrimitiveDateTime::new(d, Time::MIDNIGHT))
    })
}

/// Order two date strings by the instant they name. Unparseable dates fall back to string order.
pub fn compare_date_strings(a: &str, b: &str) -> Ordering {
    match (parse_date_time(a), parse_date_time(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

fn in_production_window(dt: PrimitiveDateTime) -> bool {
    dt >= earliest() && dt <= now_utc()
}

/// A `yyyy-mm-dd` prefixed, parseable date inside `[2017-01-01, now]`
pub fn valid_date_time(field: &str, value: &Bson, reporter: &Reporter) -> bool {
    let s = match value {
        Bson::String(s) => s,
        other => {
            reporter.error(format!("\"{field}\" must be a date string, found {other}"));
            return false;
        }
    };
    if !DATE_PREFIX.is_match(s) {
        reporter.error(format!("\"{field}\" = \"{s}\" must start with yyyy-mm-dd"));
        return false;
    }
    match parse_date_time(s) {
        Some(dt) if in_production_window(dt) => true,
        Some(_) => {
            reporter.error(format!(
                "\"{field}\" = \"{s}\" is outside of [{EARLIEST_DATE}, now]"
            ));
            false
        }
        None => {
            reporter.error(format!("\"{field}\" = \"{s}\" is not a parseable date"));
            false
        }
    }
}

/// Convert unix seconds to a UTC date-time
pub fn unix_to_date_time(seconds: f64) -> Option<PrimitiveDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let nanos = (seconds * 1e9) as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .map(|dt| PrimitiveDateTime::new(dt.date(), dt.time()))
}

/// A float (not an int, not a string) whose date is inside `[2017-01-01, now]`
pub fn valid_unix_time(field: &str, value: &Bson, reporter: &Reporter) -> bool {
    let seconds = match value {
        Bson::Double(x) => *x,
        other => {
            reporter.error(format!(
                "\"{field}\" must be a float unix time, found {other}"
            ));
            return false;
        }
    };
    match unix_to_date_time(seconds) {
        Some(dt) if in_production_window(dt) => true,
        Some(dt) => {
            reporter.error(format!(
                "\"{field}\" = {seconds} converts to {dt}, outside of [{EARLIEST_DATE}, now]"
            ));
            false
        }
        None => {
            reporter.error(format!(
                "\"{field}\" = {seconds} cannot be converted to a date"
            ));
            false
        }
    }
}

/// Hex digits only; a leading `0x` is rejected
pub fn is_hex_string(s: &str) -> bool {
    HEX.is_match(s)
}

pub fn is_alpha_num(s: &str) -> bool {
    ALPHA_NUM.is_match(s)
}

pub fn is_alpha_num_underscore(s: &str) -> bool {
    ALPHA_NUM_UNDERSCORE.is_match(s)
}

pub fn is_alpha_num_hyphen_underscore(s: &str) -> bool {
    ALPHA_NUM_HYPHEN_UNDERSCORE.is_match(s)
}

pub fn not_nan_inf(x: f64) -> bool {
    x.is_finite()
}

pub fn no_hyphen(key: &str) -> bool {
    !key.contains('-')
}

pub fn not_empty_string(s: &str) -> bool {
    !s.trim().is_empty()
}

/// Values that appear more than once, each reported once, in first-seen order
pub fn find_duplicates(values: &[Bson]) -> Vec<Bson> {
    let mut duplicates: Vec<Bson> = Vec::new();
    for (i, value) in values.iter().enumerate() {
        if values[..i].contains(value) && !duplicates.contains(value) {
            duplicates.push(value.clone());
        }
    }
    duplicates
}

/// No repeated entries in a list
pub fn no_duplicates(field: &str, values: &[Bson], reporter: &Reporter) -> bool {
    let duplicates = find_duplicates(values);
    if duplicates.is_empty() {
        true
    } else {
        for dup in duplicates {
            reporter.error(format!("\"{field}\" contains duplicate value {dup}"));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::bson;

    #[test]
    fn test_valid_unix_time() {
        let reporter = Reporter::default();
        assert!(valid_unix_time("meas_time", &Bson::Double(1700000000.0), &reporter));
        assert!(!valid_unix_time(
            "meas_time",
            &Bson::String(String::from("1700000000")),
            &reporter
        ));
        assert!(!valid_unix_time("meas_time", &Bson::Int64(1700000000), &reporter));
        // 2016-12-31
        assert!(!valid_unix_time("meas_time", &Bson::Double(1483142400.0), &reporter));
        // far future
        assert!(!valid_unix_time("meas_time", &Bson::Double(4102444800.0), &reporter));
        assert!(!valid_unix_time("meas_time", &Bson::Double(f64::NAN), &reporter));
    }

    #[test]
    fn test_valid_date_time() {
        let reporter = Reporter::default();
        for good in [
            "2022-05-01",
            "2017-01-01",
            "2022-05-01T12:30:00",
            "2022-05-01 12:30:00.250",
            "2022-05-01 12:30",
            "2022-05-01T12:30:00Z",
            "2022-05-01T12:30:00+02:00",
        ] {
            assert!(
                valid_date_time("production_date", &Bson::String(good.into()), &reporter),
                "{good}"
            );
        }
        for bad in ["2016-12-31", "05/01/2022", "2022-13-01", "2099-01-01", "2022-05-01x"] {
            assert!(
                !valid_date_time("production_date", &Bson::String(bad.into()), &reporter),
                "{bad}"
            );
        }
        assert!(!valid_date_time("production_date", &Bson::Int32(2022), &reporter));
    }

    #[test]
    fn test_parse_date_time_ordering() {
        let a = parse_date_time("2022-05-01").unwrap();
        let b = parse_date_time("2022-05-01T00:00:01").unwrap();
        assert!(a < b);
        let z = parse_date_time("2022-05-01T02:00:00+02:00").unwrap();
        assert_eq!(z, a);
    }

    #[test]
    fn test_compare_date_strings_uses_instants() {
        // 12:00+09:00 is 03:00Z, earlier than 05:00Z despite sorting later as text
        assert_eq!(
            compare_date_strings("2022-05-01T12:00:00+09:00", "2022-05-01T05:00:00Z"),
            Ordering::Less
        );
        assert_eq!(
            compare_date_strings("2022-05-01T02:00:00+02:00", "2022-05-01"),
            Ordering::Equal
        );
        assert_eq!(compare_date_strings("garbage-b", "garbage-a"), Ordering::Greater);
    }

    #[test]
    fn test_string_classes() {
        assert!(is_hex_string("deadBEEF01"));
        assert!(!is_hex_string("0xdeadbeef"));
        assert!(!is_hex_string(""));
        assert!(is_alpha_num("abc123"));
        assert!(!is_alpha_num("abc_123"));
        assert!(is_alpha_num_underscore("abc_123"));
        assert!(!is_alpha_num_underscore("abc-123"));
        assert!(is_alpha_num_hyphen_underscore("abc-123_x"));
        assert!(!is_alpha_num_hyphen_underscore("abc 123"));
    }

    #[test]
    fn test_is_instance_composites() {
        let lod = bson!([{ "a": 1 }, { "b": 2 }]);
        assert!(is_instance(&lod, &[TypeTag::ListOfDicts]));
        assert!(!is_instance(&bson!([{ "a": 1 }, 2]), &[TypeTag::ListOfDicts]));
        assert!(is_instance(&bson!([[1, 2], [3, 4]]), &[TypeTag::List2d]));
        assert!(!is_instance(&bson!([1, 2]), &[TypeTag::List2d]));
        assert!(is_instance(&Bson::Double(1.5e9), &[TypeTag::UnixTime]));
        assert!(!is_instance(&Bson::Int64(1_500_000_000), &[TypeTag::UnixTime]));
        assert!(is_instance(&Bson::Int32(3), &[TypeTag::Float, TypeTag::Int]));
        assert!(is_instance(&Bson::Double(3.0), &[TypeTag::Number]));
        assert!(!is_instance(&Bson::String("3".into()), &[TypeTag::Number]));
    }

    #[test]
    fn test_type_tag_names() {
        let tags: Vec<TypeTag> = serde_json::from_str(r#"["int", "list-of-dicts"]"#).unwrap();
        assert_eq!(tags, vec![TypeTag::Int, TypeTag::ListOfDicts]);
        assert_eq!(tag_names(&tags), "int|list-of-dicts");
    }

    #[test]
    fn test_value_predicates() {
        assert!(not_nan_inf(1.0));
        assert!(!not_nan_inf(f64::INFINITY));
        assert!(!not_nan_inf(f64::NAN));
        assert!(no_hyphen("device_type"));
        assert!(!no_hyphen("device-type"));
        assert!(not_empty_string("x"));
        assert!(!not_empty_string("   "));
    }

    #[test]
    fn test_duplicates() {
        let reporter = Reporter::default();
        let values = vec![bson!("a"), bson!("b"), bson!("a"), bson!("a")];
        assert_eq!(find_duplicates(&values), vec![bson!("a")]);
        assert!(!no_duplicates("uids", &values, &reporter));
        assert!(reporter.contains("duplicate value"));
        assert!(no_duplicates("uids", &[bson!(1), bson!(2)], &reporter));
    }
}
