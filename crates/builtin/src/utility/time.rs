//! Timestamp formatting and duration parsing.

use std::fmt;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use stepkit_action::OperationError;

/// Upper bound for `sleep`.
pub(crate) const MAX_SLEEP: Duration = Duration::from_secs(5 * 60);

/// Reference-date tokens, longest first so `2006` wins over `06`.
const LAYOUT_TOKENS: &[(&str, &str)] = &[
    ("January", "%B"),
    ("Monday", "%A"),
    (".000000000", "%.9f"),
    (".000000", "%.6f"),
    ("Z07:00", "%:z"),
    ("-07:00", "%:z"),
    (".000", "%.3f"),
    ("-0700", "%z"),
    ("2006", "%Y"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("01", "%m"),
    ("02", "%d"),
    ("_2", "%e"),
    ("15", "%H"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("06", "%y"),
    ("PM", "%p"),
];

/// A validated output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum TimeFormat {
    Unix,
    UnixMillis,
    Rfc3339,
    Iso8601,
    Strftime(String),
}

impl TimeFormat {
    pub(super) fn parse(operation: &str, raw: Option<&str>) -> Result<Self, OperationError> {
        let raw = match raw.map(str::trim) {
            None | Some("") => return Ok(Self::Rfc3339),
            Some(raw) => raw,
        };
        match raw.to_ascii_lowercase().as_str() {
            "unix" => return Ok(Self::Unix),
            "unix_ms" => return Ok(Self::UnixMillis),
            "rfc3339" => return Ok(Self::Rfc3339),
            "iso8601" => return Ok(Self::Iso8601),
            _ => {}
        }

        let strftime = if raw.contains('%') {
            raw.to_owned()
        } else {
            translate_layout(raw).ok_or_else(|| {
                OperationError::validation(
                    operation,
                    format!("unknown timestamp format `{raw}`"),
                )
            })?
        };
        if StrftimeItems::new(&strftime).any(|item| matches!(item, Item::Error)) {
            return Err(OperationError::validation(
                operation,
                format!("invalid timestamp format `{raw}`"),
            ));
        }
        Ok(Self::Strftime(strftime))
    }
}

/// Translate a reference-date layout into strftime, or `None` when the
/// layout contains no recognised token.
fn translate_layout(layout: &str) -> Option<String> {
    let mut out = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    let mut recognised = false;
    'outer: while let Some(c) = rest.chars().next() {
        for (token, directive) in LAYOUT_TOKENS {
            if let Some(after) = rest.strip_prefix(token) {
                out.push_str(directive);
                rest = after;
                recognised = true;
                continue 'outer;
            }
        }
        if c == '%' {
            out.push_str("%%");
        } else {
            out.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    recognised.then_some(out)
}

/// Where to render the current time.
#[derive(Debug, Clone, Copy)]
pub(super) enum Zone {
    Utc,
    Local,
    Named(Tz),
}

impl Zone {
    pub(super) fn parse(operation: &str, raw: Option<&str>) -> Result<Self, OperationError> {
        match raw.map(str::trim) {
            None | Some("") | Some("UTC") | Some("utc") => Ok(Self::Utc),
            Some("Local") | Some("local") => Ok(Self::Local),
            Some(name) => name.parse::<Tz>().map(Self::Named).map_err(|_| {
                OperationError::validation(operation, format!("unknown timezone `{name}`"))
            }),
        }
    }

    pub(super) fn name(&self) -> String {
        match self {
            Self::Utc => "UTC".to_owned(),
            Self::Local => "Local".to_owned(),
            Self::Named(tz) => tz.name().to_owned(),
        }
    }
}

pub(super) fn format_now(now: DateTime<Utc>, format: &TimeFormat, zone: Zone) -> Value {
    match zone {
        Zone::Utc => render(now, format),
        Zone::Local => render(now.with_timezone(&Local), format),
        Zone::Named(tz) => render(now.with_timezone(&tz), format),
    }
}

fn render<Z>(at: DateTime<Z>, format: &TimeFormat) -> Value
where
    Z: TimeZone,
    Z::Offset: fmt::Display,
{
    match format {
        TimeFormat::Unix => Value::from(at.timestamp()),
        TimeFormat::UnixMillis => Value::from(at.timestamp_millis()),
        TimeFormat::Rfc3339 => Value::String(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        TimeFormat::Iso8601 => Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        TimeFormat::Strftime(pattern) => Value::String(at.format(pattern).to_string()),
    }
}

/// Parse durations such as `1.5s`, `250ms` or `1m30s`.
pub(crate) fn parse_duration(raw: &str) -> Result<Duration, String> {
    let s = raw.trim();
    if s.is_empty() {
        return Err("duration is empty".to_owned());
    }
    if s.starts_with('-') {
        return Err(format!("duration must not be negative: {raw}"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = s.strip_prefix('+').unwrap_or(s);
    let mut total = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration: {raw}"))?;
        if number_len == 0 {
            return Err(format!("invalid duration: {raw}"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid number in duration: {raw}"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            other => return Err(format!("unknown unit `{other}` in duration: {raw}")),
        };
        rest = &rest[unit_len..];
        total += value * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(format!("duration out of range: {raw}"));
    }
    Ok(Duration::from_nanos(total as u64))
}
