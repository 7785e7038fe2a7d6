//! Turns raw beacon/search records into display rows.
//!
//! Addresses arrive as `{host, port}` objects, timestamps as Unix seconds and
//! beacon continuity as optional `prev`/`next` sequence objects. Everything is
//! rewritten in place into strings the table renderer can drop into cells.

use std::fmt::{Display, Write};
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde_json::Value;

use crate::live_table::Mangle;
use crate::payload::{PageData, Record};

const MS_PER_DAY: i64 = 86_400_000;
const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_MINUTE: i64 = 60_000;

pub const ABSOLUTE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fields rewritten from Unix seconds to absolute local time.
const ABSOLUTE_TIME_FIELDS: [&str; 2] = ["seenFirst", "time"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOptions {
    /// Record field holding the `{host, port}` address.
    pub address_key: String,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            address_key: "source".to_string(),
        }
    }
}

/// Classification of a beacon address between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Appears { next: String },
    Disappears { prev: String },
    Glitch { prev: String, next: String },
}

impl Presence {
    pub fn classify(prev: Option<&Value>, next: Option<&Value>) -> Option<Self> {
        match (prev, next) {
            (None, None) => None,
            (None, Some(next)) => Some(Presence::Appears {
                next: seq_text(next),
            }),
            (Some(prev), None) => Some(Presence::Disappears {
                prev: seq_text(prev),
            }),
            (Some(prev), Some(next)) => Some(Presence::Glitch {
                prev: seq_text(prev),
                next: seq_text(next),
            }),
        }
    }

    pub fn event(&self) -> &'static str {
        match self {
            Presence::Appears { .. } => "Appears",
            Presence::Disappears { .. } => "Disappears",
            Presence::Glitch { .. } => "Glitch",
        }
    }

    pub fn beacon(&self) -> String {
        match self {
            Presence::Appears { next } => format!("X -> {next}"),
            Presence::Disappears { prev } => format!("{prev} -> X"),
            Presence::Glitch { prev, next } => format!("{prev} -> {next}"),
        }
    }
}

/// Formats an age in milliseconds as `[<d> days ] <h>:<mm>:<ss.s>`.
///
/// Hours are not padded and never roll over into days beyond what the day
/// count already carries. Negative ages (clock skew) read as zero.
pub fn rel_time_string(ms: i64) -> String {
    let ms = ms.max(0);
    let days = ms / MS_PER_DAY;
    let rem = ms % MS_PER_DAY;
    let hours = rem / MS_PER_HOUR;
    let rem = rem % MS_PER_HOUR;
    let minutes = rem / MS_PER_MINUTE;
    let seconds = (rem % MS_PER_MINUTE) as f64 / 1000.0;

    let mut out = String::new();
    if days > 0 {
        let _ = write!(out, "{days} days ");
    }
    let _ = write!(out, " {hours}:{minutes:02}:{seconds:04.1}");
    out
}

/// Local 24-hour rendering of a Unix timestamp in seconds.
pub fn abs_time_string(unix_seconds: f64) -> Option<String> {
    abs_time_string_in(unix_seconds, &Local)
}

pub fn abs_time_string_in<Tz>(unix_seconds: f64, tz: &Tz) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if !unix_seconds.is_finite() {
        return None;
    }
    let millis = (unix_seconds * 1000.0).round() as i64;
    let utc = DateTime::<Utc>::from_timestamp_millis(millis)?;
    Some(
        utc.with_timezone(tz)
            .format(ABSOLUTE_TIME_FORMAT)
            .to_string(),
    )
}

/// Rewrites one record for display, relative to `now_ms` (Unix milliseconds).
pub fn transform_record(record: &mut Record, options: &TransformOptions, now_ms: i64) {
    if let Some(address) = record.get(&options.address_key).and_then(flatten_address) {
        record.insert(options.address_key.clone(), Value::String(address));
    }

    if let Some(age) = record
        .get("seenLast")
        .and_then(Value::as_f64)
        .and_then(|seen_last| age_ms(now_ms, seen_last))
    {
        record.insert("age".to_string(), Value::String(rel_time_string(age)));
    }

    for field in ABSOLUTE_TIME_FIELDS {
        if let Some(text) = record
            .get(field)
            .and_then(Value::as_f64)
            .and_then(abs_time_string)
        {
            record.insert(field.to_string(), Value::String(text));
        }
    }

    if let Some(presence) = Presence::classify(record.get("prev"), record.get("next")) {
        record.insert("event".to_string(), Value::from(presence.event()));
        record.insert("beacon".to_string(), Value::String(presence.beacon()));
    }
}

/// Milliseconds between `now_ms` and a Unix-seconds timestamp, saturating at
/// the `i64` range. `None` for NaN and infinities.
fn age_ms(now_ms: i64, seen_last: f64) -> Option<i64> {
    if !seen_last.is_finite() {
        return None;
    }
    // float to int casts saturate
    Some(now_ms.saturating_sub((seen_last * 1000.0).round() as i64))
}

pub fn transform_records(records: &mut [Record], options: &TransformOptions, now: DateTime<Utc>) {
    let now_ms = now.timestamp_millis();
    for record in records {
        transform_record(record, options, now_ms);
    }
}

/// The transformation used by the CA beacon and search lists, as a [`Mangle`].
pub fn ca_mangler(options: TransformOptions) -> Mangle {
    Arc::new(move |mut data: PageData| {
        transform_records(&mut data.object_list, &options, Utc::now());
        data
    })
}

fn flatten_address(value: &Value) -> Option<String> {
    let host = value.get("host")?;
    let port = value.get("port")?;
    Some(format!("{}:{}", scalar_text(host), scalar_text(port)))
}

fn seq_text(value: &Value) -> String {
    value
        .get("seq")
        .map(scalar_text)
        .unwrap_or_else(|| "?".to_string())
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
