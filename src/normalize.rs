//! Pure conversions from ragged OBIS fields to canonical values.
//!
//! Nothing in here performs I/O (apart from the resolver call made by
//! [`harmonize_common_name`]) and nothing returns an error to the caller:
//! every function produces a best-effort value or `None`.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{OccurrenceRecord, Sex};
use crate::worms::VernacularClient;

static LOWER_UPPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z])([A-Z])").expect("valid regex"));
static ACRONYM_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("valid regex"));
static FUSED_WORDS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)(human)(observation)").expect("valid regex"),
        Regex::new(r"(?i)(machine)(observation)").expect("valid regex"),
        Regex::new(r"(?i)(material)(sample)").expect("valid regex"),
    ]
});
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

// Trailing UTC offset following a time of day, e.g. `T10:00:00+25:00`.
static TRAILING_OFFSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[T\s]\d{1,2}:\d{2}(?::\d{2}(?:[.,]\d+)?)?\s*[+-](\d{2})(?::?(\d{2}))?$")
        .expect("valid regex")
});
static YEAR_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}$").expect("valid regex"));

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f %:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M%:z",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Converts `humanObservation`, `MATERIAL_SAMPLE`, `machineobservation` and
/// friends into `Title Case With Spaces`.
pub fn humanize(input: Option<&str>) -> Option<String> {
    let input = input?;
    if input.is_empty() {
        return None;
    }

    let spaced = input.replace(['_', '-'], " ");
    let spaced = LOWER_UPPER.replace_all(&spaced, "${1} ${2}");
    let spaced = ACRONYM_WORD.replace_all(&spaced, "${1} ${2}");
    let mut spaced = spaced.into_owned();
    for pattern in FUSED_WORDS.iter() {
        spaced = pattern.replace_all(&spaced, "${1} ${2}").into_owned();
    }
    let collapsed = WHITESPACE.replace_all(&spaced, " ");

    let titled = collapsed
        .trim()
        .to_lowercase()
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");

    (!titled.is_empty()).then_some(titled)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Float coercion for untyped upstream values. Non-finite results are
/// treated as unusable.
pub fn to_float(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|value| value.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepthRange {
    pub depth_min: Option<f64>,
    pub depth_max: Option<f64>,
    pub bathymetry: Option<f64>,
}

/// Reconciles `depth`, `minimumDepthInMeters`, `maximumDepthInMeters` and
/// `bathymetry`. A lone reading becomes a zero-width range; bathymetry is
/// never cross-filled.
pub fn reconcile_depth(record: &OccurrenceRecord) -> DepthRange {
    let depth = to_float(record.get("depth"));
    let mut depth_min = to_float(record.get("minimumDepthInMeters"));
    let mut depth_max = to_float(record.get("maximumDepthInMeters"));
    let bathymetry = to_float(record.get("bathymetry"));

    if let Some(depth) = depth {
        depth_min = depth_min.or(Some(depth));
        depth_max = depth_max.or(Some(depth));
    }

    match (depth_min, depth_max) {
        (Some(min), None) => depth_max = Some(min),
        (None, Some(max)) => depth_min = Some(max),
        _ => {}
    }

    DepthRange {
        depth_min,
        depth_max,
        bathymetry,
    }
}

/// Prefers the record's own `vernacularName`; only when it is absent is the
/// resolver asked, using `aphiaID`.
pub fn harmonize_common_name<V>(record: &OccurrenceRecord, resolver: &V) -> Option<String>
where
    V: VernacularClient + ?Sized,
{
    if let Some(name) = record.text("vernacularName") {
        return humanize(Some(&name));
    }
    let aphia_id = record.text("aphiaID")?;
    let resolved = resolver.get_common_name(Some(&aphia_id))?;
    humanize(Some(&resolved))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventDateError {
    #[error("event date is empty")]
    Missing,
    #[error("timezone offset out of range in {0}")]
    ExtremeOffset(String),
    #[error("unrecognised event date {0}")]
    Unparseable(String),
}

/// Parses an `eventDate` into a UTC instant. Naive values are taken as UTC.
/// ISO 8601 intervals (`start/end`) resolve to their start.
pub fn classify_event_date(raw: &str) -> Result<DateTime<Utc>, EventDateError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EventDateError::Missing);
    }
    match parse_instant(trimmed) {
        Err(EventDateError::Unparseable(_)) if trimmed.contains('/') => {
            let start = trimmed.split('/').next().unwrap_or_default().trim();
            parse_instant(start).map_err(|err| match err {
                EventDateError::Unparseable(_) => EventDateError::Unparseable(raw.to_string()),
                other => other,
            })
        }
        other => other,
    }
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, EventDateError> {
    if let Some(caps) = TRAILING_OFFSET.captures(value) {
        let hours = caps[1].parse::<u32>().unwrap_or(u32::MAX);
        let minutes = caps
            .get(2)
            .map(|m| m.as_str().parse::<u32>().unwrap_or(u32::MAX))
            .unwrap_or(0);
        if hours >= 24 || minutes >= 60 {
            return Err(EventDateError::ExtremeOffset(value.to_string()));
        }
    }

    let with_offset = match value.strip_suffix(['Z', 'z']) {
        Some(head) => format!("{head}+00:00"),
        None => value.to_string(),
    };
    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(&with_offset, format) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed.and_utc());
        }
    }

    let date = DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .or_else(|| {
            YEAR_MONTH
                .is_match(value)
                .then(|| NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").ok())
                .flatten()
        });
    date.and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| EventDateError::Unparseable(value.to_string()))
}

/// `(datetime, date)` for an `eventDate`, logging why a value was dropped.
pub fn parse_event_date(
    obis_id: &str,
    raw: Option<&str>,
) -> (Option<DateTime<Utc>>, Option<NaiveDate>) {
    let raw = raw.unwrap_or_default();
    match classify_event_date(raw) {
        Ok(instant) => (Some(instant), Some(instant.date_naive())),
        Err(EventDateError::Missing) => {
            tracing::debug!(obis_id, "record has no eventDate; date fields left empty");
            (None, None)
        }
        Err(EventDateError::ExtremeOffset(_)) => {
            tracing::warn!(
                obis_id,
                event_date = raw,
                "eventDate has an out-of-range timezone offset; date fields left empty"
            );
            (None, None)
        }
        Err(err) => {
            tracing::warn!(obis_id, event_date = raw, error = %err, "could not parse eventDate");
            (None, None)
        }
    }
}

pub fn standardize_sex(value: Option<&str>) -> Sex {
    let Some(value) = value else {
        return Sex::Unknown;
    };
    match value.trim().to_lowercase().as_str() {
        "male" | "m" => Sex::Male,
        "female" | "f" => Sex::Female,
        _ => Sex::Unknown,
    }
}
