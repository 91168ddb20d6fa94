use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TrackerError;

/// Source tag written on every record produced by the OBIS pipeline.
pub const OBIS_SOURCE: &str = "OBIS";

pub const GLOBAL_POLYGON: &str = "POLYGON((-180 -90, 180 -90, 180 90, -180 90, -180 -90))";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    Full,
    Incremental,
}

impl fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshMode::Full => write!(f, "full"),
            RefreshMode::Incremental => write!(f, "incremental"),
        }
    }
}

impl FromStr for RefreshMode {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "full" => Ok(RefreshMode::Full),
            "incremental" => Ok(RefreshMode::Incremental),
            _ => Err(TrackerError::InvalidArgument(format!(
                "unknown refresh mode: {value}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObisId(String);

impl ObisId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObisId {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
            return Err(TrackerError::InvalidObisId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// A WKT `POLYGON`/`MULTIPOLYGON` used as the OBIS spatial filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry(String);

impl Geometry {
    pub fn global() -> Self {
        Self(GLOBAL_POLYGON.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Geometry {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let upper = normalized.to_uppercase();
        let body = upper
            .strip_prefix("MULTIPOLYGON")
            .or_else(|| upper.strip_prefix("POLYGON"))
            .map(str::trim_start)
            .ok_or_else(|| TrackerError::InvalidGeometry(value.to_string()))?;
        if !body.starts_with("((") || !body.ends_with("))") {
            return Err(TrackerError::InvalidGeometry(value.to_string()));
        }

        let mut depth = 0i32;
        for ch in body.chars() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(TrackerError::InvalidGeometry(value.to_string()));
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(TrackerError::InvalidGeometry(value.to_string()));
        }

        let coordinates_ok = body
            .split(|ch| matches!(ch, '(' | ')' | ','))
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .all(|pair| {
                let parts = pair.split_whitespace().collect::<Vec<_>>();
                parts.len() == 2 && parts.iter().all(|part| part.parse::<f64>().is_ok())
            });
        if !coordinates_ok {
            return Err(TrackerError::InvalidGeometry(value.to_string()));
        }

        Ok(Self(normalized.to_string()))
    }
}

/// Calendar date accepted on the command line and sent to OBIS as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IsoDate(NaiveDate);

impl IsoDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for IsoDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for IsoDate {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| TrackerError::InvalidDate(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
    Unknown,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
            Sex::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Validated,
    Rejected,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Validated => "validated",
            ValidationStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for ValidationStatus {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(ValidationStatus::Pending),
            "validated" => Ok(ValidationStatus::Validated),
            "rejected" => Ok(ValidationStatus::Rejected),
            other => Err(TrackerError::Storage(format!(
                "unknown validation status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

/// One raw OBIS occurrence. Every field is optional and untyped upstream, so
/// the record keeps the JSON object as-is and exposes tolerant accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OccurrenceRecord(Map<String, Value>);

impl OccurrenceRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| !value.is_null())
    }

    /// Non-empty text for `key`; numbers are rendered as text.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(value) => {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(value) => Some(value.to_string()),
            Value::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<String> {
        self.text("id")
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Value> for OccurrenceRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedObservation {
    pub obis_id: String,
    pub source: String,
    pub species_name: String,
    pub common_name: Option<String>,
    pub observation_date: Option<NaiveDate>,
    pub observation_datetime: Option<DateTime<Utc>>,
    pub location: Option<GeoPoint>,
    pub location_name: Option<String>,
    pub machine_observation: Option<String>,
    pub validated: ValidationStatus,
    pub depth_min: Option<f64>,
    pub depth_max: Option<f64>,
    pub bathymetry: Option<f64>,
    pub temperature: Option<f64>,
    pub visibility: Option<f64>,
    pub notes: Option<String>,
    pub sex: Sex,
    pub raw_data: Value,
}
