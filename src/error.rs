use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TrackerError {
    #[error("invalid WKT geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),

    #[error("invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("invalid radius: {0}")]
    InvalidRadius(String),

    #[error("invalid OBIS record id: {0}")]
    InvalidObisId(String),

    #[error("invalid refresh argument: {0}")]
    InvalidArgument(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("OBIS request failed: {0}")]
    ObisHttp(String),

    #[error("OBIS returned status {status}: {message}")]
    ObisStatus { status: u16, message: String },

    #[error("failed to decode OBIS response: {0}")]
    ObisDecode(String),

    #[error("WoRMS request failed: {0}")]
    WormsHttp(String),

    #[error("WoRMS returned status {status}: {message}")]
    WormsStatus { status: u16, message: String },

    #[error("failed to decode WoRMS response: {0}")]
    WormsDecode(String),

    #[error("observation store error: {0}")]
    Storage(String),

    #[error("observation already stored: {source_tag}:{obis_id}")]
    DuplicateObservation { source_tag: String, obis_id: String },

    #[error("observation not found: {0}")]
    ObservationNotFound(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> Self {
        TrackerError::Storage(err.to_string())
    }
}
