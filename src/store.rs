use std::collections::BTreeSet;
use std::fs;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use camino::Utf8Path;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;

use crate::domain::{CuratedObservation, GeoPoint, ValidationStatus};
use crate::error::TrackerError;
use crate::geo::{BoundingBox, RadiusFilter};
use crate::normalize::standardize_sex;

// SQLite's historical bound on host parameters is 999.
const EXISTS_CHUNK: usize = 500;

/// Write access handed out inside [`ObservationStore::transaction`].
pub trait ObservationWriter {
    fn create(&mut self, observation: &CuratedObservation) -> Result<i64, TrackerError>;
}

/// The curated observation table as seen by the ingestion pipeline.
pub trait ObservationStore: Send + Sync {
    /// Subset of `ids` already stored under `source`.
    fn exists_by_external_id(
        &self,
        source: &str,
        ids: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, TrackerError>;

    /// Runs `work` atomically: everything it creates is committed when it
    /// returns `Ok`, and nothing is when it returns `Err`.
    fn transaction<T, F>(&self, work: F) -> Result<T, TrackerError>
    where
        F: FnOnce(&mut dyn ObservationWriter) -> Result<T, TrackerError>;
}

#[derive(Debug, Clone, Default)]
pub struct ObservationQuery {
    pub bbox: Option<BoundingBox>,
    pub radius: Option<RadiusFilter>,
    pub source: Option<String>,
    pub limit: Option<u32>,
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredObservation {
    pub id: i64,
    #[serde(flatten)]
    pub observation: CuratedObservation,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Utf8Path) -> Result<Self, TrackerError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| TrackerError::Filesystem(format!("create {parent}: {err}")))?;
        }
        let conn = Connection::open(path.as_std_path())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, TrackerError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, TrackerError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TrackerError> {
        self.conn
            .lock()
            .map_err(|err| TrackerError::Storage(format!("connection lock poisoned: {err}")))
    }

    pub fn count(&self) -> Result<u64, TrackerError> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM curated_observations", [], |row| {
                row.get(0)
            })?;
        Ok(count.max(0) as u64)
    }

    pub fn get_by_external_id(
        &self,
        source: &str,
        obis_id: &str,
    ) -> Result<Option<StoredObservation>, TrackerError> {
        let conn = self.lock()?;
        let sql = format!("{SELECT_COLUMNS} WHERE source = ?1 AND obis_id = ?2");
        let row = conn
            .query_row(&sql, params![source, obis_id], ObservationRow::read)
            .optional()?;
        row.map(ObservationRow::into_stored).transpose()
    }

    /// Observations matching the query, newest event first. A radius filter
    /// narrows with its bounding box in SQL and then by great-circle distance.
    pub fn list(&self, query: &ObservationQuery) -> Result<Vec<StoredObservation>, TrackerError> {
        let mut clauses = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(source) = &query.source {
            values.push(SqlValue::Text(source.clone()));
            clauses.push(format!("source = ?{}", values.len()));
        }
        let boxes = query
            .bbox
            .into_iter()
            .chain(query.radius.map(|radius| radius.bounding_box()));
        for bbox in boxes {
            for (column, op, bound) in [
                ("longitude", ">=", bbox.min_lon),
                ("longitude", "<=", bbox.max_lon),
                ("latitude", ">=", bbox.min_lat),
                ("latitude", "<=", bbox.max_lat),
            ] {
                values.push(SqlValue::Real(bound));
                clauses.push(format!("{column} {op} ?{}", values.len()));
            }
        }

        let mut sql = SELECT_COLUMNS.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY observation_datetime DESC, id DESC");
        if query.radius.is_none() {
            values.push(SqlValue::Integer(query.limit.map_or(-1, i64::from)));
            values.push(SqlValue::Integer(i64::from(query.offset)));
            sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", values.len() - 1, values.len()));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values), ObservationRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let stored = rows
            .into_iter()
            .map(ObservationRow::into_stored)
            .collect::<Result<Vec<_>, _>>()?;

        match &query.radius {
            None => Ok(stored),
            Some(radius) => {
                let limit = query.limit.map_or(usize::MAX, |limit| limit as usize);
                Ok(stored
                    .into_iter()
                    .filter(|item| {
                        item.observation
                            .location
                            .is_some_and(|point| radius.contains(&point))
                    })
                    .skip(query.offset as usize)
                    .take(limit)
                    .collect())
            }
        }
    }
}

impl ObservationStore for SqliteStore {
    fn exists_by_external_id(
        &self,
        source: &str,
        ids: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, TrackerError> {
        let conn = self.lock()?;
        let ids = ids.iter().collect::<Vec<_>>();
        let mut found = BTreeSet::new();
        for chunk in ids.chunks(EXISTS_CHUNK) {
            let placeholders = (0..chunk.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT obis_id FROM curated_observations WHERE source = ?1 AND obis_id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let params = std::iter::once(source).chain(chunk.iter().map(|id| id.as_str()));
            let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
                row.get::<_, String>(0)
            })?;
            for row in rows {
                found.insert(row?);
            }
        }
        Ok(found)
    }

    fn transaction<T, F>(&self, work: F) -> Result<T, TrackerError>
    where
        F: FnOnce(&mut dyn ObservationWriter) -> Result<T, TrackerError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = {
            let mut writer = SqliteWriter { conn: &*tx };
            work(&mut writer)
        };
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::error!(error = %rollback_err, cause = %err, "failed to roll back transaction");
                }
                Err(err)
            }
        }
    }
}

struct SqliteWriter<'a> {
    conn: &'a Connection,
}

impl ObservationWriter for SqliteWriter<'_> {
    fn create(&mut self, observation: &CuratedObservation) -> Result<i64, TrackerError> {
        let raw_data = serde_json::to_string(&observation.raw_data)
            .map_err(|err| TrackerError::Storage(err.to_string()))?;
        let result = self.conn.execute(
            r#"
            INSERT INTO curated_observations (
                obis_id, source, species_name, common_name,
                observation_date, observation_datetime, longitude, latitude,
                location_name, machine_observation, validated,
                depth_min, depth_max, bathymetry, temperature, visibility,
                notes, sex, raw_data, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
            "#,
            params![
                observation.obis_id,
                observation.source,
                observation.species_name,
                observation.common_name,
                observation
                    .observation_date
                    .map(|date| date.format("%Y-%m-%d").to_string()),
                observation.observation_datetime.map(format_instant),
                observation.location.map(|point| point.longitude),
                observation.location.map(|point| point.latitude),
                observation.location_name,
                observation.machine_observation,
                observation.validated.as_str(),
                observation.depth_min,
                observation.depth_max,
                observation.bathymetry,
                observation.temperature,
                observation.visibility,
                observation.notes,
                observation.sex.as_str(),
                raw_data,
                format_instant(Utc::now()),
            ],
        );
        match result {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == ErrorCode::ConstraintViolation
                    && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(TrackerError::DuplicateObservation {
                    source_tag: observation.source.clone(),
                    obis_id: observation.obis_id.clone(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, obis_id, source, species_name, common_name, \
    observation_date, observation_datetime, longitude, latitude, location_name, \
    machine_observation, validated, depth_min, depth_max, bathymetry, temperature, \
    visibility, notes, sex, raw_data FROM curated_observations";

struct ObservationRow {
    id: i64,
    obis_id: String,
    source: String,
    species_name: String,
    common_name: Option<String>,
    observation_date: Option<String>,
    observation_datetime: Option<String>,
    longitude: Option<f64>,
    latitude: Option<f64>,
    location_name: Option<String>,
    machine_observation: Option<String>,
    validated: String,
    depth_min: Option<f64>,
    depth_max: Option<f64>,
    bathymetry: Option<f64>,
    temperature: Option<f64>,
    visibility: Option<f64>,
    notes: Option<String>,
    sex: Option<String>,
    raw_data: Option<String>,
}

impl ObservationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            obis_id: row.get(1)?,
            source: row.get(2)?,
            species_name: row.get(3)?,
            common_name: row.get(4)?,
            observation_date: row.get(5)?,
            observation_datetime: row.get(6)?,
            longitude: row.get(7)?,
            latitude: row.get(8)?,
            location_name: row.get(9)?,
            machine_observation: row.get(10)?,
            validated: row.get(11)?,
            depth_min: row.get(12)?,
            depth_max: row.get(13)?,
            bathymetry: row.get(14)?,
            temperature: row.get(15)?,
            visibility: row.get(16)?,
            notes: row.get(17)?,
            sex: row.get(18)?,
            raw_data: row.get(19)?,
        })
    }

    fn into_stored(self) -> Result<StoredObservation, TrackerError> {
        let observation_date = self
            .observation_date
            .map(|value| {
                NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                    .map_err(|err| TrackerError::Storage(format!("bad observation_date {value}: {err}")))
            })
            .transpose()?;
        let observation_datetime = self
            .observation_datetime
            .map(|value| {
                DateTime::parse_from_rfc3339(&value)
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .map_err(|err| {
                        TrackerError::Storage(format!("bad observation_datetime {value}: {err}"))
                    })
            })
            .transpose()?;
        let location = match (self.longitude, self.latitude) {
            (Some(longitude), Some(latitude)) => Some(GeoPoint {
                longitude,
                latitude,
            }),
            _ => None,
        };
        let raw_data = match self.raw_data {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|err| TrackerError::Storage(format!("bad raw_data: {err}")))?,
            None => serde_json::Value::Null,
        };

        Ok(StoredObservation {
            id: self.id,
            observation: CuratedObservation {
                obis_id: self.obis_id,
                source: self.source,
                species_name: self.species_name,
                common_name: self.common_name,
                observation_date,
                observation_datetime,
                location,
                location_name: self.location_name,
                machine_observation: self.machine_observation,
                validated: self.validated.parse::<ValidationStatus>()?,
                depth_min: self.depth_min,
                depth_max: self.depth_max,
                bathymetry: self.bathymetry,
                temperature: self.temperature,
                visibility: self.visibility,
                notes: self.notes,
                sex: standardize_sex(self.sex.as_deref()),
                raw_data,
            },
        })
    }
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn init_schema(conn: &Connection) -> Result<(), TrackerError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS curated_observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            obis_id TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'OBIS',

            species_name TEXT NOT NULL,
            common_name TEXT,

            observation_date TEXT,
            observation_datetime TEXT,
            longitude REAL,
            latitude REAL,
            location_name TEXT,

            machine_observation TEXT,
            validated TEXT NOT NULL,

            depth_min REAL,
            depth_max REAL,
            bathymetry REAL,
            temperature REAL,
            visibility REAL,
            notes TEXT,
            sex TEXT NOT NULL DEFAULT 'unknown',

            raw_data TEXT,  -- JSON
            created_at TEXT NOT NULL,

            UNIQUE (obis_id, source)
        );
        CREATE INDEX IF NOT EXISTS idx_curated_location ON curated_observations(latitude, longitude);
        CREATE INDEX IF NOT EXISTS idx_curated_date ON curated_observations(observation_date);
        CREATE INDEX IF NOT EXISTS idx_curated_source ON curated_observations(source);
        "#,
    )?;
    Ok(())
}
