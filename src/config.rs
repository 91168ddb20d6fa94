use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{GLOBAL_POLYGON, Geometry};
use crate::error::TrackerError;

pub const DEFAULT_CONFIG_FILE: &str = "marine-tracker.json";
pub const DEFAULT_OBIS_BASE_URL: &str = "https://api.obis.org/v3/";
pub const DEFAULT_WORMS_BASE_URL: &str = "https://www.marinespecies.org/rest/";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub obis_base_url: Option<String>,
    #[serde(default)]
    pub obis_page_size: Option<u32>,
    #[serde(default)]
    pub obis_timeout_secs: Option<u64>,
    #[serde(default)]
    pub worms_base_url: Option<String>,
    #[serde(default)]
    pub worms_timeout_secs: Option<u64>,
    #[serde(default)]
    pub default_geometry: Option<String>,
    #[serde(default)]
    pub default_max_pages: Option<u32>,
    #[serde(default)]
    pub incremental_days: Option<u32>,
    #[serde(default)]
    pub window_days: Option<u32>,
    #[serde(default)]
    pub page_delay_ms: Option<u64>,
    #[serde(default)]
    pub database_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObisSettings {
    pub base_url: String,
    pub page_size: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WormsSettings {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub obis: ObisSettings,
    pub worms: WormsSettings,
    pub default_geometry: Geometry,
    pub default_max_pages: u32,
    pub incremental_days: u32,
    pub window_days: Option<u32>,
    pub page_delay: Duration,
    pub database_path: Utf8PathBuf,
}

/// Environment lookups are injected so resolution stays testable.
pub trait Environment {
    fn var(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, TrackerError> {
        let config = Self::load(path)?;
        Self::resolve_config(config, &ProcessEnv)
    }

    /// Reads the JSON config. A missing default file means "all defaults";
    /// an explicit path must exist.
    pub fn load(path: Option<&str>) -> Result<Config, TrackerError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TrackerError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| TrackerError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(
        config: Config,
        env: &dyn Environment,
    ) -> Result<ResolvedConfig, TrackerError> {
        let obis_base_url = env
            .var("OBIS_API_BASE_URL")
            .or(config.obis_base_url)
            .unwrap_or_else(|| DEFAULT_OBIS_BASE_URL.to_string());
        let page_size = match env.var("OBIS_API_DEFAULT_SIZE") {
            Some(raw) => parse_positive("OBIS_API_DEFAULT_SIZE", &raw)?,
            None => config.obis_page_size.unwrap_or(500),
        };
        if page_size == 0 {
            return Err(TrackerError::ConfigParse(
                "obis_page_size must be greater than zero".to_string(),
            ));
        }

        let worms_base_url = env
            .var("WORMS_API_BASE_URL")
            .or(config.worms_base_url)
            .unwrap_or_else(|| DEFAULT_WORMS_BASE_URL.to_string());

        let default_geometry = env
            .var("OBIS_DEFAULT_GEOMETRY")
            .or(config.default_geometry)
            .unwrap_or_else(|| GLOBAL_POLYGON.to_string())
            .parse::<Geometry>()?;

        let default_max_pages = match env.var("OBIS_DEFAULT_FETCH_PAGES") {
            Some(raw) => parse_positive("OBIS_DEFAULT_FETCH_PAGES", &raw)?,
            None => config.default_max_pages.unwrap_or(1),
        };
        if default_max_pages == 0 {
            return Err(TrackerError::ConfigParse(
                "default_max_pages must be greater than zero".to_string(),
            ));
        }
        if config.window_days == Some(0) {
            return Err(TrackerError::ConfigParse(
                "window_days must be greater than zero".to_string(),
            ));
        }

        let database_path = match env.var("MARINE_TRACKER_DB").or(config.database_path) {
            Some(path) => Utf8PathBuf::from(path),
            None => default_database_path()?,
        };

        Ok(ResolvedConfig {
            obis: ObisSettings {
                base_url: obis_base_url,
                page_size,
                timeout: Duration::from_secs(config.obis_timeout_secs.unwrap_or(30)),
            },
            worms: WormsSettings {
                base_url: worms_base_url,
                timeout: Duration::from_secs(config.worms_timeout_secs.unwrap_or(10)),
            },
            default_geometry,
            default_max_pages,
            incremental_days: config.incremental_days.unwrap_or(30),
            window_days: config.window_days,
            page_delay: Duration::from_millis(config.page_delay_ms.unwrap_or(100)),
            database_path,
        })
    }
}

pub fn default_database_path() -> Result<Utf8PathBuf, TrackerError> {
    ProjectDirs::from("org", "marine-tracker", "marine-tracker")
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.data_dir().join("observations.sqlite3")).ok()
        })
        .ok_or_else(|| TrackerError::Filesystem("unable to resolve data directory".to_string()))
}

fn parse_positive(key: &str, raw: &str) -> Result<u32, TrackerError> {
    raw.parse::<u32>()
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| TrackerError::ConfigParse(format!("{key} must be a positive integer: {raw}")))
}
