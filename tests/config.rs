use std::collections::HashMap;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use marine_tracker::config::{
    Config, ConfigLoader, DEFAULT_OBIS_BASE_URL, DEFAULT_WORMS_BASE_URL, Environment,
};
use marine_tracker::domain::Geometry;
use marine_tracker::error::TrackerError;

#[derive(Default)]
struct FakeEnv(HashMap<&'static str, &'static str>);

impl Environment for FakeEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|value| value.to_string())
    }
}

fn with_db(config: Config) -> Config {
    Config {
        database_path: Some("/tmp/marine/observations.sqlite3".to_string()),
        ..config
    }
}

#[test]
fn defaults_match_upstream_settings() {
    let resolved = ConfigLoader::resolve_config(with_db(Config::default()), &FakeEnv::default())
        .unwrap();
    assert_eq!(resolved.obis.base_url, DEFAULT_OBIS_BASE_URL);
    assert_eq!(resolved.obis.page_size, 500);
    assert_eq!(resolved.obis.timeout, Duration::from_secs(30));
    assert_eq!(resolved.worms.base_url, DEFAULT_WORMS_BASE_URL);
    assert_eq!(resolved.worms.timeout, Duration::from_secs(10));
    assert_eq!(resolved.default_geometry, Geometry::global());
    assert_eq!(resolved.default_max_pages, 1);
    assert_eq!(resolved.incremental_days, 30);
    assert_eq!(resolved.window_days, None);
    assert_eq!(resolved.page_delay, Duration::from_millis(100));
}

#[test]
fn load_json_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("marine-tracker.json");
    std::fs::write(
        &path,
        r#"{
            "obis_base_url": "http://localhost:9000/v3",
            "obis_page_size": 100,
            "default_geometry": "POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))",
            "default_max_pages": 4,
            "window_days": 7,
            "page_delay_ms": 0,
            "database_path": "data/obs.sqlite3"
        }"#,
    )
    .unwrap();

    let config = ConfigLoader::load(path.to_str()).unwrap();
    let resolved = ConfigLoader::resolve_config(config, &FakeEnv::default()).unwrap();
    assert_eq!(resolved.obis.base_url, "http://localhost:9000/v3");
    assert_eq!(resolved.obis.page_size, 100);
    assert_eq!(
        resolved.default_geometry.as_str(),
        "POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))"
    );
    assert_eq!(resolved.default_max_pages, 4);
    assert_eq!(resolved.window_days, Some(7));
    assert_eq!(resolved.page_delay, Duration::ZERO);
    assert_eq!(resolved.database_path, Utf8PathBuf::from("data/obs.sqlite3"));
}

#[test]
fn environment_wins_over_file() {
    let config = with_db(Config {
        obis_base_url: Some("http://file/".to_string()),
        default_max_pages: Some(2),
        ..Config::default()
    });
    let env = FakeEnv(HashMap::from([
        ("OBIS_API_BASE_URL", "http://env/"),
        ("OBIS_DEFAULT_FETCH_PAGES", "9"),
        ("WORMS_API_BASE_URL", "http://worms-env/rest"),
        ("MARINE_TRACKER_DB", "/var/lib/marine.sqlite3"),
    ]));

    let resolved = ConfigLoader::resolve_config(config, &env).unwrap();
    assert_eq!(resolved.obis.base_url, "http://env/");
    assert_eq!(resolved.default_max_pages, 9);
    assert_eq!(resolved.worms.base_url, "http://worms-env/rest");
    assert_eq!(
        resolved.database_path,
        Utf8PathBuf::from("/var/lib/marine.sqlite3")
    );
}

#[test]
fn invalid_values_are_rejected() {
    let zero_size = with_db(Config {
        obis_page_size: Some(0),
        ..Config::default()
    });
    assert_matches!(
        ConfigLoader::resolve_config(zero_size, &FakeEnv::default()),
        Err(TrackerError::ConfigParse(_))
    );

    let env = FakeEnv(HashMap::from([("OBIS_API_DEFAULT_SIZE", "many")]));
    assert_matches!(
        ConfigLoader::resolve_config(with_db(Config::default()), &env),
        Err(TrackerError::ConfigParse(_))
    );

    let env = FakeEnv(HashMap::from([("OBIS_DEFAULT_GEOMETRY", "POINT(1 2)")]));
    assert_matches!(
        ConfigLoader::resolve_config(with_db(Config::default()), &env),
        Err(TrackerError::InvalidGeometry(_))
    );
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::load(missing.to_str()),
        Err(TrackerError::ConfigRead(_))
    );
}

#[test]
fn malformed_file_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("marine-tracker.json");
    std::fs::write(&path, "{ \"obis_page_size\": \"lots\" }").unwrap();
    assert_matches!(
        ConfigLoader::load(path.to_str()),
        Err(TrackerError::ConfigParse(_))
    );
}

#[test]
fn zero_page_counts_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("marine-tracker.json");
    std::fs::write(&path, r#"{ "default_max_pages": 0 }"#).unwrap();
    let config = with_db(ConfigLoader::load(path.to_str()).unwrap());
    assert_matches!(
        ConfigLoader::resolve_config(config, &FakeEnv::default()),
        Err(TrackerError::ConfigParse(message)) if message.contains("default_max_pages")
    );

    let env = FakeEnv(HashMap::from([("OBIS_DEFAULT_FETCH_PAGES", "0")]));
    assert_matches!(
        ConfigLoader::resolve_config(with_db(Config::default()), &env),
        Err(TrackerError::ConfigParse(_))
    );

    let zero_window = with_db(Config {
        window_days: Some(0),
        ..Config::default()
    });
    assert_matches!(
        ConfigLoader::resolve_config(zero_window, &FakeEnv::default()),
        Err(TrackerError::ConfigParse(_))
    );
}
