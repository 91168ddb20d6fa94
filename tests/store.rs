use std::collections::BTreeSet;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;

use marine_tracker::domain::{CuratedObservation, GeoPoint, OBIS_SOURCE, Sex, ValidationStatus};
use marine_tracker::error::TrackerError;
use marine_tracker::geo::{BoundingBox, RadiusFilter};
use marine_tracker::store::{ObservationQuery, ObservationStore, SqliteStore};

fn observation(obis_id: &str, longitude: f64, latitude: f64, day: u32) -> CuratedObservation {
    let datetime = Utc.with_ymd_and_hms(2024, 5, day, 9, 30, 0).unwrap();
    CuratedObservation {
        obis_id: obis_id.to_string(),
        source: OBIS_SOURCE.to_string(),
        species_name: "Gadus morhua".to_string(),
        common_name: Some("Atlantic Cod".to_string()),
        observation_date: Some(datetime.date_naive()),
        observation_datetime: Some(datetime),
        location: Some(GeoPoint {
            longitude,
            latitude,
        }),
        location_name: Some("North Sea survey".to_string()),
        machine_observation: Some("Human Observation".to_string()),
        validated: ValidationStatus::Validated,
        depth_min: Some(10.0),
        depth_max: Some(25.0),
        bathymetry: None,
        temperature: Some(8.5),
        visibility: None,
        notes: Some("Imported from OBIS dataset: North Sea survey".to_string()),
        sex: Sex::Female,
        raw_data: json!({"id": obis_id, "decimalLongitude": longitude, "decimalLatitude": latitude}),
    }
}

fn ids(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn create_and_read_back() {
    let store = SqliteStore::open_in_memory().unwrap();
    let original = observation("obs-1", 3.2, 54.1, 4);

    let id = store
        .transaction(|writer| writer.create(&original))
        .unwrap();
    assert!(id > 0);
    assert_eq!(store.count().unwrap(), 1);

    let stored = store
        .get_by_external_id(OBIS_SOURCE, "obs-1")
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, id);
    assert_eq!(stored.observation, original);
    assert_eq!(
        stored.observation.observation_date,
        NaiveDate::from_ymd_opt(2024, 5, 4)
    );

    assert!(store.get_by_external_id("other", "obs-1").unwrap().is_none());
}

#[test]
fn exists_returns_stored_subset() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .transaction(|writer| {
            writer.create(&observation("a", 0.0, 0.0, 1))?;
            writer.create(&observation("b", 0.0, 0.0, 2))
        })
        .unwrap();

    let found = store
        .exists_by_external_id(OBIS_SOURCE, &ids(&["a", "b", "c"]))
        .unwrap();
    assert_eq!(found, ids(&["a", "b"]));
    assert!(
        store
            .exists_by_external_id("inaturalist", &ids(&["a"]))
            .unwrap()
            .is_empty()
    );
    assert!(
        store
            .exists_by_external_id(OBIS_SOURCE, &BTreeSet::new())
            .unwrap()
            .is_empty()
    );
}

#[test]
fn exists_handles_large_id_sets() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .transaction(|writer| writer.create(&observation("id-1199", 0.0, 0.0, 1)))
        .unwrap();
    let many = (0..1200).map(|i| format!("id-{i}")).collect::<BTreeSet<_>>();
    let found = store.exists_by_external_id(OBIS_SOURCE, &many).unwrap();
    assert_eq!(found, ids(&["id-1199"]));
}

#[test]
fn duplicate_key_is_reported() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .transaction(|writer| writer.create(&observation("dup", 1.0, 1.0, 1)))
        .unwrap();

    let result = store.transaction(|writer| writer.create(&observation("dup", 1.0, 1.0, 1)));
    assert_matches!(
        result,
        Err(TrackerError::DuplicateObservation { obis_id, .. }) if obis_id == "dup"
    );
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn failed_transaction_rolls_back() {
    let store = SqliteStore::open_in_memory().unwrap();
    let result: Result<(), TrackerError> = store.transaction(|writer| {
        writer.create(&observation("first", 1.0, 1.0, 1))?;
        writer.create(&observation("second", 1.0, 1.0, 2))?;
        Err(TrackerError::Storage("boom".to_string()))
    });
    assert_matches!(result, Err(TrackerError::Storage(message)) if message == "boom");
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn list_filters_by_bbox_and_orders_newest_first() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .transaction(|writer| {
            writer.create(&observation("north-sea-old", 3.0, 55.0, 1))?;
            writer.create(&observation("north-sea-new", 4.0, 56.0, 20))?;
            writer.create(&observation("gulf-of-maine", -69.0, 43.0, 10))
        })
        .unwrap();

    let query = ObservationQuery {
        bbox: Some(BoundingBox::new(-5.0, 50.0, 10.0, 60.0).unwrap()),
        ..ObservationQuery::default()
    };
    let listed = store.list(&query).unwrap();
    let listed_ids = listed
        .iter()
        .map(|item| item.observation.obis_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(listed_ids, vec!["north-sea-new", "north-sea-old"]);

    let page = store
        .list(&ObservationQuery {
            limit: Some(1),
            offset: 1,
            ..ObservationQuery::default()
        })
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].observation.obis_id, "gulf-of-maine");
}

#[test]
fn list_filters_by_radius() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .transaction(|writer| {
            writer.create(&observation("near", -70.0, 42.1, 1))?;
            writer.create(&observation("corner", -69.4, 42.45, 2))?;
            writer.create(&observation("far", -60.0, 42.0, 3))
        })
        .unwrap();

    let center = GeoPoint {
        longitude: -70.0,
        latitude: 42.0,
    };
    let query = ObservationQuery {
        radius: Some(RadiusFilter::new(center, 30.0).unwrap()),
        ..ObservationQuery::default()
    };
    let listed = store.list(&query).unwrap();
    let listed_ids = listed
        .iter()
        .map(|item| item.observation.obis_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(listed_ids, vec!["near"]);
}

#[test]
fn radius_listing_keeps_points_on_the_circle_edge() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .transaction(|writer| {
            writer.create(&observation("north-edge", 0.0, 8.99, 1))?;
            writer.create(&observation("beyond-edge", 0.0, 9.1, 2))?;
            writer.create(&observation("high-lat-east", 19.0, 60.3, 3))
        })
        .unwrap();

    let equator = ObservationQuery {
        radius: Some(
            RadiusFilter::new(
                GeoPoint {
                    longitude: 0.0,
                    latitude: 0.0,
                },
                1000.0,
            )
            .unwrap(),
        ),
        ..ObservationQuery::default()
    };
    let listed = store.list(&equator).unwrap();
    let listed_ids = listed
        .iter()
        .map(|item| item.observation.obis_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(listed_ids, vec!["north-edge"]);

    let northern = ObservationQuery {
        radius: Some(
            RadiusFilter::new(
                GeoPoint {
                    longitude: 10.0,
                    latitude: 60.0,
                },
                500.0,
            )
            .unwrap(),
        ),
        ..ObservationQuery::default()
    };
    let listed = store.list(&northern).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].observation.obis_id, "high-lat-east");
}

#[test]
fn file_backed_store_persists() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("nested/observations.sqlite3")).unwrap();

    {
        let store = SqliteStore::open(&path).unwrap();
        store
            .transaction(|writer| writer.create(&observation("kept", 2.0, 2.0, 1)))
            .unwrap();
    }

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(reopened.count().unwrap(), 1);
    assert!(
        reopened
            .get_by_external_id(OBIS_SOURCE, "kept")
            .unwrap()
            .is_some()
    );
}
