use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use marine_tracker::config::ObisSettings;
use marine_tracker::domain::{GLOBAL_POLYGON, Geometry, OccurrenceRecord};
use marine_tracker::obis::{ObisHttpClient, OccurrenceClient, OccurrenceQuery};

fn settings(server: &MockServer) -> ObisSettings {
    ObisSettings {
        base_url: server.uri(),
        page_size: 2,
        timeout: Duration::from_secs(5),
    }
}

// The blocking reqwest client cannot run on the async test runtime.
async fn fetch(settings: ObisSettings, query: OccurrenceQuery) -> Vec<OccurrenceRecord> {
    tokio::task::spawn_blocking(move || {
        let client = ObisHttpClient::new(&settings).unwrap();
        client.fetch_occurrences(&query)
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_sends_paging_and_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/occurrence"))
        .and(query_param("geometry", GLOBAL_POLYGON))
        .and(query_param("size", "2"))
        .and(query_param("offset", "4"))
        .and(query_param("taxonid", "137205"))
        .and(query_param("startdate", "2024-01-01"))
        .and(query_param("enddate", "2024-01-31"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 2,
            "results": [
                {"id": "a", "decimalLongitude": 1.5, "decimalLatitude": 2.5},
                {"id": "b", "scientificName": "Phoca vitulina"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let query = OccurrenceQuery {
        taxon_id: Some("137205".to_string()),
        start_date: Some("2024-01-01".parse().unwrap()),
        end_date: Some("2024-01-31".parse().unwrap()),
        ..OccurrenceQuery::new(Geometry::global(), 2)
    };
    let records = fetch(settings(&server), query).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id().as_deref(), Some("a"));
    assert_eq!(
        records[1].text("scientificName").as_deref(),
        Some("Phoca vitulina")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_results_key_is_empty_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/occurrence"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 0})))
        .mount(&server)
        .await;

    let records = fetch(settings(&server), OccurrenceQuery::new(Geometry::global(), 0)).await;
    assert!(records.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_body_is_empty_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/occurrence"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let records = fetch(settings(&server), OccurrenceQuery::new(Geometry::global(), 0)).await;
    assert!(records.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_is_retried_then_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/occurrence"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let records = fetch(settings(&server), OccurrenceQuery::new(Geometry::global(), 0)).await;
    assert!(records.is_empty());
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/occurrence"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad geometry"))
        .expect(1)
        .mount(&server)
        .await;

    let records = fetch(settings(&server), OccurrenceQuery::new(Geometry::global(), 0)).await;
    assert!(records.is_empty());
}
