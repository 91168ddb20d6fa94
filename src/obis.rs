use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::ObisSettings;
use crate::domain::{Geometry, IsoDate, OccurrenceRecord};
use crate::error::TrackerError;
use crate::http::{build_client, join_url, send_with_retries};

#[derive(Debug, Clone, PartialEq)]
pub struct OccurrenceQuery {
    pub geometry: Geometry,
    pub taxon_id: Option<String>,
    pub page_size: Option<u32>,
    pub page: u32,
    pub start_date: Option<IsoDate>,
    pub end_date: Option<IsoDate>,
}

impl OccurrenceQuery {
    pub fn new(geometry: Geometry, page: u32) -> Self {
        Self {
            geometry,
            taxon_id: None,
            page_size: None,
            page,
            start_date: None,
            end_date: None,
        }
    }
}

/// Source of OBIS occurrence pages.
///
/// Implementations never fail: transport and decoding problems are logged and
/// reported as an empty page, which callers treat as the end of the data.
pub trait OccurrenceClient: Send + Sync {
    fn fetch_occurrences(&self, query: &OccurrenceQuery) -> Vec<OccurrenceRecord>;
}

#[derive(Debug, Deserialize)]
struct OccurrencePage {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Clone)]
pub struct ObisHttpClient {
    client: Client,
    base_url: String,
    default_size: u32,
}

impl ObisHttpClient {
    pub fn new(settings: &ObisSettings) -> Result<Self, TrackerError> {
        let client =
            build_client(settings.timeout).map_err(|err| TrackerError::ObisHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            default_size: settings.page_size,
        })
    }

    pub fn endpoint(&self) -> String {
        join_url(&self.base_url, "occurrence")
    }

    /// Query string for one page; optional filters only appear when set.
    pub fn query_params(&self, query: &OccurrenceQuery) -> Vec<(&'static str, String)> {
        let size = query.page_size.unwrap_or(self.default_size);
        let offset = u64::from(query.page) * u64::from(size);
        let mut params = vec![
            ("geometry", query.geometry.as_str().to_string()),
            ("size", size.to_string()),
            ("offset", offset.to_string()),
        ];
        if let Some(taxon_id) = query.taxon_id.as_deref().filter(|id| !id.trim().is_empty()) {
            params.push(("taxonid", taxon_id.trim().to_string()));
        }
        if let Some(start) = query.start_date {
            params.push(("startdate", start.to_string()));
        }
        if let Some(end) = query.end_date {
            params.push(("enddate", end.to_string()));
        }
        params
    }

    pub fn try_fetch(&self, query: &OccurrenceQuery) -> Result<Vec<OccurrenceRecord>, TrackerError> {
        let url = self.endpoint();
        let params = self.query_params(query);
        tracing::info!(url = %url, page = query.page, "fetching OBIS occurrences");

        let response = send_with_retries(
            || self.client.get(&url).query(&params),
            TrackerError::ObisHttp,
        )?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "OBIS request failed".to_string());
            return Err(TrackerError::ObisStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| TrackerError::ObisHttp(err.to_string()))?;
        let page: OccurrencePage =
            serde_json::from_str(&body).map_err(|err| TrackerError::ObisDecode(err.to_string()))?;
        Ok(page.results.into_iter().map(OccurrenceRecord::from).collect())
    }
}

impl OccurrenceClient for ObisHttpClient {
    fn fetch_occurrences(&self, query: &OccurrenceQuery) -> Vec<OccurrenceRecord> {
        match self.try_fetch(query) {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(page = query.page, error = %err, "OBIS request failed; treating page as empty");
                Vec::new()
            }
        }
    }
}
