use std::collections::HashMap;
use std::sync::Mutex;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::WormsSettings;
use crate::error::TrackerError;
use crate::http::{build_client, join_url, send_with_retries};

/// Resolves a common name for an Aphia ID. Failures are logged and yield
/// `None`; callers never see an error.
pub trait VernacularClient: Send + Sync {
    fn get_common_name(&self, aphia_id: Option<&str>) -> Option<String>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VernacularEntry {
    #[serde(default)]
    pub vernacular: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default, rename = "isPreferredName")]
    pub is_preferred_name: Option<Value>,
}

impl VernacularEntry {
    fn name(&self) -> Option<&str> {
        self.vernacular
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    fn is_english(&self) -> bool {
        self.language
            .as_deref()
            .is_some_and(|language| language.trim().eq_ignore_ascii_case("english"))
            || self
                .language_code
                .as_deref()
                .is_some_and(|code| code.trim().eq_ignore_ascii_case("eng"))
    }

    fn is_preferred(&self) -> bool {
        match &self.is_preferred_name {
            Some(Value::Number(flag)) => flag.as_i64() == Some(1),
            Some(Value::Bool(flag)) => *flag,
            _ => false,
        }
    }
}

/// Picks a name: preferred English, then first English, then the first
/// named entry in any language.
pub fn select_vernacular(entries: &[VernacularEntry]) -> Option<String> {
    let named = || entries.iter().filter(|entry| entry.name().is_some());
    named()
        .find(|entry| entry.is_english() && entry.is_preferred())
        .or_else(|| named().find(|entry| entry.is_english()))
        .or_else(|| named().next())
        .and_then(VernacularEntry::name)
        .map(str::to_string)
}

pub struct WormsHttpClient {
    client: Client,
    base_url: String,
    names: Mutex<HashMap<String, Option<String>>>,
}

impl WormsHttpClient {
    pub fn new(settings: &WormsSettings) -> Result<Self, TrackerError> {
        let client = build_client(settings.timeout)
            .map_err(|err| TrackerError::WormsHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            names: Mutex::new(HashMap::new()),
        })
    }

    pub fn vernaculars_url(&self, aphia_id: &str) -> String {
        join_url(
            &self.base_url,
            &format!("AphiaVernacularsByAphiaID/{}", aphia_id.trim()),
        )
    }

    pub fn fetch_vernaculars(&self, aphia_id: &str) -> Result<Vec<VernacularEntry>, TrackerError> {
        let url = self.vernaculars_url(aphia_id);
        tracing::debug!(url = %url, "fetching WoRMS vernacular names");
        let response = send_with_retries(|| self.client.get(&url), TrackerError::WormsHttp)?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "WoRMS request failed".to_string());
            return Err(TrackerError::WormsStatus {
                status: status.as_u16(),
                message,
            });
        }
        let body = response
            .text()
            .map_err(|err| TrackerError::WormsHttp(err.to_string()))?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&body).map_err(|err| TrackerError::WormsDecode(err.to_string()))
    }

    fn cached(&self, aphia_id: &str) -> Option<Option<String>> {
        self.names
            .lock()
            .ok()
            .and_then(|names| names.get(aphia_id).cloned())
    }

    fn remember(&self, aphia_id: &str, name: Option<String>) {
        if let Ok(mut names) = self.names.lock() {
            names.insert(aphia_id.to_string(), name);
        }
    }
}

impl VernacularClient for WormsHttpClient {
    fn get_common_name(&self, aphia_id: Option<&str>) -> Option<String> {
        let aphia_id = aphia_id.map(str::trim).filter(|id| !id.is_empty())?;
        if let Some(name) = self.cached(aphia_id) {
            return name;
        }
        match self.fetch_vernaculars(aphia_id) {
            Ok(entries) => {
                let name = select_vernacular(&entries);
                self.remember(aphia_id, name.clone());
                name
            }
            Err(err) => {
                tracing::warn!(aphia_id, error = %err, "WoRMS lookup failed");
                None
            }
        }
    }
}
