use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::domain::{
    CuratedObservation, GeoPoint, Geometry, IsoDate, OBIS_SOURCE, OccurrenceRecord, RefreshMode,
    ValidationStatus,
};
use crate::error::TrackerError;
use crate::normalize::{
    harmonize_common_name, humanize, parse_event_date, reconcile_depth, standardize_sex, to_float,
};
use crate::obis::{OccurrenceClient, OccurrenceQuery};
use crate::store::ObservationStore;
use crate::worms::VernacularClient;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub default_max_pages: u32,
    pub incremental_days: u32,
    pub window_days: Option<u32>,
    pub page_delay: Duration,
}

impl RunSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            default_max_pages: config.default_max_pages,
            incremental_days: config.incremental_days,
            window_days: config.window_days,
            page_delay: config.page_delay,
        }
    }
}

/// One paged pass over OBIS. `max_pages: None` pages until an empty page.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRequest {
    pub geometry: Geometry,
    pub taxon_id: Option<String>,
    pub page_size: Option<u32>,
    pub max_pages: Option<u32>,
    pub start_date: Option<IsoDate>,
    pub end_date: Option<IsoDate>,
}

impl RefreshRequest {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            taxon_id: None,
            page_size: None,
            max_pages: None,
            start_date: None,
            end_date: None,
        }
    }

    fn query(&self, page: u32) -> OccurrenceQuery {
        OccurrenceQuery {
            geometry: self.geometry.clone(),
            taxon_id: self.taxon_id.clone(),
            page_size: self.page_size,
            page,
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

/// Operator-level refresh: a mode plus optional overrides, expanded into one
/// or more [`RefreshRequest`] windows.
#[derive(Debug, Clone)]
pub struct RefreshPlan {
    pub mode: RefreshMode,
    pub geometry: Geometry,
    pub taxon_id: Option<String>,
    pub start_date: Option<IsoDate>,
    pub end_date: Option<IsoDate>,
    pub max_pages: Option<u32>,
    pub window_days: Option<u32>,
}

impl RefreshPlan {
    pub fn full(geometry: Geometry) -> Self {
        Self {
            mode: RefreshMode::Full,
            geometry,
            taxon_id: None,
            start_date: None,
            end_date: None,
            max_pages: None,
            window_days: None,
        }
    }

    pub fn incremental(geometry: Geometry) -> Self {
        Self {
            mode: RefreshMode::Incremental,
            ..Self::full(geometry)
        }
    }

    pub fn requests(
        &self,
        today: NaiveDate,
        settings: &RunSettings,
    ) -> Result<Vec<RefreshRequest>, TrackerError> {
        let bounded = match self.mode {
            RefreshMode::Full => self.max_pages,
            RefreshMode::Incremental => self.max_pages.or(Some(settings.default_max_pages)),
        };
        if bounded == Some(0) {
            return Err(TrackerError::InvalidArgument(
                "page limit must be at least 1".to_string(),
            ));
        }
        if self.window_days == Some(0) {
            return Err(TrackerError::InvalidArgument(
                "window size must be at least 1 day".to_string(),
            ));
        }
        let base = RefreshRequest {
            geometry: self.geometry.clone(),
            taxon_id: self.taxon_id.clone(),
            page_size: None,
            max_pages: bounded,
            start_date: None,
            end_date: None,
        };

        match self.mode {
            RefreshMode::Full => {
                if self.start_date.is_some() || self.end_date.is_some() {
                    return Err(TrackerError::InvalidArgument(
                        "start/end dates require incremental mode".to_string(),
                    ));
                }
                Ok(vec![base])
            }
            RefreshMode::Incremental => {
                let end = self.end_date.map(|date| date.date()).unwrap_or(today);
                let start = match self.start_date {
                    Some(date) => date.date(),
                    None => today
                        .checked_sub_days(Days::new(u64::from(settings.incremental_days)))
                        .unwrap_or(NaiveDate::MIN),
                };
                if start > end {
                    return Err(TrackerError::InvalidDateRange {
                        start: start.to_string(),
                        end: end.to_string(),
                    });
                }

                let window_days = self.window_days.or(settings.window_days);
                Ok(date_windows(start, end, window_days)
                    .into_iter()
                    .map(|(start, end)| RefreshRequest {
                        start_date: Some(IsoDate::new(start)),
                        end_date: Some(IsoDate::new(end)),
                        ..base.clone()
                    })
                    .collect())
            }
        }
    }
}

/// Splits `[start, end]` into consecutive inclusive windows of `window_days`.
pub fn date_windows(
    start: NaiveDate,
    end: NaiveDate,
    window_days: Option<u32>,
) -> Vec<(NaiveDate, NaiveDate)> {
    let Some(days) = window_days.filter(|days| *days > 0) else {
        return vec![(start, end)];
    };
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let window_end = cursor
            .checked_add_days(Days::new(u64::from(days) - 1))
            .map_or(end, |candidate| candidate.min(end));
        windows.push((cursor, window_end));
        match window_end.succ_opt() {
            Some(next) => cursor = next,
            None => break,
        }
    }
    windows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Completed,
    Empty,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    pub page: u32,
    pub status: PageStatus,
    pub records_fetched: usize,
    pub records_created: usize,
    pub skipped_existing: usize,
    pub skipped_missing_id: usize,
    pub skipped_missing_coordinates: usize,
}

impl PageSummary {
    fn new(page: u32, status: PageStatus) -> Self {
        Self {
            page,
            status,
            records_fetched: 0,
            records_created: 0,
            skipped_existing: 0,
            skipped_missing_id: 0,
            skipped_missing_coordinates: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub start_date: Option<IsoDate>,
    pub end_date: Option<IsoDate>,
    pub pages: Vec<PageSummary>,
    pub records_fetched: usize,
    pub records_created: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub mode: RefreshMode,
    pub geometry: String,
    pub taxon_id: Option<String>,
    pub windows: Vec<RunSummary>,
    pub records_fetched: usize,
    pub records_created: usize,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<O: OccurrenceClient, V: VernacularClient, S: ObservationStore> {
    settings: RunSettings,
    occurrences: O,
    vernaculars: V,
    store: S,
}

impl<O: OccurrenceClient, V: VernacularClient, S: ObservationStore> App<O, V, S> {
    pub fn new(settings: RunSettings, occurrences: O, vernaculars: V, store: S) -> Self {
        Self {
            settings,
            occurrences,
            vernaculars,
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn occurrences(&self) -> &O {
        &self.occurrences
    }

    /// Expands `plan` into date windows and runs each in turn, pausing
    /// between windows.
    pub fn refresh(
        &self,
        plan: &RefreshPlan,
        today: NaiveDate,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RefreshResult, TrackerError> {
        let requests = plan.requests(today, &self.settings)?;
        tracing::info!(
            mode = %plan.mode,
            geometry = %plan.geometry,
            taxon_id = plan.taxon_id.as_deref(),
            windows = requests.len(),
            "starting OBIS refresh"
        );

        let mut windows = Vec::with_capacity(requests.len());
        for (index, request) in requests.iter().enumerate() {
            if index > 0 {
                thread::sleep(self.settings.page_delay);
            }
            windows.push(self.run(request, options, sink)?);
        }

        let records_fetched = windows.iter().map(|run| run.records_fetched).sum();
        let records_created = windows.iter().map(|run| run.records_created).sum();
        tracing::info!(records_fetched, records_created, "finished OBIS refresh");

        Ok(RefreshResult {
            mode: plan.mode,
            geometry: plan.geometry.to_string(),
            taxon_id: plan.taxon_id.clone(),
            windows,
            records_fetched,
            records_created,
        })
    }

    /// Pages through OBIS strictly in order, stopping at the first empty page
    /// or after `max_pages`.
    pub fn run(
        &self,
        request: &RefreshRequest,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, TrackerError> {
        let mut pages = Vec::new();
        let mut page = 0u32;
        loop {
            if request.max_pages.is_some_and(|max| page >= max) {
                break;
            }
            if page > 0 {
                thread::sleep(self.settings.page_delay);
            }
            let summary = self.run_page(request, page, options, sink)?;
            let exhausted = summary.status == PageStatus::Empty;
            pages.push(summary);
            if exhausted {
                break;
            }
            page += 1;
        }

        Ok(RunSummary {
            start_date: request.start_date,
            end_date: request.end_date,
            records_fetched: pages.iter().map(|page| page.records_fetched).sum(),
            records_created: pages.iter().map(|page| page.records_created).sum(),
            pages,
        })
    }

    /// Fetches, filters, normalizes and commits a single page. All creations
    /// for the page share one transaction.
    pub fn run_page(
        &self,
        request: &RefreshRequest,
        page: u32,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<PageSummary, TrackerError> {
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; page {page}"),
            elapsed: None,
        });
        let start = Instant::now();
        let records = self.occurrences.fetch_occurrences(&request.query(page));
        sink.event(ProgressEvent {
            message: format!("obis.response records={}", records.len()),
            elapsed: Some(start.elapsed()),
        });

        if records.is_empty() {
            tracing::info!(page, geometry = %request.geometry, "no OBIS records returned");
            return Ok(PageSummary::new(page, PageStatus::Empty));
        }

        sink.event(ProgressEvent {
            message: "phase=Filter; checking stored ids".to_string(),
            elapsed: None,
        });
        let mut summary = PageSummary::new(page, PageStatus::Completed);
        summary.records_fetched = records.len();

        let page_ids = records
            .iter()
            .filter_map(OccurrenceRecord::id)
            .collect::<BTreeSet<_>>();
        let existing = self.store.exists_by_external_id(OBIS_SOURCE, &page_ids)?;

        let mut accepted = BTreeSet::new();
        let mut pending = Vec::new();
        for record in &records {
            let Some(obis_id) = record.id() else {
                tracing::warn!(page, record = %record.to_value(), "OBIS record missing 'id'; skipping");
                summary.skipped_missing_id += 1;
                continue;
            };
            if existing.contains(&obis_id) || accepted.contains(&obis_id) {
                tracing::debug!(obis_id = %obis_id, "skipping already ingested OBIS record");
                summary.skipped_existing += 1;
                continue;
            }
            match curate(&obis_id, record, &self.vernaculars) {
                Some(observation) => {
                    accepted.insert(obis_id);
                    pending.push(observation);
                }
                None => summary.skipped_missing_coordinates += 1,
            }
        }

        if options.dry_run {
            summary.status = PageStatus::DryRun;
            summary.records_created = pending.len();
            return Ok(summary);
        }

        sink.event(ProgressEvent {
            message: format!("phase=Persist; {} new", pending.len()),
            elapsed: None,
        });
        summary.records_created = self.store.transaction(|writer| {
            for observation in &pending {
                if let Err(err) = writer.create(observation) {
                    tracing::error!(
                        page,
                        obis_id = %observation.obis_id,
                        species = %observation.species_name,
                        error = %err,
                        "failed to save OBIS record; rolling back page"
                    );
                    return Err(err);
                }
                tracing::debug!(obis_id = %observation.obis_id, species = %observation.species_name, "saved OBIS record");
            }
            Ok(pending.len())
        })?;

        tracing::info!(
            page,
            fetched = summary.records_fetched,
            created = summary.records_created,
            "finished OBIS page"
        );
        Ok(summary)
    }
}

/// Builds the curated form of one OBIS record, or `None` when its
/// coordinates cannot be resolved.
pub fn curate<V>(
    obis_id: &str,
    record: &OccurrenceRecord,
    vernaculars: &V,
) -> Option<CuratedObservation>
where
    V: VernacularClient + ?Sized,
{
    let longitude = to_float(record.get("decimalLongitude"));
    let latitude = to_float(record.get("decimalLatitude"));
    let (Some(longitude), Some(latitude)) = (longitude, latitude) else {
        tracing::warn!(obis_id, "OBIS record missing coordinates; skipping");
        return None;
    };

    let (observation_datetime, observation_date) =
        parse_event_date(obis_id, record.text("eventDate").as_deref());
    let depth = reconcile_depth(record);
    let dataset = record.text("datasetName");

    Some(CuratedObservation {
        obis_id: obis_id.to_string(),
        source: OBIS_SOURCE.to_string(),
        species_name: record
            .text("scientificName")
            .unwrap_or_else(|| "Unknown species".to_string()),
        common_name: harmonize_common_name(record, vernaculars),
        observation_date,
        observation_datetime,
        location: Some(GeoPoint {
            longitude,
            latitude,
        }),
        location_name: Some(dataset.clone().unwrap_or_else(|| "OBIS record".to_string())),
        machine_observation: humanize(record.text("basisOfRecord").as_deref()),
        validated: ValidationStatus::Validated,
        depth_min: depth.depth_min,
        depth_max: depth.depth_max,
        bathymetry: depth.bathymetry,
        temperature: to_float(record.get("sst")),
        visibility: None,
        notes: Some(format!(
            "Imported from OBIS dataset: {}",
            dataset.as_deref().unwrap_or("Unknown")
        )),
        sex: standardize_sex(record.text("sex").as_deref()),
        raw_data: record.to_value(),
    })
}
