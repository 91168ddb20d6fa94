use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use marine_tracker::app::{App, RefreshPlan, RunOptions, RunSettings};
use marine_tracker::config::{ConfigLoader, ResolvedConfig};
use marine_tracker::domain::{Geometry, IsoDate, OBIS_SOURCE, ObisId, RefreshMode};
use marine_tracker::error::TrackerError;
use marine_tracker::geo::{BoundingBox, RadiusFilter, parse_lat_lon};
use marine_tracker::obis::ObisHttpClient;
use marine_tracker::output::{JsonOutput, ListResult, LogSink};
use marine_tracker::store::{ObservationQuery, SqliteStore};
use marine_tracker::worms::WormsHttpClient;

#[derive(Parser)]
#[command(name = "marine-etl")]
#[command(about = "Ingest OBIS marine occurrences into a curated observation store")]
#[command(version, author)]
struct Cli {
    /// JSON config file (defaults to ./marine-tracker.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// SQLite database path; overrides config and MARINE_TRACKER_DB
    #[arg(long, global = true)]
    db: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Fetch OBIS pages and store new observations")]
    Refresh(RefreshArgs),
    #[command(about = "List stored observations")]
    List(ListArgs),
    #[command(about = "Show one stored observation by OBIS id")]
    Info(InfoArgs),
}

#[derive(Args)]
struct RefreshArgs {
    /// WKT polygon limiting the search area
    #[arg(long)]
    geometry: Option<Geometry>,

    /// WoRMS/OBIS taxon id filter
    #[arg(long)]
    taxon_id: Option<String>,

    /// Defaults to incremental when a date is given, full otherwise
    #[arg(long, value_enum)]
    mode: Option<RefreshMode>,

    #[arg(long)]
    start_date: Option<IsoDate>,

    #[arg(long)]
    end_date: Option<IsoDate>,

    /// Page limit per window; full mode pages until exhausted when omitted
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pages: Option<u32>,

    /// Split the incremental range into windows of this many days
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    window_days: Option<u32>,

    /// Fetch and normalize without writing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct ListArgs {
    /// min_lon,min_lat,max_lon,max_lat
    #[arg(long)]
    bbox: Option<BoundingBox>,

    /// LAT,LON center for a radius search
    #[arg(long, requires = "radius_km")]
    near: Option<String>,

    #[arg(long, requires = "near")]
    radius_km: Option<f64>,

    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..))]
    limit: u32,

    #[arg(long, default_value_t = 0)]
    offset: u32,
}

#[derive(Args)]
struct InfoArgs {
    obis_id: ObisId,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<TrackerError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TrackerError) -> u8 {
    match error {
        TrackerError::InvalidGeometry(_)
        | TrackerError::InvalidDate(_)
        | TrackerError::InvalidDateRange { .. }
        | TrackerError::InvalidBoundingBox(_)
        | TrackerError::InvalidCoordinate(_)
        | TrackerError::InvalidRadius(_)
        | TrackerError::InvalidObisId(_)
        | TrackerError::InvalidArgument(_)
        | TrackerError::ConfigRead(_)
        | TrackerError::ConfigParse(_)
        | TrackerError::ObservationNotFound(_) => 2,
        TrackerError::ObisHttp(_)
        | TrackerError::ObisStatus { .. }
        | TrackerError::ObisDecode(_)
        | TrackerError::WormsHttp(_)
        | TrackerError::WormsStatus { .. }
        | TrackerError::WormsDecode(_) => 3,
        TrackerError::Storage(_) | TrackerError::DuplicateObservation { .. } => 4,
        TrackerError::Filesystem(_) => 1,
    }
}

fn run() -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    match cli.command {
        Command::Refresh(args) => run_refresh(args, &config),
        Command::List(args) => run_list(args, &config),
        Command::Info(args) => run_info(args, &config),
    }
}

fn run_refresh(args: RefreshArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let has_dates = args.start_date.is_some() || args.end_date.is_some();
    let mode = args.mode.unwrap_or(if has_dates {
        RefreshMode::Incremental
    } else {
        RefreshMode::Full
    });
    let plan = RefreshPlan {
        mode,
        geometry: args
            .geometry
            .unwrap_or_else(|| config.default_geometry.clone()),
        taxon_id: args.taxon_id,
        start_date: args.start_date,
        end_date: args.end_date,
        max_pages: args.pages,
        window_days: args.window_days,
    };

    let store = SqliteStore::open(&config.database_path)?;
    let obis = ObisHttpClient::new(&config.obis)?;
    let worms = WormsHttpClient::new(&config.worms)?;
    let app = App::new(RunSettings::from_config(config), obis, worms, store);

    let options = RunOptions {
        dry_run: args.dry_run,
    };
    let result = app.refresh(&plan, Utc::now().date_naive(), options, &LogSink)?;
    JsonOutput::print_refresh(&result).into_diagnostic()?;
    Ok(())
}

fn run_list(args: ListArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let radius = match (args.near.as_deref(), args.radius_km) {
        (Some(near), Some(radius_km)) => Some(RadiusFilter::new(parse_lat_lon(near)?, radius_km)?),
        _ => None,
    };
    let query = ObservationQuery {
        bbox: args.bbox,
        radius,
        source: None,
        limit: Some(args.limit),
        offset: args.offset,
    };

    let store = SqliteStore::open(&config.database_path)?;
    let observations = store.list(&query)?;
    let result = ListResult {
        total: store.count()?,
        returned: observations.len(),
        observations,
    };
    JsonOutput::print_list(&result).into_diagnostic()?;
    Ok(())
}

fn run_info(args: InfoArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let store = SqliteStore::open(&config.database_path)?;
    let observation = store
        .get_by_external_id(OBIS_SOURCE, args.obis_id.as_str())?
        .ok_or_else(|| TrackerError::ObservationNotFound(args.obis_id.to_string()))?;
    JsonOutput::print_info(&observation).into_diagnostic()?;
    Ok(())
}
