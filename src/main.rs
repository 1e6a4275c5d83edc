use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use diesel::sqlite::SqliteConnection;
use log::{error, info, warn};
use meteo_archive_sync::client::clients_from_config;
use meteo_archive_sync::config::{Config, load_env_file};
use meteo_archive_sync::services::migrate::{open_store, prepare_store};
use meteo_archive_sync::services::reports;
use meteo_archive_sync::services::resolve::LocationResolver;
use meteo_archive_sync::{LocationReport, Synchronizer};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Reconciles historical daily weather from the Open-Meteo archive into a SQLite store"
)]
struct Cli {
    /// dotenv-style file loaded before the configuration is read (default: ./.env if present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and merge daily readings for each location over a date range
    Sync(SyncArgs),
    /// Create missing tables and columns, then exit
    Migrate,
    /// Print aggregates over stored readings
    #[command(subcommand)]
    Report(ReportCommand),
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// First day, YYYY-MM-DD
    #[arg(long)]
    start: String,

    /// Last day, YYYY-MM-DD; must be after --start
    #[arg(long)]
    end: String,

    /// Location to sync; repeatable. Defaults to LOCATIONS
    #[arg(short, long = "location")]
    locations: Vec<String>,

    /// Locations processed at once
    #[arg(long, env = "MAX_PARALLEL_FETCHES")]
    workers: Option<NonZeroUsize>,
}

#[derive(Subcommand, Debug)]
enum ReportCommand {
    /// Known locations
    Locations,
    /// Average mean temperature of a location over a calendar year
    AnnualTemperature {
        #[arg(long)]
        location: String,
        #[arg(long)]
        year: i32,
    },
    /// Average precipitation of a location over seven days
    WeeklyPrecipitation {
        #[arg(long)]
        location: String,
        #[arg(long)]
        start: NaiveDate,
    },
    /// Average mean temperature per location over a date range
    MeanTemperature {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Average precipitation per region over a calendar year
    RegionPrecipitation {
        #[arg(long)]
        year: i32,
    },
}

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

fn configure_env(cli: &Cli) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = cli.env_file.clone() {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }

    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if default_path.is_file() {
        load_env_file(&default_path)?;
        Ok(Some(LoadedEnvFile {
            path: default_path,
            explicit: false,
        }))
    } else {
        Ok(None)
    }
}

fn connect(cfg: &Config) -> Result<SqliteConnection, String> {
    let conn = open_store(&cfg.database_url).map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database {}", cfg.database_url);
    Ok(conn)
}

fn connect_prepared(cfg: &Config) -> Result<SqliteConnection, String> {
    let mut conn = connect(cfg)?;
    prepare_store(&mut conn).map_err(|e| format!("Preparing database failed: {}", e))?;
    Ok(conn)
}

fn run(cli: Cli) -> Result<(), String> {
    let mut cfg = Config::from_env()?;
    if let Some(url) = cli.database_url {
        cfg.database_url = url;
    }
    info!(
        "Config loaded (database={}, archive={}, geocoder={}, timeout={}s, max_parallel_fetches={}, \
         region_aliases={}, timezone_aliases={})",
        cfg.database_url,
        cfg.archive_url,
        cfg.geocoder_url,
        cfg.http_timeout.as_secs(),
        cfg.max_parallel_fetches,
        cfg.region_aliases.len(),
        cfg.timezone_aliases.len()
    );

    match cli.command {
        Command::Migrate => {
            connect_prepared(&cfg)?;
            info!("Database is ready");
            Ok(())
        }
        Command::Sync(args) => run_sync(cfg, args),
        Command::Report(report) => run_report(&cfg, report),
    }
}

fn run_sync(cfg: Config, args: SyncArgs) -> Result<(), String> {
    // the synchronizer prepares the store itself
    let mut conn = connect(&cfg)?;
    let locations = if args.locations.is_empty() {
        cfg.locations.clone()
    } else {
        args.locations
    };

    let (geocoder, timezones, archive) = clients_from_config(&cfg);
    let resolver = LocationResolver::new(geocoder, timezones)
        .with_region_aliases(cfg.region_aliases.clone())
        .with_timezone_aliases(cfg.timezone_aliases.clone());
    let synchronizer =
        Synchronizer::new(resolver, archive).with_workers(args.workers.unwrap_or(cfg.max_parallel_fetches));

    let abort = synchronizer.abort_handle();
    ctrlc::set_handler(move || {
        warn!("Interrupt received; finishing in-flight locations");
        abort.store(true, Ordering::SeqCst);
    })
    .map_err(|e| format!("Installing interrupt handler failed: {}", e))?;

    let reports = synchronizer
        .sync(&mut conn, &locations, &args.start, &args.end)
        .map_err(|e| format!("{} [{}]", e, e.kind()))?;
    print_sync_reports(&reports);
    Ok(())
}

fn print_sync_reports(reports: &[LocationReport]) {
    for report in reports {
        match &report.outcome {
            Ok(summary) => {
                println!(
                    "{:<20} ok      location_id={} inserted={} updated={} unchanged={} failed_days={}",
                    report.location,
                    summary.location_id,
                    summary.inserted,
                    summary.updated,
                    summary.unchanged,
                    summary.failed_days.len()
                );
                for (date, reason) in &summary.failed_days {
                    println!("{:<20}   {} {}", "", date, reason);
                }
            }
            Err(e) => println!("{:<20} {:<7} {}", report.location, e.kind(), e),
        }
    }
}

fn lookup_location(conn: &mut SqliteConnection, name: &str) -> Result<i32, String> {
    reports::find_location(conn, name)
        .map_err(|e| format!("Query failed: {}", e))?
        .map(|l| l.id)
        .ok_or_else(|| format!("location `{}` is not in the store; sync it first", name))
}

fn format_average(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

fn run_report(cfg: &Config, report: ReportCommand) -> Result<(), String> {
    let mut conn = connect_prepared(cfg)?;
    let query_failed = |e: diesel::result::Error| format!("Query failed: {}", e);

    match report {
        ReportCommand::Locations => {
            for location in reports::list_locations(&mut conn).map_err(query_failed)? {
                println!(
                    "{:>4}  {:<20} ({:.4}, {:.4})",
                    location.id, location.name, location.latitude, location.longitude
                );
            }
        }
        ReportCommand::AnnualTemperature { location, year } => {
            let id = lookup_location(&mut conn, &location)?;
            let average = reports::average_annual_temperature(&mut conn, id, year).map_err(query_failed)?;
            println!("{} {}: {}", location, year, format_average(average));
        }
        ReportCommand::WeeklyPrecipitation { location, start } => {
            let id = lookup_location(&mut conn, &location)?;
            let average = reports::average_seven_day_precipitation(&mut conn, id, start).map_err(query_failed)?;
            println!("{} week of {}: {}", location, start, format_average(average));
        }
        ReportCommand::MeanTemperature { from, to } => {
            if to < from {
                return Err(format!("--to {} is before --from {}", to, from));
            }
            for row in reports::average_mean_temperature_by_location(&mut conn, from, to).map_err(query_failed)? {
                println!("{:<20} {}", row.name, format_average(row.average));
            }
        }
        ReportCommand::RegionPrecipitation { year } => {
            for row in reports::average_annual_precipitation_by_region(&mut conn, year).map_err(query_failed)? {
                println!("{:<20} {}", row.name, format_average(row.average));
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let loaded_env = match configure_env(&cli) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "meteo-archive-sync {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
