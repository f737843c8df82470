use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tabled::{Table, Tabled};

use velometrics::config::AppConfig;
use velometrics::database::Database;
use velometrics::ingest::LocalFileFetcher;
use velometrics::logging::{init_logging, LogConfig, LogLevel};
use velometrics::models::{ActivityRecord, AthleteProfile};
use velometrics::pmc::TsbInterpretation;
use velometrics::service::{ActivityService, AllDataRequest};

#[derive(Parser)]
#[command(
    name = "velometrics",
    about = "Cycling activity analytics: power, zones, intervals, training load",
    version
)]
struct Cli {
    /// Increase log verbosity
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one recording and print its metrics
    Analyze {
        /// Path to the binary recording
        file: PathBuf,

        /// Athlete FTP in watts (estimated from history when omitted)
        #[arg(long)]
        ftp: Option<f64>,

        /// Athlete W' in joules
        #[arg(long)]
        w_prime: Option<f64>,

        /// Athlete maximum heart rate
        #[arg(long)]
        max_hr: Option<i64>,

        /// Athlete id used for records and rollups
        #[arg(long, default_value_t = 1)]
        athlete: i64,

        /// Print the raw composite JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Analyze every recording in a directory for one athlete
    Batch {
        /// Directory containing .fit recordings
        dir: PathBuf,

        /// Athlete id
        #[arg(long, default_value_t = 1)]
        athlete: i64,

        /// Athlete FTP in watts
        #[arg(long)]
        ftp: Option<f64>,
    },

    /// Detect and print intervals for one recording
    Intervals {
        /// Path to the binary recording
        file: PathBuf,

        /// Athlete FTP in watts
        #[arg(long)]
        ftp: f64,
    },

    /// Recompute an athlete's daily training-load state
    Rollup {
        /// Athlete id
        #[arg(long, default_value_t = 1)]
        athlete: i64,

        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show an athlete's personal records
    Records {
        /// Athlete id
        #[arg(long, default_value_t = 1)]
        athlete: i64,
    },

    /// Inspect or change the result cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache status and stream-cache statistics
    Status,
    /// Enable or disable the result cache
    Toggle {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
    /// Invalidate one activity's caches, or everything
    Clear {
        #[arg(long)]
        activity: Option<i64>,
    },
}

#[derive(Tabled)]
struct MetricRow {
    metric: String,
    value: String,
}

#[derive(Tabled)]
struct IntervalRow {
    start: i64,
    end: i64,
    duration: i64,
    classification: String,
    avg_power: String,
    ratio: String,
}

#[derive(Tabled)]
struct RecordRow {
    window: String,
    first: String,
    second: String,
    third: String,
}

fn build_service(config: &AppConfig) -> Result<Arc<ActivityService>> {
    fs::create_dir_all(&config.data_dir)?;
    let db = Database::new(config.database_path())?;
    let service = ActivityService::new(config.clone(), db, Arc::new(LocalFileFetcher));
    service.init();
    Ok(service)
}

/// Register a recording as an activity row so the service can analyze it
fn register_activity(
    config: &AppConfig,
    athlete_id: i64,
    ftp: Option<f64>,
    w_prime: Option<f64>,
    max_hr: Option<i64>,
    file: &PathBuf,
    activity_id: i64,
) -> Result<()> {
    let mut db = Database::new(config.database_path())?;
    let mut athlete = db
        .get_athlete(athlete_id)?
        .unwrap_or_else(|| AthleteProfile::new(athlete_id));
    if ftp.is_some() {
        athlete.ftp = ftp;
    }
    if w_prime.is_some() {
        athlete.w_prime = w_prime;
    }
    if max_hr.is_some() {
        athlete.max_heartrate = max_hr;
    }
    db.upsert_athlete(&athlete)?;
    db.upsert_activity(&ActivityRecord {
        athlete_id: Some(athlete_id),
        upload_fit_url: Some(file.display().to_string()),
        start_date: Some(Utc::now().naive_utc()),
        ..ActivityRecord::new(activity_id)
    })?;
    Ok(())
}

fn print_composite(document: &serde_json::Value) {
    let mut rows = Vec::new();
    let mut push = |metric: &str, value: Option<&serde_json::Value>| {
        if let Some(value) = value {
            if !value.is_null() {
                rows.push(MetricRow {
                    metric: metric.to_string(),
                    value: value.to_string(),
                });
            }
        }
    };
    for section in ["overall", "power", "heartrate", "speed", "training_effect"] {
        if let Some(obj) = document.get(section).and_then(|v| v.as_object()) {
            for (key, value) in obj {
                push(&format!("{}.{}", section, key), Some(value));
            }
        }
    }
    println!("{}", Table::new(rows));
}

fn run_analyze(
    config: &AppConfig,
    file: PathBuf,
    ftp: Option<f64>,
    w_prime: Option<f64>,
    max_hr: Option<i64>,
    athlete: i64,
    json: bool,
) -> Result<()> {
    let activity_id = next_activity_id(config)?;
    register_activity(config, athlete, ftp, w_prime, max_hr, &file, activity_id)?;
    let service = build_service(config)?;

    let document = service
        .get_all_data(&AllDataRequest::new(activity_id), None)?
        .ok_or_else(|| {
            anyhow!("no FTP on file and not enough history to estimate one; pass --ftp")
        })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!(
        "{} {}",
        "analyzed".green().bold(),
        file.display().to_string().bold()
    );
    print_composite(&document);

    if let Some(status) = document
        .get("overall")
        .and_then(|o| o.get("status"))
        .and_then(|s| s.as_i64())
    {
        let interpretation = TsbInterpretation::from_tsb(status);
        let line = format!("TSB {:+}: {}", status, interpretation.description());
        let line = match interpretation {
            TsbInterpretation::VeryFresh | TsbInterpretation::Fresh => line.green(),
            TsbInterpretation::Neutral => line.normal(),
            _ => line.yellow(),
        };
        println!("{}", line);
    }
    Ok(())
}

fn next_activity_id(config: &AppConfig) -> Result<i64> {
    // good enough for a single-user CLI database
    let mut db = Database::new(config.database_path())?;
    let mut id = 1;
    while db.get_activity(id)?.is_some() {
        id += 1;
    }
    Ok(id)
}

fn run_batch(config: &AppConfig, dir: PathBuf, athlete: i64, ftp: Option<f64>) -> Result<()> {
    let mut files: Vec<PathBuf> = fs::read_dir(&dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("fit"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    if files.is_empty() {
        println!("No recordings found in {}", dir.display());
        return Ok(());
    }

    let base_id = next_activity_id(config)?;
    for (offset, file) in files.iter().enumerate() {
        register_activity(
            config,
            athlete,
            ftp,
            None,
            None,
            file,
            base_id + offset as i64,
        )?;
    }

    let service = build_service(config)?;
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("static template"),
    );

    let failures: Vec<String> = files
        .par_iter()
        .enumerate()
        .filter_map(|(offset, file)| {
            let request = AllDataRequest::new(base_id + offset as i64);
            let outcome = match service.get_all_data(&request, None) {
                Ok(Some(_)) => None,
                Ok(None) => Some(format!("{}: not enough history to estimate FTP", file.display())),
                Err(e) => Some(format!("{}: {}", file.display(), e)),
            };
            pb.inc(1);
            outcome
        })
        .collect();
    pb.finish_with_message("done");

    println!(
        "{} analyzed, {} failed",
        (files.len() - failures.len()).to_string().green(),
        failures.len().to_string().red()
    );
    for failure in failures {
        eprintln!("  {}", failure.red());
    }
    Ok(())
}

fn run_intervals(config: &AppConfig, file: PathBuf, ftp: f64) -> Result<()> {
    let activity_id = next_activity_id(config)?;
    register_activity(config, 1, Some(ftp), None, None, &file, activity_id)?;
    let service = build_service(config)?;
    let response = service.detect_and_save_intervals(activity_id)?;

    let rows: Vec<IntervalRow> = response
        .items
        .iter()
        .map(|item| IntervalRow {
            start: item.start,
            end: item.end,
            duration: item.duration,
            classification: item.classification.clone(),
            avg_power: format!("{:.0} W", item.average_power),
            ratio: format!("{:.2}", item.power_ratio),
        })
        .collect();
    println!("{}", Table::new(rows));
    println!("duration {} s, ftp {} W", response.duration, response.ftp);
    Ok(())
}

fn run_rollup(config: &AppConfig, athlete: i64, date: Option<NaiveDate>) -> Result<()> {
    let service = build_service(config)?;
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let state = service.update_daily_state(athlete, date)?;
    println!(
        "athlete {} on {}: fitness {:.1}, fatigue {:.1}, status {:+.1}",
        athlete, state.date, state.fitness, state.fatigue, state.daily_status
    );
    Ok(())
}

fn run_records(config: &AppConfig, athlete: i64) -> Result<()> {
    let mut db = Database::new(config.database_path())?;
    let row = db.get_or_create_power_records(athlete)?;

    let fmt = |slot: Option<(i64, i64)>, unit: &str| match slot {
        Some((value, activity)) => format!("{} {} (#{})", value, unit, activity),
        None => "-".to_string(),
    };
    let mut rows: Vec<RecordRow> = velometrics::power::RECORD_WINDOWS
        .iter()
        .map(|(name, _)| {
            let top = &row.powers[*name];
            RecordRow {
                window: name.to_string(),
                first: fmt(top.first, "W"),
                second: fmt(top.second, "W"),
                third: fmt(top.third, "W"),
            }
        })
        .collect();
    rows.push(RecordRow {
        window: "longest_ride".to_string(),
        first: fmt(row.longest_ride.first, "m"),
        second: fmt(row.longest_ride.second, "m"),
        third: fmt(row.longest_ride.third, "m"),
    });
    rows.push(RecordRow {
        window: "max_elevation".to_string(),
        first: fmt(row.max_elevation.first, "m"),
        second: fmt(row.max_elevation.second, "m"),
        third: fmt(row.max_elevation.third, "m"),
    });
    println!("{}", Table::new(rows));
    Ok(())
}

fn run_cache(config: &AppConfig, command: CacheCommands) -> Result<()> {
    let service = build_service(config)?;
    match command {
        CacheCommands::Status => {
            println!("{}", serde_json::to_string_pretty(&service.cache_status())?);
        }
        CacheCommands::Toggle { state } => {
            let enabled = service.set_cache_enabled(state == "on")?;
            println!(
                "result cache {}",
                if enabled { "enabled".green() } else { "disabled".yellow() }
            );
        }
        CacheCommands::Clear { activity } => {
            service.invalidate_cache(activity);
            match activity {
                Some(id) => println!("cache cleared for activity {}", id),
                None => println!("cache cleared"),
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let _guard = init_logging(&log_config)?;

    let config = AppConfig::from_env();
    match cli.command {
        Commands::Analyze {
            file,
            ftp,
            w_prime,
            max_hr,
            athlete,
            json,
        } => run_analyze(&config, file, ftp, w_prime, max_hr, athlete, json),
        Commands::Batch { dir, athlete, ftp } => run_batch(&config, dir, athlete, ftp),
        Commands::Intervals { file, ftp } => run_intervals(&config, file, ftp),
        Commands::Rollup { athlete, date } => run_rollup(&config, athlete, date),
        Commands::Records { athlete } => run_records(&config, athlete),
        Commands::Cache { command } => run_cache(&config, command),
    }
}
