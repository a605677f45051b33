use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::fs;
use std::path::PathBuf;
use tabled::{Table, Tabled};

use sitepulse::baseline::derived_stress_score;
use sitepulse::config::AnalysisConfig;
use sitepulse::logging::{init_logging, LogConfig, LogLevel};
use sitepulse::models::{ProductivityRecord, Sample};
use sitepulse::pipeline::AnalysisPipeline;

/// SitePulse - Workforce Biometric Analysis CLI
///
/// Analyzes cleaned per-person heart-rate streams and site productivity
/// records: activity states, transition behavior, breaks and stress peaks,
/// group comparisons, and productivity correlations.
#[derive(Parser)]
#[command(name = "sitepulse")]
#[command(version = "0.1.0")]
#[command(about = "Workforce biometric analysis", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis over cleaned inputs
    Analyze {
        /// Cleaned biometric sample stream (JSON array)
        #[arg(short, long)]
        samples: PathBuf,

        /// Monthly productivity records (CSV)
        #[arg(short, long)]
        productivity: Option<PathBuf>,

        /// Write the full report as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage the analysis configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Destination path
        #[arg(short, long, default_value = "sitepulse.toml")]
        path: PathBuf,
    },
    /// Print the active configuration
    Show,
}

/// Input record shape at the CLI boundary. Matches `Sample` except the
/// stress score may be absent, in which case it is derived from heart rate
/// and age.
#[derive(serde::Deserialize)]
struct SampleRecord {
    user_id: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    local_time: chrono::NaiveDateTime,
    heart_rate: f64,
    stress_score: Option<f64>,
    group: String,
    is_working_hours: bool,
    age: Option<u8>,
}

fn load_samples(path: &PathBuf, config: &AnalysisConfig) -> Result<Vec<Sample>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read samples file: {}", path.display()))?;
    let records: Vec<SampleRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse samples file: {}", path.display()))?;

    Ok(records
        .into_iter()
        .map(|r| {
            let stress_score = r
                .stress_score
                .unwrap_or_else(|| derived_stress_score(r.heart_rate, r.age, &config.baseline));
            Sample {
                user_id: r.user_id,
                timestamp: r.timestamp,
                local_time: r.local_time,
                heart_rate: r.heart_rate,
                stress_score,
                group: r.group,
                is_working_hours: r.is_working_hours,
                age: r.age,
            }
        })
        .collect())
}

fn load_productivity(path: &PathBuf) -> Result<Vec<ProductivityRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open productivity file: {}", path.display()))?;
    let mut records = Vec::new();
    for result in reader.deserialize() {
        let record: ProductivityRecord =
            result.with_context(|| format!("Invalid row in {}", path.display()))?;
        records.push(record);
    }
    Ok(records)
}

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Users")]
    users: usize,
    #[tabled(rename = "Breaks")]
    breaks: usize,
    #[tabled(rename = "Peaks")]
    peaks: usize,
    #[tabled(rename = "Outliers")]
    outliers: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LogLevel::Info,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };
    init_logging(&LogConfig {
        level,
        ..LogConfig::default()
    })?;

    let config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };

    match cli.command {
        Commands::Analyze {
            samples,
            productivity,
            output,
        } => {
            let sample_data = load_samples(&samples, &config)?;
            let productivity_data = match productivity {
                Some(path) => load_productivity(&path)?,
                None => Vec::new(),
            };

            let pipeline = AnalysisPipeline::new(config)?;
            let report = pipeline.run(&sample_data, &productivity_data)?;

            let rows: Vec<GroupRow> = report
                .groups
                .values()
                .map(|g| GroupRow {
                    group: g.group.clone(),
                    samples: g.sample_count,
                    users: g.user_count,
                    breaks: g.break_summary.count,
                    peaks: g.peak_summary.count,
                    outliers: g.outlier_count,
                })
                .collect();
            println!("{}", "Analysis summary".bold());
            println!("{}", Table::new(rows));

            if !report.skipped_users.is_empty() {
                println!(
                    "{} {} user(s) excluded:",
                    "warning:".yellow().bold(),
                    report.skipped_users.len()
                );
                for entry in &report.skipped_users {
                    println!("  {} - {}", entry.subject, entry.reason);
                }
            }
            if report.undefined_buckets > 0 {
                println!(
                    "{} {}/{} time buckets lacked sufficient data",
                    "note:".cyan().bold(),
                    report.undefined_buckets,
                    report.time_comparisons.len()
                );
            }

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&report)?;
                fs::write(&path, json)
                    .with_context(|| format!("Failed to write report: {}", path.display()))?;
                println!("{} report written to {}", "ok:".green().bold(), path.display());
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { path } => {
                AnalysisConfig::default().save(&path)?;
                println!("{} wrote default config to {}", "ok:".green().bold(), path.display());
            }
            ConfigAction::Show => {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        },
    }

    Ok(())
}
