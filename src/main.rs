//! # Nesting Forecast Entry Point
//!
//! Command-line driver for the daily forecast job and its companions:
//! - `train`: fit the ensemble on the nesting history and save the bundle
//! - `forecast`: fetch tides, run the pipeline, replace the forecast artifact
//! - `run`: `train` then `forecast`, as the scheduled daily job does
//! - `show`: print the artifact as a month calendar
//!
//! A failed fetch or a missing model aborts the run before anything is
//! written, so the previous artifact stays in place.

use anyhow::Context;
use chrono::{Datelike, Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nesting_forecast_lib::config::{self, Config};
use nesting_forecast_lib::model::ModelBundle;
use nesting_forecast_lib::{artifact, renderer, tide_data, training};
use nesting_forecast_lib::{EnsembleForecaster, ForecastPipeline};

#[derive(Debug, Parser)]
#[command(name = "nesting-forecast", version, about = "Nightly sea-turtle nesting forecast")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fit both models on the historical dataset
    Train,
    /// Produce the forecast artifact with the saved models
    Forecast(ForecastArgs),
    /// Retrain, then forecast
    Run(ForecastArgs),
    /// Print the forecast calendar for a month
    Show {
        /// Month to show, as YYYY-MM (defaults to the current month)
        #[arg(long)]
        month: Option<String>,
    },
}

#[derive(Debug, Args)]
struct ForecastArgs {
    /// Read the tide feed from a saved NOAA JSON file instead of fetching it
    #[arg(long)]
    feed: Option<PathBuf>,
    /// First forecast night (defaults to today)
    #[arg(long)]
    as_of: Option<NaiveDate>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::load_from_path(&cli.config);
    config.validate().context("invalid configuration")?;

    match &cli.command {
        Command::Train => train(&config),
        Command::Forecast(args) => forecast(&config, args),
        Command::Run(args) => {
            train(&config)?;
            forecast(&config, args)
        }
        Command::Show { month } => show(&config, month.as_deref()),
    }
}

fn train(config: &Config) -> anyhow::Result<()> {
    let (bundle, report) = training::train_from_config(config).with_context(|| {
        format!(
            "training on {} failed",
            config.training.dataset_path.display()
        )
    })?;
    bundle
        .save(&config.training.model_path)
        .context("saving model bundle")?;
    info!(
        kept = report.rows_kept,
        excluded_arribada = report.excluded_arribada,
        excluded_incomplete = report.excluded_incomplete,
        mae = report.mean_abs_error,
        "Model bundle updated"
    );
    Ok(())
}

fn forecast(config: &Config, args: &ForecastArgs) -> anyhow::Result<()> {
    // Load models first: without them nothing may be written
    let bundle = ModelBundle::load(&config.training.model_path).with_context(|| {
        format!(
            "loading model bundle {}",
            config.training.model_path.display()
        )
    })?;
    let as_of = args.as_of.unwrap_or_else(|| Local::now().date_naive());

    let feed = match &args.feed {
        Some(path) => tide_data::load_feed_file(path)?,
        None => {
            // Create Tokio runtime for the fetch only; the pipeline is synchronous
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(tide_data::fetch(config, as_of))
                .context("tide feed unavailable, keeping previous forecast")?
        }
    };

    let forecaster = EnsembleForecaster::from_bundle(&bundle, config.ensemble.clone());
    let batch = ForecastPipeline::new(config, forecaster)
        .run(&feed, as_of)
        .context("forecast run aborted")?;

    artifact::write_atomic(&config.forecast.artifact_path, &batch.records)
        .context("writing forecast artifact")?;

    if batch.fallback_days > 0 {
        warn!(
            fallback_days = batch.fallback_days,
            warnings = batch.warning_count(),
            "Some nights used fallback tide values"
        );
    }
    info!(
        path = %config.forecast.artifact_path.display(),
        nights = batch.records.len(),
        "Forecast updated"
    );
    Ok(())
}

fn show(config: &Config, month: Option<&str>) -> anyhow::Result<()> {
    let first = match month {
        Some(m) => NaiveDate::parse_from_str(&format!("{m}-01"), "%Y-%m-%d")
            .with_context(|| format!("invalid month {m:?}, expected YYYY-MM"))?,
        None => Local::now().date_naive(),
    };

    // An unreadable artifact renders the same as a missing one
    let rows = artifact::read_artifact(&config.forecast.artifact_path).unwrap_or_else(|e| {
        warn!(error = %e, "Forecast artifact unreadable");
        None
    });
    renderer::draw_calendar(rows.as_deref(), first.year(), first.month());
    Ok(())
}
