//! End-to-end run: train on a small history, forecast from a saved feed,
//! write the artifact and read it back.

use chrono::{Days, NaiveDate};
use std::fmt::Write as _;
use std::path::Path;

use nesting_forecast_lib::config::Config;
use nesting_forecast_lib::model::ModelBundle;
use nesting_forecast_lib::{artifact, renderer, tide_data, training};
use nesting_forecast_lib::{EnsembleForecaster, ForecastError, ForecastPipeline};

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
}

fn history_csv() -> String {
    let mut csv = String::from(
        "date,high_tide_time,high_tide_height_m,low_tide_height_m,illumination_pct,\
         tide_coefficient,lunar_phase,total_nests,arribada\n",
    );
    let start = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
    for i in 0..24u64 {
        let date = start + Days::new(i);
        let high = 2.0 + (i % 5) as f64 * 0.15;
        let low = 0.1 + (i % 3) as f64 * 0.1;
        let coefficient = ((high - low) / 3.3 * 100.0).round();
        let nests = 2 + (i % 7) * 2;
        let _ = writeln!(
            csv,
            "{date},{:02}:{:02},{high:.2},{low:.2},{:.1},{coefficient},full,{nests},{}",
            17 + i % 4,
            (i * 13) % 60,
            (i * 4) as f64,
            if i == 5 { "y" } else { "n" }
        );
    }
    csv
}

/// NOAA-style hi/lo feed for `days` days, with one garbled row on day 2.
fn feed_json(days: u64) -> String {
    let mut rows = Vec::new();
    for i in 0..days {
        let d = as_of() + Days::new(i);
        rows.push(format!(r#"{{"t":"{d} 05:40","v":"0.250","type":"L"}}"#));
        rows.push(format!(r#"{{"t":"{d} 11:55","v":"2.610","type":"H"}}"#));
        rows.push(format!(r#"{{"t":"{d} 18:05","v":"0.180","type":"L"}}"#));
        rows.push(format!(r#"{{"t":"{d} 23:58","v":"2.480","type":"H"}}"#));
    }
    rows.push(r#"{"t":"2025-07-03 14:00","v":"n/a","type":"H"}"#.to_string());
    format!(r#"{{"predictions":[{}]}}"#, rows.join(","))
}

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.training.dataset_path = dir.join("nesting_data.csv");
    config.training.model_path = dir.join("models.json");
    config.forecast.artifact_path = dir.join("forecast.csv");
    config.training.forest.n_trees = 15;
    config.training.forest.max_depth = 5;
    config.training.boosting.n_stages = 30;
    config
}

#[test]
fn test_train_forecast_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::write(&config.training.dataset_path, history_csv()).unwrap();

    let (bundle, report) = training::train_from_config(&config).unwrap();
    assert_eq!(report.rows_read, 24);
    assert_eq!(report.excluded_arribada, 1);
    assert_eq!(report.rows_kept, 23);
    bundle.save(&config.training.model_path).unwrap();
    let bundle = ModelBundle::load(&config.training.model_path).unwrap();

    let feed_path = dir.path().join("tides.json");
    std::fs::write(&feed_path, feed_json(25)).unwrap();
    let feed = tide_data::load_feed_file(&feed_path).unwrap();
    assert_eq!(feed.rejected.len(), 1);

    let forecaster = EnsembleForecaster::from_bundle(&bundle, config.ensemble.clone());
    let batch = ForecastPipeline::new(&config, forecaster)
        .run(&feed, as_of())
        .unwrap();
    assert_eq!(batch.records.len(), 31);
    // Six days past the end of the feed
    assert_eq!(batch.fallback_days, 6);
    assert_eq!(batch.warning_count(), 7);

    artifact::write_atomic(&config.forecast.artifact_path, &batch.records).unwrap();
    let rows = artifact::read_artifact(&config.forecast.artifact_path)
        .unwrap()
        .unwrap();
    assert_eq!(rows.len(), 31);
    assert_eq!(rows[0].date, as_of());
    assert!(rows.windows(2).all(|w| w[0].date < w[1].date));
    for row in &rows {
        assert!(row.tide_coefficient <= 100);
        assert!((1..=10).contains(&row.viewing_score));
        assert!(row.prediction >= 0.0);
    }
    // Closest high to 19:00 is the 23:58 one
    assert_eq!(rows[0].high_tide_time, "23:58");
    assert_eq!(rows[30].tide_coefficient, 70);

    let calendar = renderer::render_calendar(Some(&rows), 2025, 7);
    assert!(!calendar.contains(renderer::NO_DATA_CELL));
}

#[test]
fn test_missing_model_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    assert!(matches!(
        ModelBundle::load(&config.training.model_path),
        Err(ForecastError::ModelNotTrained)
    ));
}

#[test]
fn test_unusable_feed_is_rejected_whole() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tides.json");
    std::fs::write(&path, r#"{"error":{"message":"No data was found"}}"#).unwrap();
    assert!(matches!(
        tide_data::load_feed_file(&path),
        Err(ForecastError::DataFetch(_))
    ));
    assert!(matches!(
        tide_data::load_feed_file(dir.path().join("absent.json")),
        Err(ForecastError::DataFetch(_))
    ));
}

#[test]
fn test_failed_run_leaves_artifact_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::write(&config.forecast.artifact_path, "previous forecast\n").unwrap();

    let forecaster = EnsembleForecaster::new(config.ensemble.clone());
    let feed = tide_data::parse_feed(&feed_json(31)).unwrap();
    let result = ForecastPipeline::new(&config, forecaster).run(&feed, as_of());
    assert!(matches!(result, Err(ForecastError::ModelNotTrained)));

    let contents = std::fs::read_to_string(&config.forecast.artifact_path).unwrap();
    assert_eq!(contents, "previous forecast\n");
}
