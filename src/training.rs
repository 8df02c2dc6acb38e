//! Fitting the ensemble on the sector's nesting history.
//!
//! The historical CSV has one row per patrol night. Arribada nights (mass
//! nesting) are excluded, as are rows missing any feature input or the nest
//! count. Surviving rows are turned into features with the same
//! [`FeatureEngineer`] the forecast uses.

use crate::config::Config;
use crate::ensemble::EnsembleForecaster;
use crate::error::{ForecastError, Result};
use crate::features::{FeatureEngineer, FeatureVector};
use crate::lunar::{LunarInfo, LunarPhaseCalculator, MoonPhase};
use crate::model::{Features, GradientBoosting, ModelBundle, RandomForest};
use crate::DailyTideSummary;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use std::io;
use std::path::Path;
use tracing::{info, warn};

/// Fewest usable rows that can be fit.
const MIN_TRAINING_ROWS: usize = 2;

/// One night of patrol history as read from CSV.
///
/// Every column is optional so that a blank or garbled cell only disqualifies
/// its own row.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrainingRow {
    #[serde(deserialize_with = "csv::invalid_option")]
    pub date: Option<NaiveDate>,
    pub high_tide_time: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub high_tide_height_m: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub low_tide_height_m: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub illumination_pct: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub tide_coefficient: Option<f64>,
    pub lunar_phase: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub total_nests: Option<f64>,
    /// "n" for an ordinary night; anything else is treated as an arribada
    pub arribada: Option<String>,
}

/// A usable training row.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingExample {
    pub date: NaiveDate,
    pub features: FeatureVector,
    pub total_nests: f64,
}

/// What became of a row.
#[derive(Clone, Debug, PartialEq)]
pub enum RowOutcome {
    Kept(TrainingExample),
    Arribada,
    Incomplete,
}

/// Counts from preparing and fitting a dataset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingReport {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub excluded_arribada: usize,
    pub excluded_incomplete: usize,
    /// In-sample mean absolute error of the blended prediction
    pub mean_abs_error: f64,
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H%M"))
        .ok()
}

impl TrainingRow {
    pub fn is_arribada(&self) -> bool {
        !matches!(self.arribada.as_deref().map(str::trim), Some(flag) if flag.eq_ignore_ascii_case("n"))
    }

    /// Classify the row and, if usable, build its features.
    pub fn to_example(
        &self,
        engineer: &FeatureEngineer,
        calculator: &LunarPhaseCalculator,
    ) -> RowOutcome {
        if self.is_arribada() {
            return RowOutcome::Arribada;
        }
        let (
            Some(date),
            Some(high_tide_time),
            Some(high),
            Some(low),
            Some(illumination_pct),
            Some(coefficient),
            Some(total_nests),
        ) = (
            self.date,
            self.high_tide_time.as_deref().and_then(parse_time),
            self.high_tide_height_m,
            self.low_tide_height_m,
            self.illumination_pct,
            self.tide_coefficient,
            self.total_nests,
        )
        else {
            return RowOutcome::Incomplete;
        };
        if ![high, low, illumination_pct, coefficient, total_nests]
            .iter()
            .all(|v| v.is_finite())
        {
            return RowOutcome::Incomplete;
        }

        let tide = DailyTideSummary {
            date,
            high_tide_time,
            high_tide_height_m: high,
            low_tide_height_m: low,
            tide_range_m: high - low,
            tide_coefficient: coefficient.round_ties_even().clamp(0.0, 100.0) as u8,
        };
        // Recorded moon observations win over the computed ones
        let phase = self
            .lunar_phase
            .as_deref()
            .and_then(MoonPhase::from_label)
            .unwrap_or(MoonPhase::New);
        let lunar = LunarInfo {
            illumination_pct,
            phase,
            ..calculator.compute(date)
        };

        let mut features = engineer.build(date, &tide, &lunar);
        // The recorded coefficient is a feature as-is, without whole-number quantization
        features.tide_coefficient = coefficient;

        RowOutcome::Kept(TrainingExample {
            date,
            features,
            total_nests,
        })
    }
}

/// Read the historical CSV. A missing file is an I/O error.
pub fn load_rows<P: AsRef<Path>>(path: P) -> Result<Vec<TrainingRow>> {
    load_rows_from_reader(std::fs::File::open(path.as_ref())?)
}

pub fn load_rows_from_reader<R: io::Read>(reader: R) -> Result<Vec<TrainingRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize::<TrainingRow>().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => warn!(line = line + 2, error = %e, "Skipping unreadable training row"),
        }
    }
    Ok(rows)
}

/// Filter and featurize rows, counting exclusions.
pub fn prepare(rows: &[TrainingRow]) -> (Vec<TrainingExample>, TrainingReport) {
    let engineer = FeatureEngineer::new();
    let calculator = LunarPhaseCalculator::new();
    let mut report = TrainingReport {
        rows_read: rows.len(),
        ..TrainingReport::default()
    };
    let mut examples = Vec::with_capacity(rows.len());
    for row in rows {
        match row.to_example(&engineer, &calculator) {
            RowOutcome::Kept(example) => examples.push(example),
            RowOutcome::Arribada => report.excluded_arribada += 1,
            RowOutcome::Incomplete => report.excluded_incomplete += 1,
        }
    }
    report.rows_kept = examples.len();
    (examples, report)
}

/// Fit both ensemble members on prepared examples.
pub fn train(examples: &[TrainingExample], config: &Config) -> Result<ModelBundle> {
    if examples.len() < MIN_TRAINING_ROWS {
        return Err(ForecastError::InsufficientTrainingData {
            rows: examples.len(),
        });
    }
    let x: Vec<Features> = examples.iter().map(|e| e.features.to_array()).collect();
    let y: Vec<f64> = examples.iter().map(|e| e.total_nests).collect();

    let model_a = RandomForest::fit(&x, &y, &config.training.forest);
    let model_b = GradientBoosting::fit(&x, &y, &config.training.boosting);
    Ok(ModelBundle::new(model_a, model_b, examples.len()))
}

/// Load the configured dataset, fit, and report.
pub fn train_from_config(config: &Config) -> Result<(ModelBundle, TrainingReport)> {
    let rows = load_rows(&config.training.dataset_path)?;
    let (examples, mut report) = prepare(&rows);
    info!(
        read = report.rows_read,
        kept = report.rows_kept,
        arribada = report.excluded_arribada,
        incomplete = report.excluded_incomplete,
        "Prepared training data"
    );

    let bundle = train(&examples, config)?;
    report.mean_abs_error = in_sample_mae(&bundle, &examples, config)?;
    info!(mae = report.mean_abs_error, "Models trained");
    Ok((bundle, report))
}

fn in_sample_mae(bundle: &ModelBundle, examples: &[TrainingExample], config: &Config) -> Result<f64> {
    let forecaster = EnsembleForecaster::from_bundle(bundle, config.ensemble.clone());
    let mut total = 0.0;
    for example in examples {
        total += (forecaster.blend(&example.features)? - example.total_nests).abs();
    }
    Ok(total / examples.len().max(1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
date,high_tide_time,high_tide_height_m,low_tide_height_m,illumination_pct,tide_coefficient,lunar_phase,total_nests,arribada
2024-07-01,18:40,2.6,0.2,20.1,73,Luna creciente,6,n
2024-07-02,19:25,2.7,0.1,28.4,79,Luna creciente,7,n
2024-07-03,20:10,2.5,0.3,37.0,67,Luna creciente,45,y
2024-07-04,,2.4,0.3,46.2,64,Cuarto creciente,3,n
2024-07-05,21:30,2.3,0.4,55.3,58,Cuarto creciente,,n
2024-07-06,2210,2.2,0.5,64.0,52,unknown,2,N
";

    fn config() -> Config {
        let mut config = Config::default();
        config.training.forest.n_trees = 10;
        config.training.forest.max_depth = 4;
        config.training.boosting.n_stages = 20;
        config
    }

    #[test]
    fn test_filtering_counts() {
        let rows = load_rows_from_reader(CSV.as_bytes()).unwrap();
        let (examples, report) = prepare(&rows);
        assert_eq!(report.rows_read, 6);
        assert_eq!(report.excluded_arribada, 1);
        assert_eq!(report.excluded_incomplete, 2);
        assert_eq!(report.rows_kept, 3);
        assert_eq!(examples.len(), 3);
    }

    #[test]
    fn test_examples_use_shared_features() {
        let rows = load_rows_from_reader(CSV.as_bytes()).unwrap();
        let (examples, _) = prepare(&rows);
        let first = &examples[0];
        assert_eq!(first.features.time_from_high_tide, 20.0);
        assert!((first.features.tide_range - 2.4).abs() < 1e-9);
        assert_eq!(first.features.tide_coefficient, 73.0);
        assert_eq!(first.features.monthly_strength, 1.64);
        assert_eq!(first.total_nests, 6.0);
        // HHMM times are accepted; unknown phase maps to new moon
        let last = &examples[2];
        assert_eq!(last.features.time_from_high_tide, 190.0);
        assert_eq!(last.features.moon_sin, 0.0);
        assert_eq!(last.features.moon_cos, 1.0);
    }

    #[test]
    fn test_recorded_coefficient_passes_through() {
        let csv = "\
date,high_tide_time,high_tide_height_m,low_tide_height_m,illumination_pct,tide_coefficient,lunar_phase,total_nests,arribada
2024-08-12,19:00,2.6,0.2,51.0,73.4,Cuarto creciente,4,n
";
        let rows = load_rows_from_reader(csv.as_bytes()).unwrap();
        let (examples, report) = prepare(&rows);
        assert_eq!(report.rows_kept, 1);
        assert_eq!(examples[0].features.tide_coefficient, 73.4);
        assert_eq!(examples[0].features.monthly_strength, 1.14);
    }

    #[test]
    fn test_missing_arribada_flag_is_excluded() {
        let row = TrainingRow {
            arribada: None,
            ..TrainingRow::default()
        };
        assert!(row.is_arribada());
        let row = TrainingRow {
            arribada: Some(" n ".to_string()),
            ..TrainingRow::default()
        };
        assert!(!row.is_arribada());
    }

    #[test]
    fn test_train_and_report() {
        let rows = load_rows_from_reader(CSV.as_bytes()).unwrap();
        let (examples, _) = prepare(&rows);
        let bundle = train(&examples, &config()).unwrap();
        assert_eq!(bundle.metadata.training_rows, 3);
        assert_eq!(bundle.model_a.len(), 10);
        assert_eq!(bundle.model_b.len(), 20);
        let mae = in_sample_mae(&bundle, &examples, &config()).unwrap();
        assert!(mae.is_finite() && mae >= 0.0);
    }

    #[test]
    fn test_too_few_rows() {
        let rows = load_rows_from_reader(CSV.as_bytes()).unwrap();
        let (examples, _) = prepare(&rows);
        assert!(matches!(
            train(&examples[..1], &config()),
            Err(ForecastError::InsufficientTrainingData { rows: 1 })
        ));
    }

    #[test]
    fn test_train_from_config_missing_dataset() {
        let mut config = config();
        config.training.dataset_path = "/nonexistent/nesting_data.csv".into();
        assert!(matches!(
            train_from_config(&config),
            Err(ForecastError::Io(_))
        ));
    }
}
