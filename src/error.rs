//! Error types shared by the forecast pipeline, training and artifact I/O.

use chrono::NaiveDate;
use std::io;
use thiserror::Error;

/// Errors that can occur anywhere between fetching tides and writing the forecast.
///
/// `DataFetch` and `ModelNotTrained` abort a run. `FeatureComputation` is
/// recoverable: the pipeline isolates it to one day and substitutes fallback
/// values. `ScoreOutOfRange` signals an internal defect and is never written
/// to an artifact.
#[derive(Error, Debug)]
pub enum ForecastError {
    /// Tide feed unreachable or structurally malformed
    #[error("tide data fetch failed: {0}")]
    DataFetch(String),

    /// A single day's input could not be turned into features
    #[error("feature computation failed for {date}: {reason}")]
    FeatureComputation { date: NaiveDate, reason: String },

    /// Ensemble used before both regressors were fit or loaded
    #[error("model not trained: fit or load both regressors before predicting")]
    ModelNotTrained,

    /// Viewing score escaped 1..=10 after clamping
    #[error("viewing score {0} outside 1..=10")]
    ScoreOutOfRange(i64),

    /// Not enough usable historical rows to fit the models
    #[error("insufficient training data: {rows} usable rows")]
    InsufficientTrainingData { rows: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;
