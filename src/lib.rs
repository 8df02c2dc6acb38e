//! # Turtle Nesting Forecast Core Library
//!
//! This library turns a month of tide predictions and the lunar calendar into a
//! nightly nesting forecast for a single beach sector. Every night gets an
//! expected nest count and a bounded 1–10 viewing score.
//!
//! ## Data Flow
//!
//! 1. **Feed**: NOAA hi/lo tide predictions → [`tide_data::TideFeed`]
//! 2. **Select**: one representative high and low tide per day →
//!    [`DailyTideSummary`] (see [`tide_selector`])
//! 3. **Moon**: phase age, illumination and phase label per day →
//!    [`lunar::LunarInfo`]
//! 4. **Features**: the fixed 8-value [`features::FeatureVector`], built by the
//!    same function for training and for live forecasts
//! 5. **Ensemble**: two regressors blended 60/40, then a rule layer for the
//!    viewing score (see [`ensemble`])
//! 6. **Batch**: [`pipeline::ForecastPipeline`] assembles one record per day and
//!    [`artifact`] writes them as a single atomic CSV
//!
//! ## Fallbacks
//!
//! A day with missing or malformed tide data never aborts a run. The selector
//! substitutes the site's configured reference values, tags the day with a
//! [`FallbackReason`], and the pipeline returns the count of such days next to
//! the records.
//!
//! ## Core Types
//!
//! - [`TideEvent`]: a single predicted high or low water
//! - [`DailyTideSummary`]: the representative tides for one calendar day
//! - [`ForecastRecord`]: everything the presentation layer shows for one night

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

// Module declarations
pub mod artifact;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod lunar;
pub mod model;
pub mod pipeline;
pub mod renderer;
pub mod tide_data;
pub mod tide_selector;
pub mod training;

pub use ensemble::{EnsembleForecaster, Prediction, ViewingScore};
pub use error::ForecastError;
pub use features::{FeatureEngineer, FeatureVector};
pub use lunar::{LunarInfo, LunarPhaseCalculator, MoonPhase};
pub use pipeline::{ForecastBatch, ForecastPipeline};
pub use tide_selector::{FallbackReason, TideEventSelector, TideSelection};

/// Patrol start (19:00) in minutes since midnight.
///
/// Both the high-tide selection and the `time_from_high_tide` feature measure
/// distance from this anchor.
pub const PATROL_START_MINUTES: u32 = 19 * 60;

/// Minutes elapsed since local midnight.
///
/// ```
/// use chrono::NaiveTime;
/// use nesting_forecast_lib::minutes_since_midnight;
///
/// let t = NaiveTime::from_hms_opt(18, 50, 0).unwrap();
/// assert_eq!(minutes_since_midnight(t), 1130);
/// ```
pub fn minutes_since_midnight(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// High or low water.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TideKind {
    #[serde(rename = "H")]
    High,
    #[serde(rename = "L")]
    Low,
}

/// A single predicted tide extremum in local station time.
///
/// Events come straight from the feed and are never mutated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TideEvent {
    /// Local date and time of the extremum
    pub timestamp: NaiveDateTime,
    /// Water height in meters above MLLW
    pub height_m: f64,
    /// High or low water
    pub kind: TideKind,
}

impl TideEvent {
    pub fn new(timestamp: NaiveDateTime, height_m: f64, kind: TideKind) -> Self {
        Self {
            timestamp,
            height_m,
            kind,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Representative tides for one calendar day.
///
/// `tide_coefficient` is always within `0..=100`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyTideSummary {
    pub date: NaiveDate,
    /// Time of the high tide closest to patrol start
    pub high_tide_time: NaiveTime,
    pub high_tide_height_m: f64,
    /// Lowest low tide of the day
    pub low_tide_height_m: f64,
    pub tide_range_m: f64,
    pub tide_coefficient: u8,
}

/// One night of the forecast, as handed to the presentation layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub date: NaiveDate,
    pub day: u32,
    pub month: u32,
    pub tide: DailyTideSummary,
    pub lunar: LunarInfo,
    /// Blended nest-count estimate, rounded to one decimal
    pub predicted_nest_count: f64,
    pub viewing_score: ViewingScore,
}

impl ForecastRecord {
    pub fn new(
        tide: DailyTideSummary,
        lunar: LunarInfo,
        predicted_nest_count: f64,
        viewing_score: ViewingScore,
    ) -> Self {
        Self {
            date: tide.date,
            day: tide.date.day(),
            month: tide.date.month(),
            tide,
            lunar,
            predicted_nest_count,
            viewing_score,
        }
    }
}

/// Round to one decimal place, ties to even.
pub(crate) fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}
