//! Feature engineering shared by training and live forecasting.
//!
//! [`FeatureEngineer::build`] is the only way a [`FeatureVector`] is made.
//! Training rows and forecast days both go through it, so the models never see
//! features computed two different ways.

use crate::lunar::{LunarInfo, MoonPhase};
use crate::{minutes_since_midnight, DailyTideSummary, PATROL_START_MINUTES};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Number of model inputs.
pub const FEATURE_COUNT: usize = 8;

/// Column names, in model input order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "moon_sin",
    "moon_cos",
    "illumination_pct",
    "time_from_high_tide",
    "tide_range",
    "tide_coefficient",
    "high_tide_height_m",
    "monthly_strength",
];

/// Relative nesting strength by calendar month, from the sector's patrol
/// history (September = 1.00). Months not listed count as 1.0.
const MONTHLY_STRENGTH: [(u32, f64); 9] = [
    (1, 0.34),
    (2, 0.25),
    (3, 0.20),
    (7, 1.64),
    (8, 1.14),
    (9, 1.00),
    (10, 1.01),
    (11, 0.50),
    (12, 0.53),
];

/// Seasonal strength for `month` (1–12).
pub fn monthly_strength(month: u32) -> f64 {
    MONTHLY_STRENGTH
        .iter()
        .find(|(m, _)| *m == month)
        .map_or(1.0, |(_, strength)| *strength)
}

/// The fixed model input for one night.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub moon_sin: f64,
    pub moon_cos: f64,
    pub illumination_pct: f64,
    /// Minutes between the selected high tide and patrol start
    pub time_from_high_tide: f64,
    pub tide_range: f64,
    pub tide_coefficient: f64,
    pub high_tide_height_m: f64,
    pub monthly_strength: f64,
}

impl FeatureVector {
    /// Values in [`FEATURE_NAMES`] order.
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.moon_sin,
            self.moon_cos,
            self.illumination_pct,
            self.time_from_high_tide,
            self.tide_range,
            self.tide_coefficient,
            self.high_tide_height_m,
            self.monthly_strength,
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// Builds feature vectors. Stateless; kept as a type so callers share one seam.
#[derive(Clone, Copy, Debug, Default)]
pub struct FeatureEngineer;

impl FeatureEngineer {
    pub fn new() -> Self {
        FeatureEngineer
    }

    pub fn build(
        &self,
        date: NaiveDate,
        tide: &DailyTideSummary,
        lunar: &LunarInfo,
    ) -> FeatureVector {
        let (moon_sin, moon_cos) = moon_encoding(lunar.phase);
        let time_from_high_tide =
            minutes_since_midnight(tide.high_tide_time).abs_diff(PATROL_START_MINUTES);

        FeatureVector {
            moon_sin,
            moon_cos,
            illumination_pct: lunar.illumination_pct,
            time_from_high_tide: f64::from(time_from_high_tide),
            tide_range: tide.tide_range_m,
            tide_coefficient: f64::from(tide.tide_coefficient),
            high_tide_height_m: tide.high_tide_height_m,
            monthly_strength: monthly_strength(date.month()),
        }
    }
}

/// Cyclical encoding of the phase ordinal so new moon sits next to waning crescent.
fn moon_encoding(phase: MoonPhase) -> (f64, f64) {
    let angle = 2.0 * PI * f64::from(phase.ordinal()) / 8.0;
    (angle.sin(), angle.cos())
}
