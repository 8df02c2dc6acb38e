//! Two-model ensemble and the viewing-score rule layer.
//!
//! The learned part is a fixed-weight blend of ModelA (random forest) and
//! ModelB (gradient boosting). The viewing score is not learned: it rescales
//! the blended nest count so that a great night lands near 7, then applies a
//! bonus for energetic water and a penalty for a bright moon.

use crate::config::EnsembleConfig;
use crate::error::{ForecastError, Result};
use crate::features::FeatureVector;
use crate::model::{ModelBundle, Regressor};
use crate::round_tenths;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer score in 1..=10.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ViewingScore(u8);

impl ViewingScore {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(score: u8) -> Result<Self> {
        Self::checked(i64::from(score))
    }

    fn checked(score: i64) -> Result<Self> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&score) {
            Ok(ViewingScore(score as u8))
        } else {
            Err(ForecastError::ScoreOutOfRange(score))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ViewingScore {
    type Error = ForecastError;

    fn try_from(value: u8) -> Result<Self> {
        ViewingScore::new(value)
    }
}

impl From<ViewingScore> for u8 {
    fn from(score: ViewingScore) -> u8 {
        score.0
    }
}

impl fmt::Display for ViewingScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ensemble output for one night.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    /// Non-negative, rounded to one decimal
    pub predicted_nest_count: f64,
    pub viewing_score: ViewingScore,
}

/// Blends two regressors and scores the result.
///
/// Models are borrowed, never owned: the trained bundle outlives every
/// forecaster built from it and is not modified during inference.
#[derive(Clone, Debug)]
pub struct EnsembleForecaster<'m> {
    model_a: Option<&'m dyn Regressor>,
    model_b: Option<&'m dyn Regressor>,
    config: EnsembleConfig,
}

impl<'m> EnsembleForecaster<'m> {
    /// An ensemble with no models yet; [`predict`](Self::predict) fails until
    /// both are supplied.
    pub fn new(config: EnsembleConfig) -> Self {
        Self {
            model_a: None,
            model_b: None,
            config,
        }
    }

    pub fn from_bundle(bundle: &'m ModelBundle, config: EnsembleConfig) -> Self {
        Self::new(config).with_models(&bundle.model_a, &bundle.model_b)
    }

    pub fn with_models(mut self, model_a: &'m dyn Regressor, model_b: &'m dyn Regressor) -> Self {
        self.model_a = Some(model_a);
        self.model_b = Some(model_b);
        self
    }

    pub fn is_trained(&self) -> bool {
        self.model_a.is_some() && self.model_b.is_some()
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Weighted blend of both models, floored at zero and rounded to one decimal.
    pub fn blend(&self, features: &FeatureVector) -> Result<f64> {
        let (Some(a), Some(b)) = (self.model_a, self.model_b) else {
            return Err(ForecastError::ModelNotTrained);
        };
        let x = features.to_array();
        let blended = self.config.weight_a * a.predict(&x) + self.config.weight_b * b.predict(&x);
        // NaN and negative blends both floor to zero
        Ok(if blended > 0.0 {
            round_tenths(blended)
        } else {
            0.0
        })
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        let predicted_nest_count = self.blend(features)?;
        let viewing_score = self.viewing_score(predicted_nest_count, features)?;
        Ok(Prediction {
            predicted_nest_count,
            viewing_score,
        })
    }

    /// Rule-based 1–10 score for a blended nest count.
    pub fn viewing_score(
        &self,
        predicted_nest_count: f64,
        features: &FeatureVector,
    ) -> Result<ViewingScore> {
        let c = &self.config;
        let mut base = predicted_nest_count / c.great_night_nests * c.base_score_span;
        if features.tide_coefficient > f64::from(c.coefficient_bonus_threshold) {
            base += c.coefficient_bonus;
        }
        if features.illumination_pct > c.illumination_penalty_threshold {
            base -= c.illumination_penalty;
        }
        let clamped = base
            .round_ties_even()
            .clamp(f64::from(ViewingScore::MIN), f64::from(ViewingScore::MAX));
        // NaN survives the clamp and casts to 0, which is rejected
        ViewingScore::checked(clamped as i64)
    }
}
