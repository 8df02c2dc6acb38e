//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the nesting-config.toml file.
//! It provides a centralized way to configure the beach site, the forecast horizon,
//! the ensemble's fixed blend and scoring constants, and the training inputs.
//!
//! The blend weights and score thresholds are calibrated constants for this
//! sector. They live here so they can be reviewed, not so they can be tuned per run.

use crate::error::{ForecastError, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "nesting-config.toml";

/// Application configuration loaded from nesting-config.toml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Beach sector and tide station
    pub site: SiteConfig,
    /// Forecast run settings
    pub forecast: ForecastConfig,
    /// Ensemble blend and viewing-score rules
    pub ensemble: EnsembleConfig,
    /// Historical dataset and model hyperparameters
    pub training: TrainingConfig,
}

/// Site reference values and fallbacks
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    /// NOAA station ID (e.g., "9684403" for Puntarenas)
    pub station_id: String,
    /// Human-readable station name for reference
    pub name: String,
    /// Largest typical tidal range at the site, in meters
    pub max_site_range_m: f64,
    /// High tide time used when a day has no high tide ("HH:MM")
    pub fallback_high_tide_time: String,
    /// High tide height used when a day has no high tide
    pub fallback_high_tide_height_m: f64,
    /// Low tide height used when a day has no low tide
    pub fallback_low_tide_height_m: f64,
    /// Coefficient used whenever either tide is a fallback
    pub fallback_tide_coefficient: u8,
}

/// Forecast run settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Number of nights forecast per run
    pub horizon_days: u32,
    /// CSV artifact read by the presentation layer
    pub artifact_path: PathBuf,
    /// Per-request timeout for the tide feed
    pub fetch_timeout_secs: u64,
    /// Extra attempts after a failed fetch
    pub fetch_retries: u32,
}

/// Ensemble blend weights and viewing-score rule constants
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Weight of the random forest (ModelA)
    pub weight_a: f64,
    /// Weight of the gradient-boosted model (ModelB)
    pub weight_b: f64,
    /// Nest count that makes a "great night" for this sector
    pub great_night_nests: f64,
    /// Score reached by a great night before adjustments
    pub base_score_span: f64,
    /// Coefficient above which the energetic-water bonus applies
    pub coefficient_bonus_threshold: u8,
    pub coefficient_bonus: f64,
    /// Illumination above which the bright-moon penalty applies
    pub illumination_penalty_threshold: f64,
    pub illumination_penalty: f64,
}

/// Historical dataset location and model hyperparameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Historical nesting CSV
    pub dataset_path: PathBuf,
    /// Serialized model bundle
    pub model_path: PathBuf,
    pub forest: ForestParams,
    pub boosting: BoostingParams,
}

/// Random forest hyperparameters (ModelA)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub seed: u64,
}

/// Gradient boosting hyperparameters (ModelB)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_stages: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        SiteConfig {
            station_id: "9684403".to_string(),
            name: "Puntarenas, CR".to_string(),
            max_site_range_m: 3.3,
            fallback_high_tide_time: "19:00".to_string(),
            fallback_high_tide_height_m: 2.5,
            fallback_low_tide_height_m: 0.2,
            fallback_tide_coefficient: 70,
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig {
            horizon_days: 31,
            artifact_path: PathBuf::from("forecast.csv"),
            fetch_timeout_secs: 30,
            fetch_retries: 1,
        }
    }
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        EnsembleConfig {
            weight_a: 0.6,
            weight_b: 0.4,
            great_night_nests: 8.0,
            base_score_span: 7.0,
            coefficient_bonus_threshold: 80,
            coefficient_bonus: 1.5,
            illumination_penalty_threshold: 90.0,
            illumination_penalty: 1.0,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            dataset_path: PathBuf::from("nesting_data.csv"),
            model_path: PathBuf::from("model-bundle.json"),
            forest: ForestParams::default(),
            boosting: BoostingParams::default(),
        }
    }
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams {
            n_trees: 500,
            max_depth: 15,
            seed: 42,
        }
    }
}

impl Default for BoostingParams {
    fn default() -> Self {
        BoostingParams {
            n_stages: 300,
            max_depth: 5,
            learning_rate: 0.05,
        }
    }
}

impl SiteConfig {
    /// Parsed fallback high tide time; an unparsable value falls back to 19:00.
    pub fn fallback_high_tide_time(&self) -> NaiveTime {
        NaiveTime::parse_from_str(&self.fallback_high_tide_time, "%H:%M")
            .ok()
            .or_else(|| NaiveTime::from_hms_opt(19, 0, 0))
            .unwrap_or_default()
    }
}

impl ForecastConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Config {
    /// Load configuration from nesting-config.toml
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(site = %config.site.name, path = %path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Invalid config file format, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "No config file found, using default configuration");
                Self::default()
            }
        }
    }

    /// Save current configuration as pretty TOML
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ForecastError::InvalidConfig(e.to_string()))?;
        fs::write(path.as_ref(), contents)?;
        info!(path = %path.as_ref().display(), "Configuration saved");
        Ok(())
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        let e = &self.ensemble;
        if e.weight_a < 0.0 || e.weight_b < 0.0 {
            return Err(ForecastError::InvalidConfig(
                "ensemble weights must be non-negative".to_string(),
            ));
        }
        if (e.weight_a + e.weight_b - 1.0).abs() > 1e-9 {
            return Err(ForecastError::InvalidConfig(format!(
                "ensemble weights must sum to 1.0 (got {} + {})",
                e.weight_a, e.weight_b
            )));
        }
        if e.great_night_nests <= 0.0 {
            return Err(ForecastError::InvalidConfig(
                "great_night_nests must be positive".to_string(),
            ));
        }
        if self.site.max_site_range_m <= 0.0 {
            return Err(ForecastError::InvalidConfig(
                "max_site_range_m must be positive".to_string(),
            ));
        }
        if self.site.fallback_tide_coefficient > 100 {
            return Err(ForecastError::InvalidConfig(
                "fallback_tide_coefficient must be within 0..=100".to_string(),
            ));
        }
        if self.forecast.horizon_days == 0 {
            return Err(ForecastError::InvalidConfig(
                "horizon_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site.station_id, "9684403");
        assert_eq!(config.site.max_site_range_m, 3.3);
        assert_eq!(config.site.fallback_tide_coefficient, 70);
        assert_eq!(config.forecast.horizon_days, 31);
        assert_eq!(config.ensemble.weight_a, 0.6);
        assert_eq!(config.ensemble.weight_b, 0.4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str("[site]\nmax_site_range_m = 2.8\n").unwrap();
        assert_eq!(parsed.site.max_site_range_m, 2.8);
        assert_eq!(parsed.site.station_id, "9684403");
        assert_eq!(parsed.forecast.horizon_days, 31);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/path");
        // Should fallback to default
        assert_eq!(config.site.station_id, "9684403");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nesting-config.toml");
        let mut config = Config::default();
        config.forecast.horizon_days = 14;
        config.save_to_path(&path).unwrap();
        assert_eq!(Config::load_from_path(&path).forecast.horizon_days, 14);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = Config::default();
        config.ensemble.weight_b = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ForecastError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_fallback_time_parses() {
        let site = SiteConfig::default();
        assert_eq!(
            site.fallback_high_tide_time(),
            NaiveTime::from_hms_opt(19, 0, 0).unwrap()
        );
    }
}
