//! Rolling-horizon forecast run.
//!
//! For each night from `as_of` onward the pipeline selects tides, computes the
//! moon, builds features and asks the ensemble for a prediction. Days are
//! independent: a day with bad or missing tide data is filled from the site
//! fallbacks and reported in [`ForecastBatch::warnings`], while the rest of the
//! run carries on. Only an untrained ensemble or an internal scoring defect
//! stops a run, and then no records are returned at all.

use crate::config::Config;
use crate::ensemble::EnsembleForecaster;
use crate::error::{ForecastError, Result};
use crate::features::{FeatureEngineer, FeatureVector};
use crate::lunar::{LunarInfo, LunarPhaseCalculator};
use crate::tide_data::TideFeed;
use crate::tide_selector::{FallbackReason, TideEventSelector, TideSelection};
use crate::ForecastRecord;
use chrono::{Days, NaiveDate};
use tracing::{debug, info, warn};

/// A night that needed substitute or partial inputs.
#[derive(Clone, Debug, PartialEq)]
pub struct DayWarning {
    pub date: NaiveDate,
    pub reasons: Vec<FallbackReason>,
}

/// Complete output of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct ForecastBatch {
    /// Exactly one record per night, ascending by date
    pub records: Vec<ForecastRecord>,
    /// Nights whose tide summary contains fallback values
    pub fallback_days: usize,
    /// Every night with a fallback or rejected feed rows
    pub warnings: Vec<DayWarning>,
}

impl ForecastBatch {
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

/// Runs selector, lunar calculator, feature engineer and ensemble over a horizon.
#[derive(Clone, Debug)]
pub struct ForecastPipeline<'m> {
    selector: TideEventSelector,
    lunar: LunarPhaseCalculator,
    features: FeatureEngineer,
    forecaster: EnsembleForecaster<'m>,
    horizon_days: u32,
}

impl<'m> ForecastPipeline<'m> {
    pub fn new(config: &Config, forecaster: EnsembleForecaster<'m>) -> Self {
        Self {
            selector: TideEventSelector::new(&config.site),
            lunar: LunarPhaseCalculator::new(),
            features: FeatureEngineer::new(),
            forecaster,
            horizon_days: config.forecast.horizon_days,
        }
    }

    pub fn with_horizon(mut self, horizon_days: u32) -> Self {
        self.horizon_days = horizon_days;
        self
    }

    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    /// Forecast `horizon_days` nights starting at `as_of`.
    ///
    /// # Errors
    /// - [`ForecastError::ModelNotTrained`] before any day is processed
    /// - [`ForecastError::ScoreOutOfRange`] if the score rules are violated
    pub fn run(&self, feed: &TideFeed, as_of: NaiveDate) -> Result<ForecastBatch> {
        if !self.forecaster.is_trained() {
            return Err(ForecastError::ModelNotTrained);
        }

        let mut records = Vec::with_capacity(self.horizon_days as usize);
        let mut warnings = Vec::new();
        let mut fallback_days = 0;

        for offset in 0..self.horizon_days {
            let date = as_of
                .checked_add_days(Days::new(u64::from(offset)))
                .ok_or_else(|| ForecastError::FeatureComputation {
                    date: as_of,
                    reason: format!("date {offset} days ahead is out of range"),
                })?;

            let (record, selection, reasons) = self.forecast_day(feed, date)?;
            if selection.used_fallback() {
                fallback_days += 1;
            }
            if !reasons.is_empty() {
                warn!(%date, reasons = ?reasons, "Using fallback tide values");
                warnings.push(DayWarning { date, reasons });
            }
            records.push(record);
        }

        info!(
            %as_of,
            days = records.len(),
            fallback_days,
            warnings = warnings.len(),
            "Forecast run complete"
        );
        Ok(ForecastBatch {
            records,
            fallback_days,
            warnings,
        })
    }

    fn forecast_day(
        &self,
        feed: &TideFeed,
        date: NaiveDate,
    ) -> Result<(ForecastRecord, TideSelection, Vec<FallbackReason>)> {
        let lunar = self.lunar.compute(date);
        let mut selection = self.selector.select(date, &feed.events_on(date));
        let mut reasons = selection.fallbacks.clone();

        let malformed = feed.rejected_on(date);
        if malformed > 0 {
            reasons.push(FallbackReason::MalformedEvents(malformed));
        }

        let features = match self.checked_features(date, &selection, &lunar) {
            Ok(features) => features,
            Err(e) => {
                warn!(error = %e, "Discarding tide data for the day");
                selection = self.selector.select(date, &[]);
                reasons.extend(selection.fallbacks.iter().copied());
                self.features.build(date, &selection.summary, &lunar)
            }
        };

        let prediction = self.forecaster.predict(&features)?;
        debug!(
            %date,
            nests = prediction.predicted_nest_count,
            score = prediction.viewing_score.get(),
            "Forecast day"
        );

        let record = ForecastRecord::new(
            selection.summary,
            lunar,
            prediction.predicted_nest_count,
            prediction.viewing_score,
        );
        Ok((record, selection, reasons))
    }

    fn checked_features(
        &self,
        date: NaiveDate,
        selection: &TideSelection,
        lunar: &LunarInfo,
    ) -> Result<FeatureVector> {
        let features = self.features.build(date, &selection.summary, lunar);
        if features.is_finite() {
            Ok(features)
        } else {
            Err(ForecastError::FeatureComputation {
                date,
                reason: format!("non-finite features {:?}", features.to_array()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnsembleConfig;
    use crate::model::{Features, Regressor};
    use crate::tide_data::RejectedRow;
    use crate::{TideEvent, TideKind};
    use chrono::NaiveDateTime;

    #[derive(Debug)]
    struct Constant(f64);

    impl Regressor for Constant {
        fn predict(&self, _features: &Features) -> f64 {
            self.0
        }
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
    }

    fn at(date: NaiveDate, hm: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {hm}"), "%Y-%m-%d %H:%M").unwrap()
    }

    /// Two highs and two lows per day for `days` days, skipping `gaps`.
    fn feed(days: u64, gaps: &[u64]) -> TideFeed {
        let mut events = Vec::new();
        for offset in (0..days).filter(|o| !gaps.contains(o)) {
            let d = start() + Days::new(offset);
            events.push(TideEvent::new(at(d, "06:10"), 2.7, TideKind::High));
            events.push(TideEvent::new(at(d, "12:25"), 0.3, TideKind::Low));
            events.push(TideEvent::new(at(d, "18:35"), 2.5, TideKind::High));
            events.push(TideEvent::new(at(d, "00:50"), 0.1, TideKind::Low));
        }
        TideFeed::from_events(events)
    }

    #[test]
    fn test_full_horizon_in_order() {
        let (a, b) = (Constant(4.0), Constant(6.0));
        let config = Config::default();
        let pipeline = ForecastPipeline::new(
            &config,
            EnsembleForecaster::new(config.ensemble.clone()).with_models(&a, &b),
        );
        let batch = pipeline.run(&feed(31, &[]), start()).unwrap();

        assert_eq!(batch.records.len(), 31);
        assert_eq!(batch.fallback_days, 0);
        assert!(batch.warnings.is_empty());
        assert!(batch.records.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(batch.records[0].date, start());

        let first = &batch.records[0];
        assert_eq!(first.tide.high_tide_time.to_string(), "18:35:00");
        assert_eq!(first.tide.low_tide_height_m, 0.1);
        assert_eq!(first.tide.tide_coefficient, 73);
        assert_eq!(first.predicted_nest_count, 4.8);
        assert_eq!((first.day, first.month), (1, 7));
    }

    #[test]
    fn test_missing_days_fall_back() {
        let (a, b) = (Constant(1.0), Constant(1.0));
        let config = Config::default();
        let pipeline = ForecastPipeline::new(
            &config,
            EnsembleForecaster::new(config.ensemble.clone()).with_models(&a, &b),
        );
        // Feed ends after 20 days and skips day 3
        let batch = pipeline.run(&feed(20, &[3]), start()).unwrap();

        assert_eq!(batch.records.len(), 31);
        assert_eq!(batch.fallback_days, 12);
        assert_eq!(batch.warning_count(), 12);
        let gap = &batch.records[3];
        assert_eq!(gap.tide.tide_coefficient, 70);
        assert_eq!(gap.tide.high_tide_height_m, 2.5);
        assert_eq!(
            batch.warnings[0].reasons,
            vec![FallbackReason::NoTideEvents]
        );
        for r in &batch.records {
            assert!(r.tide.tide_coefficient <= 100);
            assert!((1..=10).contains(&r.viewing_score.get()));
        }
    }

    #[test]
    fn test_rejected_rows_are_reported() {
        let (a, b) = (Constant(1.0), Constant(1.0));
        let config = Config::default();
        let pipeline = ForecastPipeline::new(
            &config,
            EnsembleForecaster::new(config.ensemble.clone()).with_models(&a, &b),
        )
        .with_horizon(3);
        let mut tides = feed(3, &[]);
        tides.rejected.push(RejectedRow {
            date: Some(start() + Days::new(1)),
            reason: "bad height".to_string(),
        });

        let batch = pipeline.run(&tides, start()).unwrap();
        assert_eq!(batch.records.len(), 3);
        assert_eq!(batch.fallback_days, 0);
        assert_eq!(batch.warning_count(), 1);
        assert_eq!(
            batch.warnings[0].reasons,
            vec![FallbackReason::MalformedEvents(1)]
        );
    }

    #[test]
    fn test_non_finite_features_rebuild_day_from_fallbacks() {
        let (a, b) = (Constant(1.0), Constant(1.0));
        let config = Config::default();
        let pipeline = ForecastPipeline::new(
            &config,
            EnsembleForecaster::new(config.ensemble.clone()).with_models(&a, &b),
        )
        .with_horizon(3);
        let mut tides = feed(3, &[1]);
        let d = start() + Days::new(1);
        // Each height is finite but their difference overflows to infinity
        tides.events.push(TideEvent::new(at(d, "19:05"), 1.7e308, TideKind::High));
        tides.events.push(TideEvent::new(at(d, "01:10"), -1.7e308, TideKind::Low));

        let batch = pipeline.run(&tides, start()).unwrap();
        assert_eq!(batch.records.len(), 3);
        assert_eq!(batch.fallback_days, 1);
        let day = &batch.records[1];
        assert_eq!(day.date, d);
        assert_eq!(day.tide.high_tide_height_m, config.site.fallback_high_tide_height_m);
        assert_eq!(day.tide.low_tide_height_m, config.site.fallback_low_tide_height_m);
        assert_eq!(day.tide.tide_coefficient, config.site.fallback_tide_coefficient);
        assert_eq!(batch.warnings[0].date, d);
        assert_eq!(batch.warnings[0].reasons, vec![FallbackReason::NoTideEvents]);
    }

    #[test]
    fn test_untrained_run_aborts() {
        let config = Config::default();
        let pipeline = ForecastPipeline::new(&config, EnsembleForecaster::new(EnsembleConfig::default()));
        assert!(matches!(
            pipeline.run(&feed(31, &[]), start()),
            Err(ForecastError::ModelNotTrained)
        ));
    }
}
