//! Representative tide selection for a single day.
//!
//! Out of a day's two to four extrema the forecast needs one high tide (the
//! one closest to patrol start) and one low tide (the lowest). When either is
//! missing the site's reference values stand in, and the day is tagged.

use crate::config::SiteConfig;
use crate::{minutes_since_midnight, DailyTideSummary, TideEvent, TideKind, PATROL_START_MINUTES};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a day's summary contains substituted values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackReason {
    /// The feed held nothing at all for the day
    NoTideEvents,
    NoHighTide,
    NoLowTide,
    /// Rows for the day were rejected while parsing the feed
    MalformedEvents(usize),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NoTideEvents => write!(f, "no tide events"),
            FallbackReason::NoHighTide => write!(f, "no high tide"),
            FallbackReason::NoLowTide => write!(f, "no low tide"),
            FallbackReason::MalformedEvents(n) => write!(f, "{n} malformed tide rows"),
        }
    }
}

/// A day's tide summary plus the fallbacks that went into it.
#[derive(Clone, Debug, PartialEq)]
pub struct TideSelection {
    pub summary: DailyTideSummary,
    pub fallbacks: Vec<FallbackReason>,
}

impl TideSelection {
    /// True when any part of the summary is a substituted value.
    pub fn used_fallback(&self) -> bool {
        self.fallbacks.iter().any(|r| {
            matches!(
                r,
                FallbackReason::NoTideEvents | FallbackReason::NoHighTide | FallbackReason::NoLowTide
            )
        })
    }
}

/// Picks the representative high and low tide for a day.
#[derive(Clone, Debug)]
pub struct TideEventSelector {
    max_site_range_m: f64,
    fallback_high_time: NaiveTime,
    fallback_high_height_m: f64,
    fallback_low_height_m: f64,
    fallback_coefficient: u8,
}

impl TideEventSelector {
    pub fn new(site: &SiteConfig) -> Self {
        Self {
            max_site_range_m: site.max_site_range_m,
            fallback_high_time: site.fallback_high_tide_time(),
            fallback_high_height_m: site.fallback_high_tide_height_m,
            fallback_low_height_m: site.fallback_low_tide_height_m,
            fallback_coefficient: site.fallback_tide_coefficient.min(100),
        }
    }

    /// Summarize `day_events` for `date`.
    ///
    /// The result depends only on the multiset of events, not their order.
    /// Events with a non-finite height are ignored.
    pub fn select(&self, date: NaiveDate, day_events: &[TideEvent]) -> TideSelection {
        let usable = || day_events.iter().filter(|e| e.height_m.is_finite());
        let mut fallbacks = Vec::new();
        if usable().next().is_none() {
            fallbacks.push(FallbackReason::NoTideEvents);
        }

        // Closest to patrol start; equal distance goes to the earlier event
        let high = usable()
            .filter(|e| e.kind == TideKind::High)
            .min_by(|a, b| {
                patrol_distance(a)
                    .cmp(&patrol_distance(b))
                    .then(a.timestamp.cmp(&b.timestamp))
                    .then(a.height_m.total_cmp(&b.height_m))
            });

        let low = usable()
            .filter(|e| e.kind == TideKind::Low)
            .min_by(|a, b| {
                a.height_m
                    .total_cmp(&b.height_m)
                    .then(a.timestamp.cmp(&b.timestamp))
            });

        if high.is_none() && fallbacks.is_empty() {
            fallbacks.push(FallbackReason::NoHighTide);
        }
        if low.is_none() && fallbacks.is_empty() {
            fallbacks.push(FallbackReason::NoLowTide);
        }

        let (high_tide_time, high_tide_height_m) = match high {
            Some(e) => (e.timestamp.time(), e.height_m),
            None => (self.fallback_high_time, self.fallback_high_height_m),
        };
        let low_tide_height_m = low.map_or(self.fallback_low_height_m, |e| e.height_m);
        let tide_range_m = high_tide_height_m - low_tide_height_m;

        let tide_coefficient = if high.is_some() && low.is_some() {
            self.coefficient(tide_range_m)
        } else {
            self.fallback_coefficient
        };

        TideSelection {
            summary: DailyTideSummary {
                date,
                high_tide_time,
                high_tide_height_m,
                low_tide_height_m,
                tide_range_m,
                tide_coefficient,
            },
            fallbacks,
        }
    }

    /// Range as a percentage of the site's maximum, capped to 0..=100.
    fn coefficient(&self, tide_range_m: f64) -> u8 {
        let pct = (tide_range_m / self.max_site_range_m * 100.0).round_ties_even();
        pct.clamp(0.0, 100.0) as u8
    }
}

fn patrol_distance(event: &&TideEvent) -> u32 {
    minutes_since_midnight(event.timestamp.time()).abs_diff(PATROL_START_MINUTES)
}
