//! Moon age, illumination and phase label from a low-precision lunar ephemeris.
//!
//! The Moon's age is derived from the mean Sun–Moon elongation (Meeus,
//! *Astronomical Algorithms*, ch. 47, leading periodic terms only), anchored to
//! the J2000.0 epoch and evaluated at 00:00 UT of the requested date.
//!
//! Age is expressed on a 0–28 day cycle rather than the ~29.53-day synodic
//! month. The phase bins, illumination curve and trained models are all
//! calibrated to that scale, so it stays.
//! Accuracy: a few degrees of elongation, i.e. well under a day of age.

use chrono::{Datelike, NaiveDate};
use core::f64::consts::PI;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of the phase-age cycle used throughout the model.
pub const PHASE_CYCLE_DAYS: f64 = 28.0;

/// Julian day of the J2000.0 epoch (2000-01-01 12:00 TT).
const J2000: f64 = 2_451_545.0;

/// The eight named phases, in cycle order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MoonPhase {
    New,
    WaxingCrescent,
    FirstQuarter,
    WaxingGibbous,
    Full,
    WaningGibbous,
    LastQuarter,
    WaningCrescent,
}

impl MoonPhase {
    /// All phases, indexed by ordinal.
    pub const ALL: [MoonPhase; 8] = [
        MoonPhase::New,
        MoonPhase::WaxingCrescent,
        MoonPhase::FirstQuarter,
        MoonPhase::WaxingGibbous,
        MoonPhase::Full,
        MoonPhase::WaningGibbous,
        MoonPhase::LastQuarter,
        MoonPhase::WaningCrescent,
    ];

    /// Position in the cycle, 0 (new) through 7 (waning crescent).
    pub fn ordinal(self) -> u8 {
        match self {
            MoonPhase::New => 0,
            MoonPhase::WaxingCrescent => 1,
            MoonPhase::FirstQuarter => 2,
            MoonPhase::WaxingGibbous => 3,
            MoonPhase::Full => 4,
            MoonPhase::WaningGibbous => 5,
            MoonPhase::LastQuarter => 6,
            MoonPhase::WaningCrescent => 7,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<MoonPhase> {
        Self::ALL.get(ordinal as usize).copied()
    }

    /// Canonical label written to the forecast artifact.
    pub fn label(self) -> &'static str {
        match self {
            MoonPhase::New => "new",
            MoonPhase::WaxingCrescent => "waxing-crescent",
            MoonPhase::FirstQuarter => "first-quarter",
            MoonPhase::WaxingGibbous => "waxing-gibbous",
            MoonPhase::Full => "full",
            MoonPhase::WaningGibbous => "waning-gibbous",
            MoonPhase::LastQuarter => "last-quarter",
            MoonPhase::WaningCrescent => "waning-crescent",
        }
    }

    /// Parse a canonical label or the Spanish name used on the patrol sheets.
    pub fn from_label(label: &str) -> Option<MoonPhase> {
        let phase = match label.trim() {
            "new" | "Luna nueva" => MoonPhase::New,
            "waxing-crescent" | "Luna creciente" => MoonPhase::WaxingCrescent,
            "first-quarter" | "Cuarto creciente" => MoonPhase::FirstQuarter,
            "waxing-gibbous" | "Gibosa creciente" => MoonPhase::WaxingGibbous,
            "full" | "Luna llena" => MoonPhase::Full,
            "waning-gibbous" | "Gibosa menguante" => MoonPhase::WaningGibbous,
            "last-quarter" | "Cuarto menguante" => MoonPhase::LastQuarter,
            "waning-crescent" | "Luna menguante" => MoonPhase::WaningCrescent,
            _ => return None,
        };
        Some(phase)
    }

    /// Phase bin for an age on the 0–28 scale.
    ///
    /// Bins are deliberately uneven: the quarter and full bins are narrow.
    pub fn from_age(age: f64) -> MoonPhase {
        if age <= 0.9 || age > 27.1 {
            MoonPhase::New
        } else if age <= 6.1 {
            MoonPhase::WaxingCrescent
        } else if age <= 7.9 {
            MoonPhase::FirstQuarter
        } else if age <= 13.1 {
            MoonPhase::WaxingGibbous
        } else if age <= 14.9 {
            MoonPhase::Full
        } else if age <= 20.1 {
            MoonPhase::WaningGibbous
        } else if age <= 21.9 {
            MoonPhase::LastQuarter
        } else {
            MoonPhase::WaningCrescent
        }
    }
}

impl fmt::Display for MoonPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MoonPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoonPhase::from_label(s).ok_or_else(|| format!("unknown lunar phase {s:?}"))
    }
}

/// Moon state for one night.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LunarInfo {
    /// Age on the 0–28 scale (may run slightly past 28 just before new moon)
    pub phase_age: f64,
    /// Illuminated percentage, one decimal
    pub illumination_pct: f64,
    pub phase: MoonPhase,
}

impl LunarInfo {
    /// Build from an age, deriving illumination and label.
    pub fn from_age(phase_age: f64) -> Self {
        LunarInfo {
            phase_age,
            illumination_pct: illumination_pct(phase_age),
            phase: MoonPhase::from_age(phase_age),
        }
    }
}

/// Illuminated percentage for an age: 50 × (1 − cos(2π·age/28)), one decimal.
pub fn illumination_pct(phase_age: f64) -> f64 {
    crate::round_tenths(50.0 * (1.0 - (2.0 * PI * phase_age / PHASE_CYCLE_DAYS).cos()))
}

/// Computes [`LunarInfo`] for calendar dates.
#[derive(Clone, Copy, Debug, Default)]
pub struct LunarPhaseCalculator;

impl LunarPhaseCalculator {
    pub fn new() -> Self {
        LunarPhaseCalculator
    }

    pub fn compute(&self, date: NaiveDate) -> LunarInfo {
        LunarInfo::from_age(phase_age(date))
    }
}

/// Moon age on the 0–28 scale at 00:00 UT of `date`.
pub fn phase_age(date: NaiveDate) -> f64 {
    // ---------- 1. Julian day at midnight and centuries since J2000 ----------
    let jd = julian_day(date);
    // Rough ΔT (TT − UT) in days, parabolic in time from ~1810
    let delta_t = (jd - 2_382_148.0).powi(2) / (41_048_480.0 * 86_400.0);
    let t = (jd + delta_t - J2000) / 36_525.0;
    let (t2, t3) = (t * t, t * t * t);

    // ---------- 2. Fundamental arguments (deg) --------------------------------
    // D: mean elongation of the Moon, M: Sun's mean anomaly, M1: Moon's mean anomaly
    let d = proper_angle(297.85 + 445_267.111_5 * t - 0.001_630_0 * t2 + t3 / 545_868.0);
    let m = proper_angle(357.53 + 35_999.050_3 * t);
    let m1 = proper_angle(134.96 + 477_198.867_6 * t + 0.008_997_0 * t2 + t3 / 69_699.0);
    let (d_r, m_r, m1_r) = (d.to_radians(), m.to_radians(), m1.to_radians());

    // ---------- 3. True elongation with the leading periodic terms -----------
    let elongation = d + 6.29 * m1_r.sin() - 2.10 * m_r.sin()
        + 1.27 * (2.0 * d_r - m1_r).sin()
        + 0.66 * (2.0 * d_r).sin();
    let elongation = proper_angle(elongation).round_ties_even();

    // ---------- 4. Elongation → age on the 28-day scale -----------------------
    // 6.43° offsets the whole-degree rounding and centres new moon on age 0
    (elongation + 6.43) / 360.0 * PHASE_CYCLE_DAYS
}

/// Julian day number at 00:00 UT (proleptic Gregorian).
fn julian_day(date: NaiveDate) -> f64 {
    // Day 1 of CE is JD 1721425.5 at midnight
    date.num_days_from_ce() as f64 + 1_721_424.5
}

fn proper_angle(deg: f64) -> f64 {
    deg.rem_euclid(360.0)
}
