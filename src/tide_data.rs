//! # NOAA Tide Feed Fetching and Parsing
//!
//! This module obtains the raw tide feed: predicted high and low waters for the
//! whole forecast horizon, in local station time.
//!
//! ## Data Source
//!
//! ### NOAA Tides and Currents datagetter API
//! - **Product**: `predictions` with `interval=hilo` (extrema only)
//! - **Station**: configurable, defaults to 9684403 (Puntarenas)
//! - **Units**: metric heights above MLLW, `lst_ldt` local time
//! - **Format**: JSON, one object per extremum:
//!
//! ```json
//! {"predictions": [{"t": "2025-07-01 05:42", "v": "2.345", "type": "H"}]}
//! ```
//!
//! ## Error Handling
//!
//! Two levels of failure are kept apart:
//! - **Whole feed**: unreachable server, invalid JSON or a missing
//!   `predictions` array. The fetch is retried, then the run aborts with
//!   [`ForecastError::DataFetch`] and the previous artifact stays in place.
//! - **Single row**: an unparsable timestamp, height or type. The row lands in
//!   [`TideFeed::rejected`] and only the affected day falls back.

use crate::config::Config;
use crate::error::{ForecastError, Result};
use crate::{TideEvent, TideKind};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// NOAA datagetter endpoint
const NOAA_API: &str = "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter";

/// Timestamp format used by the feed (local station time)
pub const FEED_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Pause between a failed fetch and its retry
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// A feed row that could not be turned into a [`TideEvent`].
#[derive(Clone, Debug, PartialEq)]
pub struct RejectedRow {
    /// Calendar day the row belonged to, when the timestamp was readable
    pub date: Option<NaiveDate>,
    pub reason: String,
}

/// Parsed tide feed for a date range.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TideFeed {
    /// Well-formed extrema in feed order
    pub events: Vec<TideEvent>,
    /// Rows that failed to parse
    pub rejected: Vec<RejectedRow>,
}

impl TideFeed {
    pub fn from_events(events: Vec<TideEvent>) -> Self {
        Self {
            events,
            rejected: Vec::new(),
        }
    }

    /// Events whose local timestamp falls on `date`.
    pub fn events_on(&self, date: NaiveDate) -> Vec<TideEvent> {
        self.events
            .iter()
            .filter(|e| e.date() == date)
            .copied()
            .collect()
    }

    /// Number of rejected rows attributed to `date`.
    pub fn rejected_on(&self, date: NaiveDate) -> usize {
        self.rejected
            .iter()
            .filter(|r| r.date == Some(date))
            .count()
    }
}

#[derive(Debug, Deserialize)]
struct FeedDocument {
    predictions: Option<Vec<serde_json::Value>>,
    error: Option<FeedError>,
}

#[derive(Debug, Deserialize)]
struct FeedError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawPrediction {
    t: String,
    v: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Parse a NOAA hi/lo JSON document.
///
/// # Errors
/// [`ForecastError::DataFetch`] when the document itself is unusable. Bad
/// individual rows are collected in [`TideFeed::rejected`] instead.
pub fn parse_feed(json: &str) -> Result<TideFeed> {
    let doc: FeedDocument = serde_json::from_str(json)
        .map_err(|e| ForecastError::DataFetch(format!("invalid feed JSON: {e}")))?;

    let rows = match (doc.predictions, doc.error) {
        (Some(rows), _) => rows,
        (None, Some(err)) => return Err(ForecastError::DataFetch(err.message)),
        (None, None) => {
            return Err(ForecastError::DataFetch(
                "feed has no predictions".to_string(),
            ))
        }
    };

    let mut feed = TideFeed::default();
    for value in rows {
        match parse_row(value) {
            Ok(event) => feed.events.push(event),
            Err(rejected) => {
                warn!(date = ?rejected.date, reason = %rejected.reason, "Rejected tide feed row");
                feed.rejected.push(rejected);
            }
        }
    }
    Ok(feed)
}

fn parse_row(value: serde_json::Value) -> std::result::Result<TideEvent, RejectedRow> {
    // Best-effort date so a bad row can still be charged to its day
    let date = value
        .get("t")
        .and_then(|t| t.as_str())
        .and_then(|t| t.get(..10))
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
    let reject = |reason: String| RejectedRow { date, reason };

    let raw: RawPrediction =
        serde_json::from_value(value).map_err(|e| reject(format!("row shape: {e}")))?;

    let timestamp = NaiveDateTime::parse_from_str(raw.t.trim(), FEED_TIME_FORMAT)
        .map_err(|_| reject(format!("bad timestamp {:?}", raw.t)))?;

    let height_m: f64 = raw
        .v
        .trim()
        .parse()
        .map_err(|_| reject(format!("bad height {:?}", raw.v)))?;
    if !height_m.is_finite() {
        return Err(reject(format!("non-finite height {:?}", raw.v)));
    }

    let kind = match raw.kind.trim() {
        "H" | "HH" => TideKind::High,
        "L" | "LL" => TideKind::Low,
        other => return Err(reject(format!("bad tide type {other:?}"))),
    };

    Ok(TideEvent::new(timestamp, height_m, kind))
}

/// Build the datagetter URL covering `horizon_days` nights from `begin`.
pub fn feed_url(config: &Config, begin: NaiveDate) -> String {
    feed_url_at(NOAA_API, config, begin)
}

fn feed_url_at(base_url: &str, config: &Config, begin: NaiveDate) -> String {
    format!(
        "{base_url}?begin_date={}&range={}&station={}&product=predictions&datum=MLLW\
         &time_zone=lst_ldt&interval=hilo&units=metric&application=TurtleForecaster&format=json",
        begin.format("%Y%m%d"),
        config.forecast.horizon_days * 24,
        config.site.station_id
    )
}

/// Fetch the tide feed for the forecast horizon starting at `begin`.
///
/// Each attempt is bounded by the configured timeout. A failed attempt is
/// retried `fetch_retries` times; after that the run must abort.
///
/// # Example
/// ```no_run
/// use chrono::Local;
/// use nesting_forecast_lib::{config::Config, tide_data};
///
/// # async fn demo() -> Result<(), nesting_forecast_lib::ForecastError> {
/// let config = Config::default();
/// let feed = tide_data::fetch(&config, Local::now().date_naive()).await?;
/// println!("{} extrema", feed.events.len());
/// # Ok(())
/// # }
/// ```
pub async fn fetch(config: &Config, begin: NaiveDate) -> Result<TideFeed> {
    fetch_from(NOAA_API, config, begin).await
}

/// [`fetch`] against another datagetter-compatible endpoint.
pub async fn fetch_from(base_url: &str, config: &Config, begin: NaiveDate) -> Result<TideFeed> {
    let client = reqwest::Client::builder()
        .timeout(config.forecast.fetch_timeout())
        .build()?;
    let url = feed_url_at(base_url, config, begin);
    let attempts = config.forecast.fetch_retries + 1;

    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match fetch_once(&client, &url).await {
            Ok(feed) => {
                info!(
                    attempt,
                    events = feed.events.len(),
                    rejected = feed.rejected.len(),
                    "Fetched tide feed"
                );
                return Ok(feed);
            }
            Err(e) => {
                warn!(attempt, attempts, error = %e, "Tide feed fetch failed");
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    Err(ForecastError::DataFetch(format!(
        "gave up after {attempts} attempts: {last_error}"
    )))
}

async fn fetch_once(client: &reqwest::Client, url: &str) -> Result<TideFeed> {
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    parse_feed(&body)
}

/// Read a feed saved in the NOAA JSON format.
pub fn load_feed_file<P: AsRef<Path>>(path: P) -> Result<TideFeed> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        ForecastError::DataFetch(format!("cannot read {}: {e}", path.as_ref().display()))
    })?;
    parse_feed(&contents)
}
