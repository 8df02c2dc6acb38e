//! # Forecast Artifact
//!
//! The forecast is handed to the presentation layer as one CSV file with one
//! row per night, in ascending date order:
//!
//! ```text
//! date,day,month,high_tide_time,high_tide_height_m,low_tide_height_m,illumination_pct,lunar_phase,tide_coefficient,prediction,viewing_score
//! 2025-07-01,1,7,18:50,1.9,0.3,34.2,waxing-crescent,48,2.7,2
//! ```
//!
//! Writes go to a temporary file in the destination directory which is then
//! renamed over the old artifact, so a reader sees either the previous batch
//! or the new one, never a mix.

use crate::error::Result;
use crate::lunar::MoonPhase;
use crate::ForecastRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

/// Format of `high_tide_time` in the artifact
pub const TIME_FORMAT: &str = "%H:%M";

/// One artifact row. Field order is the column order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRow {
    pub date: NaiveDate,
    pub day: u32,
    pub month: u32,
    pub high_tide_time: String,
    pub high_tide_height_m: f64,
    pub low_tide_height_m: f64,
    pub illumination_pct: f64,
    pub lunar_phase: MoonPhase,
    pub tide_coefficient: u8,
    pub prediction: f64,
    pub viewing_score: u8,
}

impl From<&ForecastRecord> for ArtifactRow {
    fn from(record: &ForecastRecord) -> Self {
        ArtifactRow {
            date: record.date,
            day: record.day,
            month: record.month,
            high_tide_time: record.tide.high_tide_time.format(TIME_FORMAT).to_string(),
            high_tide_height_m: record.tide.high_tide_height_m,
            low_tide_height_m: record.tide.low_tide_height_m,
            illumination_pct: record.lunar.illumination_pct,
            lunar_phase: record.lunar.phase,
            tide_coefficient: record.tide.tide_coefficient,
            prediction: record.predicted_nest_count,
            viewing_score: record.viewing_score.get(),
        }
    }
}

/// Write `contents` to `path` through a sibling temporary file and a rename.
pub(crate) fn replace_atomically<F>(path: &Path, contents: F) -> Result<()>
where
    F: FnOnce(&mut NamedTempFile) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    contents(&mut tmp)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Write the whole batch, replacing the previous artifact in one step.
pub fn write_atomic<P: AsRef<Path>>(path: P, records: &[ForecastRecord]) -> Result<()> {
    let path = path.as_ref();
    replace_atomically(path, |file| {
        let mut writer = csv::Writer::from_writer(file);
        for record in records {
            writer.serialize(ArtifactRow::from(record))?;
        }
        writer.flush()?;
        Ok(())
    })?;
    info!(path = %path.display(), rows = records.len(), "Forecast artifact written");
    Ok(())
}

/// Read the artifact; `Ok(None)` when there is none yet.
pub fn read_artifact<P: AsRef<Path>>(path: P) -> Result<Option<Vec<ArtifactRow>>> {
    let mut reader = match csv::Reader::from_path(path.as_ref()) {
        Ok(reader) => reader,
        Err(e) => {
            let missing = matches!(
                e.kind(),
                csv::ErrorKind::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound
            );
            return if missing { Ok(None) } else { Err(e.into()) };
        }
    };
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<ArtifactRow>, csv::Error>>()?;
    Ok(Some(rows))
}

/// Row for `date`, if the artifact covers it.
pub fn row_for(rows: &[ArtifactRow], date: NaiveDate) -> Option<&ArtifactRow> {
    rows.iter().find(|r| r.date == date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::ViewingScore;
    use crate::lunar::LunarInfo;
    use crate::DailyTideSummary;
    use chrono::NaiveTime;

    fn record(d: u32, score: u8) -> ForecastRecord {
        let date = NaiveDate::from_ymd_opt(2025, 7, d).unwrap();
        ForecastRecord::new(
            DailyTideSummary {
                date,
                high_tide_time: NaiveTime::from_hms_opt(18, 50, 0).unwrap(),
                high_tide_height_m: 1.9,
                low_tide_height_m: 0.3,
                tide_range_m: 1.6,
                tide_coefficient: 48,
            },
            LunarInfo {
                phase_age: 3.0,
                illumination_pct: 10.9,
                phase: MoonPhase::WaxingCrescent,
            },
            2.7,
            ViewingScore::new(score).unwrap(),
        )
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.csv");
        let records = vec![record(1, 2), record(2, 9)];
        write_atomic(&path, &records).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "date,day,month,high_tide_time,high_tide_height_m,low_tide_height_m,\
             illumination_pct,lunar_phase,tide_coefficient,prediction,viewing_score"
        );
        assert_eq!(
            lines.next().unwrap(),
            "2025-07-01,1,7,18:50,1.9,0.3,10.9,waxing-crescent,48,2.7,2"
        );

        let rows = read_artifact(&path).unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].viewing_score, 9);
        let second = NaiveDate::from_ymd_opt(2025, 7, 2).unwrap();
        assert_eq!(row_for(&rows, second).map(|r| r.day), Some(2));
    }

    #[test]
    fn test_rewrite_replaces_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.csv");
        write_atomic(&path, &[record(1, 2), record(2, 3), record(3, 4)]).unwrap();
        write_atomic(&path, &[record(5, 7)]).unwrap();

        let rows = read_artifact(&path).unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].day, 5);
        // No temporary files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_artifact_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_artifact(dir.path().join("forecast.csv")).unwrap(), None);
    }
}
