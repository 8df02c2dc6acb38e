//! # Forecast Calendar Rendering
//!
//! Text rendering of the forecast artifact as a month grid, for terminals and
//! for checking a run by eye. Each cell shows the day and its viewing score.
//!
//! Missing data is a normal state here, not an error:
//! - a day absent from the artifact shows `--`
//! - a missing artifact shows a "no forecast data" banner above an empty grid

use crate::artifact::{row_for, ArtifactRow};
use chrono::{Datelike, Months, NaiveDate};
use std::fmt::Write;

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
const CELL_WIDTH: usize = 7;

/// Placeholder shown for a night with no forecast
pub const NO_DATA_CELL: &str = "--";

/// Banner shown when no artifact exists
pub const NO_DATA_BANNER: &str = "No forecast data available yet.";

/// Render `year`-`month` as a calendar grid with viewing scores.
pub fn render_calendar(rows: Option<&[ArtifactRow]>, year: i32, month: u32) -> String {
    let mut out = String::new();
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        let _ = writeln!(out, "{NO_DATA_BANNER} (invalid month {year}-{month:02})");
        return out;
    };

    let _ = writeln!(out, "Turtle Watch: {}", first.format("%B %Y"));
    if rows.is_none() {
        let _ = writeln!(out, "{NO_DATA_BANNER}");
    }
    let _ = writeln!(out);

    for name in WEEKDAYS {
        let _ = write!(out, "{name:>CELL_WIDTH$}");
    }
    let _ = writeln!(out);

    let lead = first.weekday().num_days_from_monday() as usize;
    let _ = write!(out, "{}", " ".repeat(lead * CELL_WIDTH));

    let mut column = lead;
    for date in month_days(first) {
        let score = rows
            .and_then(|rows| row_for(rows, date))
            .map_or_else(|| NO_DATA_CELL.to_string(), |r| r.viewing_score.to_string());
        let cell = format!("{:>2}:{:<2}", date.day(), score);
        let _ = write!(out, "{cell:>CELL_WIDTH$}");

        column += 1;
        if column == 7 {
            let _ = writeln!(out);
            column = 0;
        }
    }
    if column != 0 {
        let _ = writeln!(out);
    }

    if let Some(rows) = rows {
        let _ = writeln!(out);
        for row in rows.iter().filter(|r| r.date.year() == year && r.date.month() == month) {
            let _ = writeln!(
                out,
                "{}  score {:>2}  nests {:>4.1}  high tide {} ({:.2} m)  moon {} ({:.1}%)",
                row.date.format("%b %d"),
                row.viewing_score,
                row.prediction,
                row.high_tide_time,
                row.high_tide_height_m,
                row.lunar_phase,
                row.illumination_pct
            );
        }
    }
    out
}

/// Print the calendar to stdout.
pub fn draw_calendar(rows: Option<&[ArtifactRow]>, year: i32, month: u32) {
    print!("{}", render_calendar(rows, year, month));
}

fn month_days(first: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let next = first.checked_add_months(Months::new(1));
    first
        .iter_days()
        .take_while(move |d| next.map_or(d.month() == first.month(), |n| *d < n))
}
