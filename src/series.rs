use chrono::{Local, Months, NaiveDate};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::errors::LedgerError;
use crate::sheet::RawRow;
use crate::sheet_date::{parse_sheet_date, DateParse};
use crate::subject::{Subject, DATE_COLUMN};

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    /// Date text as it appeared in the sheet.
    pub date_key: String,
    pub date: NaiveDate,
    /// Indexed by `Subject::slot`.
    pub values: [Option<f64>; 4],
}

impl SeriesPoint {
    pub fn value(&self, subject: Subject) -> Option<f64> {
        self.values[subject.slot()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Header,
    EmptyDate,
    UnparsableDate,
}

/// A row left out of the series. Kept for diagnostics; never fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub row_index: usize,
    pub date_text: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconstruction {
    pub series: Vec<SeriesPoint>,
    pub skipped: Vec<SkippedRow>,
}

impl Reconstruction {
    /// Rows dropped for a date that could not be read (header and blank rows
    /// excluded).
    pub fn malformed_count(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| s.reason == SkipReason::UnparsableDate)
            .count()
    }
}

/// Turn a raw export into a date-sorted series. Header, blank-date and
/// unparsable-date rows are skipped; rows sharing a date keep their input
/// order.
pub fn reconstruct(raw: &[RawRow], header_sentinel: &str) -> Reconstruction {
    let mut out = Reconstruction::default();
    let header = header_sentinel.trim();

    for (row_index, row) in raw.iter().enumerate() {
        let date_text = row
            .get(DATE_COLUMN)
            .map(|cell| cell.display_text())
            .unwrap_or_default();
        let skip = |reason| SkippedRow {
            row_index,
            date_text: date_text.clone(),
            reason,
        };

        if date_text.is_empty() {
            out.skipped.push(skip(SkipReason::EmptyDate));
            continue;
        }
        if !header.is_empty() && date_text.eq_ignore_ascii_case(header) {
            out.skipped.push(skip(SkipReason::Header));
            continue;
        }
        let date = match parse_sheet_date(&date_text) {
            DateParse::Parsed(date) => date,
            DateParse::Unparsable => {
                debug!(row_index, date_text = %date_text, "dropping row with unparsable date");
                out.skipped.push(skip(SkipReason::UnparsableDate));
                continue;
            }
        };

        let mut values = [None; 4];
        for subject in Subject::ALL {
            values[subject.slot()] = row
                .get(subject.column_index())
                .and_then(|cell| cell.value.as_number());
        }
        out.series.push(SeriesPoint {
            date_key: date_text,
            date,
            values,
        });
    }

    out.series.sort_by_key(|p| p.date);

    let malformed = out.malformed_count();
    if malformed > 0 {
        warn!(
            malformed,
            kept = out.series.len(),
            "skipped rows with unparsable dates while rebuilding series"
        );
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SeriesWindow {
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "3m")]
    ThreeMonths,
    #[serde(rename = "6m")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[default]
    #[serde(rename = "all")]
    All,
}

impl SeriesWindow {
    pub const SUPPORTED: &'static [&'static str] = &["1m", "3m", "6m", "1y", "all"];

    pub fn as_str(self) -> &'static str {
        match self {
            SeriesWindow::OneMonth => "1m",
            SeriesWindow::ThreeMonths => "3m",
            SeriesWindow::SixMonths => "6m",
            SeriesWindow::OneYear => "1y",
            SeriesWindow::All => "all",
        }
    }

    fn months(self) -> Option<u32> {
        match self {
            SeriesWindow::OneMonth => Some(1),
            SeriesWindow::ThreeMonths => Some(3),
            SeriesWindow::SixMonths => Some(6),
            SeriesWindow::OneYear => Some(12),
            SeriesWindow::All => None,
        }
    }

    /// First day inside the window. Month arithmetic clamps to the end of
    /// shorter months (31 March minus one month is 28 or 29 February).
    pub fn start(self, today: NaiveDate) -> Option<NaiveDate> {
        self.months()
            .and_then(|m| today.checked_sub_months(Months::new(m)))
    }
}

impl FromStr for SeriesWindow {
    type Err = LedgerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "1m" => Ok(SeriesWindow::OneMonth),
            "3m" => Ok(SeriesWindow::ThreeMonths),
            "6m" => Ok(SeriesWindow::SixMonths),
            "1y" => Ok(SeriesWindow::OneYear),
            "" | "all" => Ok(SeriesWindow::All),
            other => Err(LedgerError::InvalidMeasurement(format!(
                "unsupported range: {other}, expected one of {}",
                SeriesWindow::SUPPORTED.join(", ")
            ))),
        }
    }
}

impl fmt::Display for SeriesWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Points dated within `[today - window, today]`. `All` returns the series as is.
pub fn filter_range(series: &[SeriesPoint], window: SeriesWindow, today: NaiveDate) -> Vec<SeriesPoint> {
    match window.start(today) {
        None => series.to_vec(),
        Some(start) => series
            .iter()
            .filter(|p| p.date >= start && p.date <= today)
            .cloned()
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub date_key: String,
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightDelta {
    pub latest: Reading,
    pub previous: Reading,
    /// `latest - previous`, two decimals.
    pub change: f64,
    /// One decimal; `None` when the previous reading is exactly zero.
    pub percent_change: Option<f64>,
}

pub(crate) fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10_f64.powi(digits);
    (value * factor).round() / factor
}

fn readings<'a>(series: &'a [SeriesPoint], subject: Subject) -> impl DoubleEndedIterator<Item = Reading> + 'a {
    series.iter().filter_map(move |p| {
        p.value(subject).map(|value| Reading {
            date_key: p.date_key.clone(),
            date: p.date,
            value,
        })
    })
}

pub fn latest(series: &[SeriesPoint], subject: Subject) -> Option<Reading> {
    readings(series, subject).next_back()
}

pub fn delta(series: &[SeriesPoint], subject: Subject) -> Option<WeightDelta> {
    let mut rev = readings(series, subject).rev();
    let latest = rev.next()?;
    let previous = rev.next()?;
    let change = latest.value - previous.value;
    let percent_change = if previous.value == 0.0 {
        None
    } else {
        Some(round_to(change / previous.value * 100.0, 1))
    };
    Some(WeightDelta {
        change: round_to(change, 2),
        percent_change,
        latest,
        previous,
    })
}
