use chrono::{DateTime, Datelike, Duration, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

use crate::errors::{LedgerError, LedgerResult};

pub const DATE_KEY_FORMAT: &str = "%d/%m/%Y";
const MIN_STRICT_YEAR: i32 = 2000;
const MIN_LENIENT_YEAR: i32 = 1900;
const LENIENT_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

/// Outcome of parsing a sheet date cell. Unparsable cells are a value, not an
/// error: the row gets dropped by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateParse {
    Parsed(NaiveDate),
    Unparsable,
}

impl DateParse {
    pub fn date(self) -> Option<NaiveDate> {
        match self {
            DateParse::Parsed(d) => Some(d),
            DateParse::Unparsable => None,
        }
    }
}

fn trim_cell(text: &str) -> &str {
    text.trim().trim_start_matches('\u{feff}').trim()
}

fn first_token(text: &str) -> &str {
    text.split([' ', 'T']).next().unwrap_or_default()
}

fn gviz_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Date\((\d{4}),\s*(\d{1,2}),\s*(\d{1,2})(?:,[\d,\s]*)?\)$")
            .expect("static gviz date pattern")
    })
}

/// `DD/MM/YYYY` with day 1..=31, month 1..=12, year >= 2000 and a real
/// calendar day. Single-digit day and month are tolerated.
pub fn parse_strict(raw: &str) -> Option<NaiveDate> {
    let token = first_token(trim_cell(raw));
    let parts = token.split('/').collect::<Vec<_>>();
    if parts.len() != 3 {
        return None;
    }
    let (day_raw, month_raw, year_raw) = (parts[0], parts[1], parts[2]);
    let digits_ok = |s: &str, max_len: usize| {
        !s.is_empty() && s.len() <= max_len && s.chars().all(|c| c.is_ascii_digit())
    };
    if !digits_ok(day_raw, 2) || !digits_ok(month_raw, 2) || year_raw.len() != 4 {
        return None;
    }
    let day = day_raw.parse::<u32>().ok()?;
    let month = month_raw.parse::<u32>().ok()?;
    let year = year_raw.parse::<i32>().ok()?;
    if !(1..=31).contains(&day) || !(1..=12).contains(&month) || year < MIN_STRICT_YEAR {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_serial(text: &str) -> Option<NaiveDate> {
    let number = text.parse::<f64>().ok()?;
    if !number.is_finite() || number <= 0.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let date = base.checked_add_signed(Duration::days(number.floor() as i64))?;
    // Small integers in a date column are noise, not serials.
    if date < NaiveDate::from_ymd_opt(MIN_STRICT_YEAR, 1, 1)? {
        return None;
    }
    Some(date)
}

fn parse_gviz_literal(text: &str) -> Option<NaiveDate> {
    let caps = gviz_date_regex().captures(text)?;
    let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
    // gviz months are zero-based.
    let month = caps.get(2)?.as_str().parse::<u32>().ok()? + 1;
    let day = caps.get(3)?.as_str().parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_lenient(text: &str) -> Option<NaiveDate> {
    if let Some(date) = parse_gviz_literal(text) {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    let token = first_token(text);
    for fmt in LENIENT_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(token, fmt) {
            return Some(date);
        }
    }
    parse_serial(text)
}

/// Strict `DD/MM/YYYY` first, then the lenient formats.
pub fn parse_sheet_date(raw: &str) -> DateParse {
    let text = trim_cell(raw);
    if text.is_empty() {
        return DateParse::Unparsable;
    }
    let lenient = || parse_lenient(text).filter(|d| d.year() >= MIN_LENIENT_YEAR);
    match parse_strict(text).or_else(lenient) {
        Some(date) => DateParse::Parsed(date),
        None => DateParse::Unparsable,
    }
}

pub fn format_date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

/// Canonical zero-padded `DD/MM/YYYY` key for an incoming measurement date.
/// Accepts the wire format and ISO `YYYY-MM-DD` as produced by date inputs.
pub fn canonical_date_key(raw: &str) -> LedgerResult<String> {
    let text = trim_cell(raw);
    if text.is_empty() {
        return Err(LedgerError::InvalidMeasurement("date is required".to_string()));
    }
    parse_strict(text)
        .or_else(|| NaiveDate::parse_from_str(text, "%Y-%m-%d").ok())
        .map(format_date_key)
        .ok_or_else(|| {
            LedgerError::InvalidMeasurement(format!("date must be DD/MM/YYYY, got: {text}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    #[test]
    fn strict_stage_reads_day_first() {
        assert_eq!(parse_sheet_date("05/01/2025"), DateParse::Parsed(ymd(2025, 1, 5)));
        assert_eq!(parse_sheet_date("5/1/2025"), DateParse::Parsed(ymd(2025, 1, 5)));
        assert_eq!(
            parse_sheet_date(" 28/11/2024 09:30:00"),
            DateParse::Parsed(ymd(2024, 11, 28))
        );
    }

    #[test]
    fn impossible_calendar_days_are_unparsable() {
        assert_eq!(parse_sheet_date("31/02/2025"), DateParse::Unparsable);
        assert_eq!(parse_sheet_date("00/01/2025"), DateParse::Unparsable);
        assert_eq!(parse_sheet_date("12/13/2025"), DateParse::Unparsable);
    }

    #[test]
    fn strict_stage_rejects_old_years_and_lenient_does_not_rescue_them() {
        assert_eq!(parse_strict("05/01/1999"), None);
        assert_eq!(parse_sheet_date("05/01/1999"), DateParse::Unparsable);
    }

    #[test]
    fn lenient_stage_covers_export_shapes() {
        assert_eq!(parse_sheet_date("2025-01-05"), DateParse::Parsed(ymd(2025, 1, 5)));
        assert_eq!(
            parse_sheet_date("2025-01-05T08:00:00Z"),
            DateParse::Parsed(ymd(2025, 1, 5))
        );
        assert_eq!(parse_sheet_date("Date(2025,0,5)"), DateParse::Parsed(ymd(2025, 1, 5)));
        assert_eq!(parse_sheet_date("45662"), DateParse::Parsed(ymd(2025, 1, 5)));
    }

    #[test]
    fn header_and_noise_are_unparsable() {
        assert_eq!(parse_sheet_date("Fecha"), DateParse::Unparsable);
        assert_eq!(parse_sheet_date(""), DateParse::Unparsable);
        assert_eq!(parse_sheet_date("3"), DateParse::Unparsable);
        assert_eq!(parse_sheet_date("05/01/20"), DateParse::Unparsable);
    }

    #[test]
    fn canonical_key_pads_and_converts_iso() {
        assert_eq!(canonical_date_key("5/1/2025").as_deref(), Ok("05/01/2025"));
        assert_eq!(canonical_date_key("2025-01-05").as_deref(), Ok("05/01/2025"));
        assert!(canonical_date_key("").is_err());
        assert!(canonical_date_key("31/02/2025").is_err());
    }
}
