use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::{LedgerError, LedgerResult};
use crate::series::{delta, filter_range, latest, round_to, Reconstruction, SeriesPoint, SeriesWindow, SkipReason};
use crate::subject::Subject;

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQueryRequest {
    pub range: Option<String>,
    pub cats: Option<Vec<String>>,
    /// ISO date standing in for "today"; defaults to the local date.
    pub today: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

impl Trend {
    pub fn from_change(change: f64) -> Self {
        if change > 0.0 {
            Trend::Up
        } else if change < 0.0 {
            Trend::Down
        } else {
            Trend::Flat
        }
    }
}

fn parse_selected_cats(raw: Option<&[String]>) -> LedgerResult<Vec<Subject>> {
    let Some(names) = raw else {
        return Ok(Subject::ALL.to_vec());
    };
    let mut selected = Vec::new();
    for name in names {
        let subject = name.parse::<Subject>()?;
        if !selected.contains(&subject) {
            selected.push(subject);
        }
    }
    selected.sort();
    Ok(selected)
}

pub(crate) fn parse_today(raw: Option<&str>, fallback: NaiveDate) -> LedgerResult<NaiveDate> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(fallback),
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| {
            LedgerError::InvalidMeasurement(format!("today must be YYYY-MM-DD, got: {text}"))
        }),
    }
}

fn card_for(series: &[SeriesPoint], subject: Subject, selected: bool) -> Value {
    let latest_reading = latest(series, subject);
    let change = delta(series, subject);
    json!({
        "cat": subject,
        "selected": selected,
        "profile": subject.profile(),
        "latest_weight": latest_reading.as_ref().map(|r| round_to(r.value, 2)),
        "latest_date": latest_reading.as_ref().map(|r| r.date_key.clone()),
        "change": change.as_ref().map(|d| d.change),
        "percent_change": change.as_ref().and_then(|d| d.percent_change),
        "trend": change.as_ref().map(|d| Trend::from_change(d.change)),
    })
}

fn chart_row(point: &SeriesPoint, selected: &[Subject]) -> Value {
    let mut row = Map::new();
    row.insert("date".to_string(), json!(point.date_key));
    row.insert(
        "iso_date".to_string(),
        json!(point.date.format("%Y-%m-%d").to_string()),
    );
    for subject in selected {
        row.insert(subject.name().to_string(), json!(point.value(*subject)));
    }
    Value::Object(row)
}

/// Cards for every cat plus chart rows for the selected cats, both computed
/// over the requested window.
pub fn dashboard_payload(
    recon: &Reconstruction,
    req: &DashboardQueryRequest,
    today: NaiveDate,
) -> LedgerResult<Value> {
    let window = req
        .range
        .as_deref()
        .unwrap_or("all")
        .parse::<SeriesWindow>()?;
    let selected = parse_selected_cats(req.cats.as_deref())?;
    let today = parse_today(req.today.as_deref(), today)?;

    let windowed = filter_range(&recon.series, window, today);
    let cards = Subject::ALL
        .iter()
        .map(|s| card_for(&windowed, *s, selected.contains(s)))
        .collect::<Vec<_>>();
    let chart = windowed
        .iter()
        .map(|p| chart_row(p, &selected))
        .collect::<Vec<_>>();
    let skipped_count = |reason: SkipReason| recon.skipped.iter().filter(|s| s.reason == reason).count();

    Ok(json!({
        "range": window,
        "today": today.format("%Y-%m-%d").to_string(),
        "from": window.start(today).map(|d| d.format("%Y-%m-%d").to_string()),
        "selected_cats": selected,
        "point_count": windowed.len(),
        "total_point_count": recon.series.len(),
        "skipped": {
            "header": skipped_count(SkipReason::Header),
            "empty_date": skipped_count(SkipReason::EmptyDate),
            "malformed": skipped_count(SkipReason::UnparsableDate),
            "rows": recon.skipped,
        },
        "cards": cards,
        "chart": chart,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::{CellValue, RawCell, RawRow};
    use crate::series::reconstruct;

    fn row(date: &str, values: [Option<f64>; 4]) -> RawRow {
        let mut out = vec![RawCell::plain(CellValue::text(date))];
        out.extend(
            values
                .iter()
                .map(|v| RawCell::plain(v.map(CellValue::Number).unwrap_or_default())),
        );
        out
    }

    fn fixture() -> Reconstruction {
        reconstruct(
            &[
                row("Fecha", [None; 4]),
                row("01/03/2025", [Some(5.0), Some(4.0), Some(6.0), None]),
                row("01/05/2025", [Some(5.2), Some(4.2), Some(6.0), None]),
                row("01/06/2025", [Some(5.1), None, None, Some(2.0)]),
                row("32/06/2025", [Some(9.9), None, None, None]),
            ],
            "Fecha",
        )
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    fn v_f64(v: &Value, path: &[&str]) -> f64 {
        let mut cur = v;
        for key in path {
            cur = cur
                .get(*key)
                .unwrap_or_else(|| panic!("missing key: {}", key));
        }
        cur.as_f64()
            .unwrap_or_else(|| panic!("expected f64 at path {:?}", path))
    }

    fn card<'a>(payload: &'a Value, cat: &str) -> &'a Value {
        payload
            .get("cards")
            .and_then(Value::as_array)
            .and_then(|cards| {
                cards
                    .iter()
                    .find(|c| c.get("cat").and_then(Value::as_str) == Some(cat))
            })
            .unwrap_or_else(|| panic!("missing card for {cat}"))
    }

    #[test]
    fn full_range_cards_report_latest_and_trend() {
        let payload = dashboard_payload(
            &fixture(),
            &DashboardQueryRequest::default(),
            ymd(2025, 6, 15),
        )
        .expect("dashboard");

        assert_eq!(payload.get("point_count").and_then(Value::as_u64), Some(3));
        assert_eq!(v_f64(&payload, &["skipped", "malformed"]), 1.0);
        assert_eq!(v_f64(&payload, &["skipped", "header"]), 1.0);

        let gaudi = card(&payload, "Gaudí");
        assert_eq!(gaudi.get("latest_weight").and_then(Value::as_f64), Some(5.1));
        assert_eq!(gaudi.get("change").and_then(Value::as_f64), Some(-0.1));
        assert_eq!(gaudi.get("trend").and_then(Value::as_str), Some("down"));

        let maite = card(&payload, "Maite");
        assert_eq!(maite.get("percent_change").and_then(Value::as_f64), Some(5.0));
        assert_eq!(maite.get("trend").and_then(Value::as_str), Some("up"));

        let benito = card(&payload, "Benito");
        assert_eq!(benito.get("trend").and_then(Value::as_str), Some("flat"));

        let cleo = card(&payload, "Cleopatra");
        assert_eq!(cleo.get("latest_weight").and_then(Value::as_f64), Some(2.0));
        assert!(cleo.get("change").map(Value::is_null).unwrap_or(false));
    }

    #[test]
    fn window_and_selection_shape_the_chart() {
        let req = DashboardQueryRequest {
            range: Some("1m".to_string()),
            cats: Some(vec!["maite".to_string(), "Gaudi".to_string()]),
            today: Some("2025-06-01".to_string()),
        };
        let payload = dashboard_payload(&fixture(), &req, ymd(2030, 1, 1)).expect("dashboard");

        assert_eq!(payload.get("from").and_then(Value::as_str), Some("2025-05-01"));
        let chart = payload
            .get("chart")
            .and_then(Value::as_array)
            .expect("chart array");
        assert_eq!(chart.len(), 2);
        assert_eq!(chart[0].get("date").and_then(Value::as_str), Some("01/05/2025"));
        assert_eq!(chart[0].get("Gaudí").and_then(Value::as_f64), Some(5.2));
        assert!(chart[0].get("Benito").is_none());
        assert!(chart[1].get("Maite").map(Value::is_null).unwrap_or(false));

        assert_eq!(
            card(&payload, "Benito").get("selected").and_then(Value::as_bool),
            Some(false)
        );
    }

    #[test]
    fn bad_range_or_cat_is_a_validation_error() {
        let bad_range = DashboardQueryRequest {
            range: Some("2w".to_string()),
            ..DashboardQueryRequest::default()
        };
        assert!(dashboard_payload(&fixture(), &bad_range, ymd(2025, 6, 1))
            .expect_err("bad range")
            .is_validation());

        let bad_cat = DashboardQueryRequest {
            cats: Some(vec!["Tom".to_string()]),
            ..DashboardQueryRequest::default()
        };
        assert_eq!(
            dashboard_payload(&fixture(), &bad_cat, ymd(2025, 6, 1)).expect_err("bad cat"),
            LedgerError::InvalidSubject("Tom".to_string())
        );
    }
}
