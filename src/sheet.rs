use serde::{Deserialize, Serialize};

/// One cell as the backing table stores it. Cells are loosely typed: a date
/// column may hold text or a serial number, a weight column text or a number.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

pub type SheetRow = Vec<CellValue>;

impl CellValue {
    pub fn text(raw: impl Into<String>) -> Self {
        CellValue::Text(raw.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text rendering used for date keys. Numbers keep their shortest form so a
    /// serial like `45662` round-trips as `"45662"`.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(s) => s.trim().to_string(),
        }
    }

    /// Numeric reading of a weight cell. Empty and non-numeric cells give
    /// `None`; comma decimals (`4,2`) are accepted.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if n.is_finite() => Some(*n),
            CellValue::Text(s) => parse_decimal(s),
            _ => None,
        }
    }
}

pub(crate) fn parse_decimal(raw: &str) -> Option<f64> {
    let text = raw.trim().replace(' ', "");
    if text.is_empty() {
        return None;
    }
    let text = if text.contains('.') {
        text.replace(',', "")
    } else {
        text.replace(',', ".")
    };
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// A cell from an export that may carry both the raw value and the
/// spreadsheet's formatted text (gviz `v` / `f`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawCell {
    pub value: CellValue,
    pub formatted: Option<String>,
}

pub type RawRow = Vec<RawCell>;

impl RawCell {
    pub fn plain(value: CellValue) -> Self {
        Self {
            value,
            formatted: None,
        }
    }

    /// Formatted text wins when present and non-blank.
    pub fn display_text(&self) -> String {
        match self.formatted.as_deref().map(str::trim) {
            Some(f) if !f.is_empty() => f.to_string(),
            _ => self.value.as_text(),
        }
    }
}

/// Wraps stored rows as raw rows so the reconstructor can read the ledger
/// table directly.
pub fn raw_rows_from_sheet(rows: &[SheetRow]) -> Vec<RawRow> {
    rows.iter()
        .map(|row| row.iter().cloned().map(RawCell::plain).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_cells_coerce_or_degrade_to_none() {
        assert_eq!(CellValue::Number(4.2).as_number(), Some(4.2));
        assert_eq!(CellValue::text("4,2").as_number(), Some(4.2));
        assert_eq!(CellValue::text(" 3.75 ").as_number(), Some(3.75));
        assert_eq!(CellValue::text("1,234.5").as_number(), Some(1234.5));
        assert_eq!(CellValue::text("n/a").as_number(), None);
        assert_eq!(CellValue::text("").as_number(), None);
        assert_eq!(CellValue::Empty.as_number(), None);
        assert_eq!(CellValue::Bool(true).as_number(), None);
    }

    #[test]
    fn formatted_text_beats_raw_value() {
        let cell = RawCell {
            value: CellValue::text("Date(2025,0,5)"),
            formatted: Some("05/01/2025".to_string()),
        };
        assert_eq!(cell.display_text(), "05/01/2025");

        let blank_format = RawCell {
            value: CellValue::Number(45662.0),
            formatted: Some("  ".to_string()),
        };
        assert_eq!(blank_format.display_text(), "45662");
    }

    #[test]
    fn untagged_json_shapes_map_to_cells() {
        let row: SheetRow =
            serde_json::from_str(r#"["05/01/2025", 3.2, null, "", true]"#).expect("parse row");
        assert_eq!(
            row,
            vec![
                CellValue::text("05/01/2025"),
                CellValue::Number(3.2),
                CellValue::Empty,
                CellValue::text(""),
                CellValue::Bool(true),
            ]
        );
    }
}
