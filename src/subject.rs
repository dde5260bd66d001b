use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::LedgerError;

/// Column 0 of every ledger row holds the date.
pub const DATE_COLUMN: usize = 0;
/// Date column plus one column per cat.
pub const SHEET_WIDTH: usize = 5;

/// The cats whose weight is tracked. The set is closed; each maps to a fixed
/// sheet column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    Gaudi,
    Maite,
    Benito,
    Cleopatra,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubjectProfile {
    pub birthday: &'static str,
    pub note: &'static str,
    pub color: &'static str,
}

impl Subject {
    /// Sheet column order.
    pub const ALL: [Subject; 4] = [
        Subject::Gaudi,
        Subject::Maite,
        Subject::Benito,
        Subject::Cleopatra,
    ];

    pub fn column_index(self) -> usize {
        match self {
            Subject::Gaudi => 1,
            Subject::Maite => 2,
            Subject::Benito => 3,
            Subject::Cleopatra => 4,
        }
    }

    /// Position inside a per-subject value array.
    pub fn slot(self) -> usize {
        self.column_index() - 1
    }

    pub fn name(self) -> &'static str {
        match self {
            Subject::Gaudi => "Gaudí",
            Subject::Maite => "Maite",
            Subject::Benito => "Benito",
            Subject::Cleopatra => "Cleopatra",
        }
    }

    pub fn profile(self) -> SubjectProfile {
        match self {
            Subject::Gaudi => SubjectProfile {
                birthday: "28 de noviembre",
                note: "",
                color: "#FFE66D",
            },
            Subject::Maite => SubjectProfile {
                birthday: "4 de enero",
                note: "",
                color: "#FF6B9D",
            },
            Subject::Benito => SubjectProfile {
                birthday: "13 de noviembre",
                note: "Dieta renal especial",
                color: "#4ECDC4",
            },
            Subject::Cleopatra => SubjectProfile {
                birthday: "2 de julio",
                note: "La más juguetona",
                color: "#6B9BFF",
            },
        }
    }
}

fn fold_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            'í' | 'Í' => 'i',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

impl FromStr for Subject {
    type Err = LedgerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let folded = fold_name(raw);
        Subject::ALL
            .into_iter()
            .find(|s| fold_name(s.name()) == folded)
            .ok_or_else(|| LedgerError::InvalidSubject(raw.trim().to_string()))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Subject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_follow_sheet_order() {
        let columns = Subject::ALL
            .iter()
            .map(|s| s.column_index())
            .collect::<Vec<_>>();
        assert_eq!(columns, vec![1, 2, 3, 4]);
        assert!(Subject::ALL.iter().all(|s| s.column_index() != DATE_COLUMN));
    }

    #[test]
    fn names_parse_with_or_without_accent() {
        assert_eq!("Gaudí".parse::<Subject>(), Ok(Subject::Gaudi));
        assert_eq!("gaudi".parse::<Subject>(), Ok(Subject::Gaudi));
        assert_eq!(" CLEOPATRA ".parse::<Subject>(), Ok(Subject::Cleopatra));
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "Unknown".parse::<Subject>().expect_err("unknown cat");
        assert_eq!(err, LedgerError::InvalidSubject("Unknown".to_string()));
    }
}
