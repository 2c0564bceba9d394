use serde::{Deserialize, Serialize};
use std::fmt;

/// A single spreadsheet cell.
///
/// Spreadsheet services hand back loosely typed values: numbers, text, or
/// nothing at all. Everything the application reads goes through this type so
/// that the rest of the code never has to care where a value came from.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Read a cell typed into a CSV file
    ///
    /// Only text that prints back unchanged becomes a number, so `007`, `1.10`
    /// or `12.50` stay text and survive a save.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CellValue::Empty;
        }

        match trimmed.parse::<f64>() {
            Ok(num) if num.is_finite() && format_number(num) == trimmed => CellValue::Number(num),
            _ => CellValue::Text(raw.to_string()),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value)
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Number(_) => false,
            CellValue::Text(s) => s.trim().is_empty(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().parse().ok(),
            CellValue::Empty => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<usize> for CellValue {
    fn from(value: usize) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::text(value)
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::text(value)
    }
}

// Whole numbers print without a fractional part (1234.0 -> "1234")
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers_and_text() {
        assert_eq!(CellValue::parse("  "), CellValue::Empty);
        assert_eq!(CellValue::parse("12.5"), CellValue::Number(12.5));
        assert_eq!(CellValue::parse(" 7 "), CellValue::Number(7.0));
        assert_eq!(
            CellValue::parse("Parquet roble"),
            CellValue::Text("Parquet roble".to_string())
        );
        assert_eq!(CellValue::parse("NaN"), CellValue::Text("NaN".to_string()));
    }

    #[test]
    fn test_parse_keeps_text_that_would_not_print_back() {
        for raw in ["007", "1.10", "12.50", "1234.0", "1e3", "+4"] {
            assert_eq!(CellValue::parse(raw), CellValue::Text(raw.to_string()));
            assert_eq!(CellValue::parse(raw).as_text(), raw);
        }
        assert_eq!(CellValue::parse("-3"), CellValue::Number(-3.0));
        assert_eq!(CellValue::parse("0.5"), CellValue::Number(0.5));
    }

    #[test]
    fn test_whole_numbers_lose_decimals() {
        assert_eq!(CellValue::Number(1234.0).as_text(), "1234");
        assert_eq!(CellValue::Number(2.5).as_text(), "2.5");
        assert_eq!(CellValue::Empty.as_text(), "");
    }

    #[test]
    fn test_blank_detection() {
        assert!(CellValue::Empty.is_blank());
        assert!(CellValue::Text("   ".to_string()).is_blank());
        assert!(!CellValue::Number(0.0).is_blank());
        assert!(!CellValue::text("x").is_blank());
        assert_eq!(CellValue::text(""), CellValue::Empty);
    }

    #[test]
    fn test_as_number_reads_numeric_text() {
        assert_eq!(CellValue::Text(" 3 ".to_string()).as_number(), Some(3.0));
        assert_eq!(CellValue::Text("abc".to_string()).as_number(), None);
        assert_eq!(CellValue::Empty.as_number(), None);
    }
}
