use crate::cell::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named worksheet: one header row plus data rows aligned to it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Spreadsheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

/// A row to append, as ordered `(column, value)` pairs.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Row {
    pub cells: Vec<(String, CellValue)>,
}

impl Row {
    pub fn new() -> Self {
        Row { cells: Vec::new() }
    }

    pub fn with(mut self, header: &str, value: impl Into<CellValue>) -> Self {
        self.cells.push((header.to_string(), value.into()));
        self
    }

    pub fn get(&self, header: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v)
    }
}

/// Read-only view of one data row.
#[derive(Clone, Copy, Debug)]
pub struct Record<'a> {
    sheet: &'a Spreadsheet,
    row: &'a [CellValue],
}

static EMPTY: CellValue = CellValue::Empty;

impl<'a> Record<'a> {
    pub fn get(&self, header: &str) -> &'a CellValue {
        self.sheet
            .column_index(header)
            .and_then(|idx| self.row.get(idx))
            .unwrap_or(&EMPTY)
    }

    pub fn text(&self, header: &str) -> String {
        self.get(header).as_text().trim().to_string()
    }
}

impl Spreadsheet {
    pub fn spreadsheet_create(name: &str, headers: &[&str]) -> Self {
        Spreadsheet {
            name: name.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == header)
    }

    pub fn has_column(&self, header: &str) -> bool {
        self.column_index(header).is_some()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(move |row| Record {
            sheet: self,
            row: row.as_slice(),
        })
    }

    /// Drop rows whose `key` cell is blank (or rows of a sheet without that column).
    pub fn drop_blank(mut self, key: &str) -> Self {
        match self.column_index(key) {
            Some(idx) => {
                self.rows
                    .retain(|row| row.get(idx).map(|c| !c.is_blank()).unwrap_or(false));
            }
            None => self.rows.clear(),
        }
        self
    }

    /// Merge the row's columns into the header, returning true if new columns were added.
    pub fn extend_headers(&mut self, row: &Row) -> bool {
        let mut added = false;
        for (header, _) in &row.cells {
            if self.column_index(header).is_none() {
                self.headers.push(header.clone());
                added = true;
            }
        }
        if added {
            let width = self.headers.len();
            for existing in self.rows.iter_mut() {
                existing.resize(width, CellValue::Empty);
            }
        }
        added
    }

    /// Lay the row out in this sheet's header order. Unknown columns are ignored.
    pub fn align(&self, row: &Row) -> Vec<CellValue> {
        let mut aligned = vec![CellValue::Empty; self.headers.len()];
        for (header, value) in &row.cells {
            if let Some(idx) = self.column_index(header) {
                aligned[idx] = value.clone();
            }
        }
        aligned
    }

    pub fn append_row(&mut self, row: Row) {
        self.extend_headers(&row);
        let aligned = self.align(&row);
        self.rows.push(aligned);
    }

    pub fn col_to_letter(col: usize) -> String {
        let mut col = col;
        let mut result = String::new();
        while col > 0 {
            col -= 1;
            result.push(((col % 26) as u8 + b'A') as char);
            col /= 26;
        }
        result.chars().rev().collect()
    }

    pub fn letter_to_col(letters: &str) -> usize {
        letters
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .fold(0, |acc, c| {
                acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1)
            })
    }
}

/// All worksheets of one spreadsheet document, keyed by sheet name.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Workbook {
    pub sheets: BTreeMap<String, Spreadsheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Workbook {
            sheets: BTreeMap::new(),
        }
    }

    pub fn sheet(&self, name: &str) -> Option<&Spreadsheet> {
        self.sheets.get(name)
    }

    pub fn insert(&mut self, sheet: Spreadsheet) {
        self.sheets.insert(sheet.name.clone(), sheet);
    }

    pub fn append(&mut self, name: &str, row: Row) {
        self.sheets
            .entry(name.to_string())
            .or_insert_with(|| Spreadsheet::spreadsheet_create(name, &[]))
            .append_row(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projects() -> Spreadsheet {
        let mut sheet = Spreadsheet::spreadsheet_create("Projectes", &["Nom", "Equip"]);
        sheet.rows.push(vec![CellValue::text("Casa Puig"), CellValue::text("Equip A")]);
        sheet.rows.push(vec![CellValue::Empty, CellValue::text("Equip B")]);
        sheet.rows.push(vec![CellValue::text("Hotel Mar"), CellValue::Empty]);
        sheet
    }

    #[test]
    fn test_records_read_by_header() {
        let sheet = projects();
        let names: Vec<String> = sheet.records().map(|r| r.text("Nom")).collect();
        assert_eq!(names, vec!["Casa Puig", "", "Hotel Mar"]);
        assert_eq!(sheet.records().next().unwrap().get("Missing"), &CellValue::Empty);
    }

    #[test]
    fn test_drop_blank_removes_rows_without_key() {
        let sheet = projects().drop_blank("Nom");
        assert_eq!(sheet.len(), 2);

        let none = projects().drop_blank("Tipus");
        assert!(none.is_empty());
    }

    #[test]
    fn test_append_row_adds_new_columns() {
        let mut sheet = projects();
        sheet.append_row(
            Row::new()
                .with("Nom", "Obra nova")
                .with("Logo_client", "http://x/logo.png"),
        );

        assert_eq!(sheet.headers, vec!["Nom", "Equip", "Logo_client"]);
        assert_eq!(sheet.rows[0].len(), 3);
        assert_eq!(sheet.rows[0][2], CellValue::Empty);
        let last = sheet.rows.last().unwrap();
        assert_eq!(last[0], CellValue::text("Obra nova"));
        assert_eq!(last[1], CellValue::Empty);
    }

    #[test]
    fn test_workbook_creates_sheet_on_first_append() {
        let mut book = Workbook::new();
        book.append("Seguiment", Row::new().with("Fecha", "01/02/2025").with("Fotos", 2usize));
        let sheet = book.sheet("Seguiment").unwrap();
        assert_eq!(sheet.headers, vec!["Fecha", "Fotos"]);
        assert_eq!(sheet.rows[0][1], CellValue::Number(2.0));
    }

    #[test]
    fn test_column_letter_conversion() {
        assert_eq!(Spreadsheet::col_to_letter(1), "A");
        assert_eq!(Spreadsheet::col_to_letter(11), "K");
        assert_eq!(Spreadsheet::col_to_letter(27), "AA");
        assert_eq!(Spreadsheet::col_to_letter(703), "AAA");
        assert_eq!(Spreadsheet::letter_to_col("AB"), 28);
        assert_eq!(Spreadsheet::letter_to_col("k"), 11);
    }
}
