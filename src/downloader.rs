use crate::cell::CellValue;
use crate::spreadsheet::Spreadsheet;

/// Convert a worksheet to CSV format
///
/// Writes the header row followed by every data row. Fields containing commas,
/// quotes or line breaks are quoted with inner quotes doubled, so the output
/// reads back through [`crate::loader::parse_csv`] unchanged.
///
/// # Arguments
/// * `sheet` - Reference to the worksheet to convert
///
/// # Returns
/// * `String` - CSV content
///
/// # Examples
/// ```
/// use seguiment::spreadsheet::{Row, Spreadsheet};
/// use seguiment::downloader::to_csv;
///
/// let mut sheet = Spreadsheet::spreadsheet_create("Seguiment", &["Proyecto", "Dato1"]);
/// sheet.append_row(Row::new().with("Proyecto", "Casa Puig").with("Dato1", 12.5));
/// assert_eq!(to_csv(&sheet), "Proyecto,Dato1\nCasa Puig,12.5\n");
/// ```
pub fn to_csv(sheet: &Spreadsheet) -> String {
    let mut csv_content = String::new();

    csv_content.push_str(&csv_header(&sheet.headers));
    for row in &sheet.rows {
        csv_content.push_str(&csv_row(row));
    }

    csv_content
}

/// One data row as a CSV line, newline included.
pub fn csv_row(cells: &[CellValue]) -> String {
    let texts: Vec<String> = cells.iter().map(CellValue::as_text).collect();
    let mut line = String::new();
    push_line(&mut line, texts.iter().map(|t| t.as_str()));
    line
}

/// A header row as a CSV line, newline included.
pub fn csv_header(headers: &[String]) -> String {
    let mut line = String::new();
    push_line(&mut line, headers.iter().map(|h| h.as_str()));
    line
}

fn push_line<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (i, value) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if value.contains(',') || value.contains('"') || value.contains('\n') {
            let escaped = value.replace('"', "\"\"");
            out.push_str(&format!("\"{}\"", escaped));
        } else {
            out.push_str(value);
        }
    }
    out.push('\n');
}

/// Convert a worksheet to XLSX format
///
/// Produces a workbook with a single worksheet named after the sheet. Numeric
/// cells are written as numbers so totals can be computed in Excel.
///
/// # Arguments
/// * `sheet` - Reference to the worksheet to convert
///
/// # Returns
/// * `Result<Vec<u8>, Box<dyn Error>>` - XLSX file content as bytes or an error
#[cfg(feature = "web")]
pub fn to_xlsx(sheet: &Spreadsheet) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(&sheet.name)?;

    for (c, header) in sheet.headers.iter().enumerate() {
        worksheet.write_string(0, c as u16, header.as_str())?;
    }

    for (r, row) in sheet.rows.iter().enumerate() {
        let xr = (r + 1) as u32;
        for (c, cell) in row.iter().enumerate() {
            match cell {
                CellValue::Number(n) => {
                    worksheet.write_number(xr, c as u16, *n)?;
                }
                CellValue::Text(s) => {
                    worksheet.write_string(xr, c as u16, s.as_str())?;
                }
                CellValue::Empty => {}
            }
        }
    }

    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}
