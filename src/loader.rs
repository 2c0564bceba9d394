use crate::cell::CellValue;
use crate::spreadsheet::Spreadsheet;
use std::error::Error;
use std::fs;
use std::path::Path;

/// Load a worksheet from a CSV file
///
/// The sheet takes its name from the file stem, so `Projectes.csv` becomes the
/// `Projectes` worksheet. The first line is the header row.
///
/// # Arguments
/// * `filepath` - Path to the CSV file to load
///
/// # Returns
/// * `Result<Spreadsheet, Box<dyn Error>>` - The loaded worksheet or an error
///
/// # Examples
/// ```no_run
/// use seguiment::loader::from_csv;
///
/// match from_csv("data/Projectes.csv") {
///     Ok(sheet) => println!("Loaded {} projects", sheet.len()),
///     Err(e) => eprintln!("Error loading CSV: {}", e),
/// }
/// ```
pub fn from_csv(filepath: impl AsRef<Path>) -> Result<Spreadsheet, Box<dyn Error>> {
    let path = filepath.as_ref();
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or("CSV file has no usable name")?;
    let text = fs::read_to_string(path)?;

    parse_csv(name, &text)
}

/// Parse CSV text into a worksheet named `name`
///
/// Quoted fields may contain commas, doubled quotes and line breaks. Rows
/// shorter than the header are padded with empty cells; extra cells are kept
/// under generated column names so nothing typed into the sheet is lost.
///
/// # Errors
/// * Returns an error if the text has no header row
pub fn parse_csv(name: &str, text: &str) -> Result<Spreadsheet, Box<dyn Error>> {
    let mut records = split_records(text).into_iter();

    let headers = match records.next() {
        Some(header) if header.iter().any(|h| !h.trim().is_empty()) => header,
        _ => return Err("CSV file is empty".into()),
    };

    let mut sheet = Spreadsheet {
        name: name.to_string(),
        headers: headers.iter().map(|h| h.trim().to_string()).collect(),
        rows: Vec::new(),
    };

    for fields in records {
        if fields.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        while sheet.headers.len() < fields.len() {
            let generated = Spreadsheet::col_to_letter(sheet.headers.len() + 1);
            sheet.headers.push(generated);
            let width = sheet.headers.len();
            for existing in sheet.rows.iter_mut() {
                existing.resize(width, CellValue::Empty);
            }
        }

        let mut row: Vec<CellValue> = fields.iter().map(|f| CellValue::parse(f)).collect();
        row.resize(sheet.headers.len(), CellValue::Empty);
        sheet.rows.push(row);
    }

    Ok(sheet)
}

/// Split CSV text into its header fields and the untouched text after the header line
///
/// Appending to a CSV file only needs the header; the data rows are passed
/// through as written.
pub fn split_header(text: &str) -> (Vec<String>, &str) {
    let mut in_quotes = false;
    let mut end = text.len();
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\n' if !in_quotes => {
                end = i + 1;
                break;
            }
            _ => {}
        }
    }

    let headers = split_records(&text[..end])
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();
    (headers, &text[end..])
}

// Split CSV text into records of fields, honouring quotes across line breaks
fn split_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    // Double quote inside quoted field - add a single quote
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current_field));
            }
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                fields.push(std::mem::take(&mut current_field));
                records.push(std::mem::take(&mut fields));
            }
            _ => current_field.push(c),
        }
    }

    if !current_field.is_empty() || !fields.is_empty() {
        fields.push(current_field);
        records.push(fields);
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quoted_fields() {
        let text = "Nom,Emails_Contacte,Logo_client\n\
                    Casa Puig,\"a@x.com, b@x.com\",\n\
                    \"Hotel \"\"Mar\"\"\",c@x.com,http://logo\n";
        let sheet = parse_csv("Projectes", text).unwrap();

        assert_eq!(sheet.name, "Projectes");
        assert_eq!(sheet.headers, vec!["Nom", "Emails_Contacte", "Logo_client"]);
        assert_eq!(sheet.len(), 2);
        assert_eq!(sheet.rows[0][1], CellValue::text("a@x.com, b@x.com"));
        assert_eq!(sheet.rows[0][2], CellValue::Empty);
        assert_eq!(sheet.rows[1][0], CellValue::text("Hotel \"Mar\""));
    }

    #[test]
    fn test_parse_numbers_and_multiline_text() {
        let text = "Equip,PIN,Nota\r\nEquip A,1234,\"linia 1\nlinia 2\"\r\n";
        let sheet = parse_csv("Equips", text).unwrap();

        assert_eq!(sheet.rows[0][1], CellValue::Number(1234.0));
        assert_eq!(sheet.rows[0][2], CellValue::text("linia 1\nlinia 2"));
    }

    #[test]
    fn test_short_and_long_rows() {
        let text = "Tipus,Camp1\nPulido\nVinilo,m2,extra\n";
        let sheet = parse_csv("Config_Templates", text).unwrap();

        assert_eq!(sheet.headers, vec!["Tipus", "Camp1", "C"]);
        assert_eq!(sheet.rows[0], vec![CellValue::text("Pulido"), CellValue::Empty, CellValue::Empty]);
        assert_eq!(sheet.rows[1][2], CellValue::text("extra"));
    }

    #[test]
    fn test_split_header_leaves_rows_untouched() {
        let text = "Nom,\"Equip\"\r\n007,Equip A\n1.10,\n";
        let (headers, rest) = split_header(text);
        assert_eq!(headers, vec!["Nom", "Equip"]);
        assert_eq!(rest, "007,Equip A\n1.10,\n");

        let (headers, rest) = split_header("Nom,Equip");
        assert_eq!(headers, vec!["Nom", "Equip"]);
        assert_eq!(rest, "");
    }

    #[test]
    fn test_empty_text_is_an_error() {
        assert!(parse_csv("Empty", "").is_err());
        assert!(parse_csv("Empty", ",,\n").is_err());
    }
}
