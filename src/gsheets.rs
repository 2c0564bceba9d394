#![cfg(feature = "web")]
//! Google Sheets v4 backend for [`SheetStore`].
//!
//! Reads use `values.get` with unformatted values so numbers stay numbers.
//! Appends first make sure the header row covers every column of the new
//! row, then call `values.append` with `USER_ENTERED` input.

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use crate::cell::CellValue;
use crate::config::SheetsConfig;
use crate::spreadsheet::{Row, Spreadsheet};
use crate::store::{SheetStore, StoreError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

enum Auth {
    Bearer(String),
    ApiKey(String),
}

pub struct GoogleSheetsStore {
    client: reqwest::Client,
    api_base: String,
    spreadsheet_id: String,
    auth: Auth,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

impl GoogleSheetsStore {
    pub fn from_config(config: &SheetsConfig) -> Result<Self, StoreError> {
        let spreadsheet_id = config
            .spreadsheet_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StoreError::Config("sheets.spreadsheet_id is not set".to_string()))?;

        let auth = match (&config.access_token, &config.api_key) {
            (Some(token), _) if !token.trim().is_empty() => {
                Auth::Bearer(token.trim().to_string())
            }
            (_, Some(key)) if !key.trim().is_empty() => {
                Auth::ApiKey(key.trim().to_string())
            }
            _ => {
                return Err(StoreError::Config(
                    "set sheets.access_token or sheets.api_key".to_string(),
                ));
            }
        };

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Http(e.to_string()))?;

        Ok(GoogleSheetsStore {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            auth,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}{}", self.api_base, self.spreadsheet_id, path);
        let builder = self.client.request(method, url);
        match &self.auth {
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::ApiKey(key) => builder.query(&[("key", key)]),
        }
    }

    fn require_write_access(&self) -> Result<(), StoreError> {
        match self.auth {
            Auth::Bearer(_) => Ok(()),
            Auth::ApiKey(_) => Err(StoreError::Config(
                "writing to Google Sheets needs sheets.access_token".to_string(),
            )),
        }
    }

    async fn get_values(&self, sheet: &str, range: &str) -> Result<Vec<Vec<Value>>, StoreError> {
        let path = format!("/values/{}", urlencoding::encode(&a1_range(sheet, range)));
        let response = self
            .request(Method::GET, &path)
            .query(&[("valueRenderOption", "UNFORMATTED_VALUE")])
            .send()
            .await
            .map_err(http_error)?;
        let response = check(sheet, response).await?;
        let body: ValueRange = response.json().await.map_err(http_error)?;
        Ok(body.values)
    }

    async fn add_sheet(&self, sheet: &str) -> Result<(), StoreError> {
        let body = json!({ "requests": [{ "addSheet": { "properties": { "title": sheet } } }] });
        let response = self
            .request(Method::POST, ":batchUpdate")
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        check(sheet, response).await?;
        info!("created worksheet '{}'", sheet);
        Ok(())
    }

    async fn write_headers(&self, sheet: &str, headers: &[String]) -> Result<(), StoreError> {
        let path = format!("/values/{}", urlencoding::encode(&a1_range(sheet, "1:1")));
        let response = self
            .request(Method::PUT, &path)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "values": [headers] }))
            .send()
            .await
            .map_err(http_error)?;
        check(sheet, response).await?;
        debug!("header row of '{}' is now {:?}", sheet, headers);
        Ok(())
    }
}

#[async_trait]
impl SheetStore for GoogleSheetsStore {
    async fn read(&self, sheet: &str) -> Result<Spreadsheet, StoreError> {
        let values = self.get_values(sheet, "A:ZZ").await?;
        Ok(sheet_from_values(sheet, values))
    }

    async fn append(&self, sheet: &str, row: Row) -> Result<(), StoreError> {
        self.require_write_access()?;

        let header_row = match self.get_values(sheet, "1:1").await {
            Ok(values) => values.into_iter().next().unwrap_or_default(),
            Err(StoreError::MissingSheet(_)) => {
                self.add_sheet(sheet).await?;
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut layout = Spreadsheet::spreadsheet_create(sheet, &[]);
        layout.headers = header_row.iter().map(|v| value_to_cell(v).as_text()).collect();
        if layout.extend_headers(&row) {
            self.write_headers(sheet, &layout.headers).await?;
        }

        let values: Vec<Value> = layout.align(&row).iter().map(cell_to_value).collect();
        let path = format!("/values/{}:append", urlencoding::encode(&a1_range(sheet, "A1")));
        let response = self
            .request(Method::POST, &path)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": [values] }))
            .send()
            .await
            .map_err(http_error)?;
        check(sheet, response).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("Google spreadsheet {}", self.spreadsheet_id)
    }
}

fn http_error(e: reqwest::Error) -> StoreError {
    StoreError::Http(e.to_string())
}

// Non-2xx answers become typed errors; an unknown tab is reported as a missing sheet
async fn check(sheet: &str, response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);

    if status == StatusCode::BAD_REQUEST && message.contains("Unable to parse range") {
        return Err(StoreError::MissingSheet(sheet.to_string()));
    }
    Err(StoreError::Api {
        status: status.as_u16(),
        message,
    })
}

/// `'Sheet name'!range`, quoting the name the way A1 notation expects.
pub fn a1_range(sheet: &str, range: &str) -> String {
    format!("'{}'!{}", sheet.replace('\'', "''"), range)
}

pub fn value_to_cell(value: &Value) -> CellValue {
    match value {
        Value::Null => CellValue::Empty,
        Value::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or_default(),
        Value::String(s) => CellValue::text(s.as_str()),
        Value::Bool(b) => CellValue::text(if *b { "TRUE" } else { "FALSE" }),
        other => CellValue::text(other.to_string()),
    }
}

pub fn cell_to_value(cell: &CellValue) -> Value {
    match cell {
        CellValue::Empty => Value::String(String::new()),
        CellValue::Number(n) => json!(n),
        CellValue::Text(s) => Value::String(s.clone()),
    }
}

/// Build a sheet from a `values` grid whose first row is the header.
///
/// The API trims trailing empty cells, so rows come back ragged. Rows are
/// padded to the header width; cells past the last header get a column
/// letter as their name.
pub fn sheet_from_values(name: &str, values: Vec<Vec<Value>>) -> Spreadsheet {
    let mut grid = values.into_iter();
    let mut headers: Vec<String> = grid
        .next()
        .unwrap_or_default()
        .iter()
        .map(|v| value_to_cell(v).as_text().trim().to_string())
        .collect();

    let rows: Vec<Vec<CellValue>> = grid
        .map(|row| row.iter().map(value_to_cell).collect())
        .collect();

    let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(headers.len());
    while headers.len() < width {
        headers.push(Spreadsheet::col_to_letter(headers.len() + 1));
    }

    let mut sheet = Spreadsheet::spreadsheet_create(name, &[]);
    sheet.headers = headers;
    sheet.rows = rows
        .into_iter()
        .map(|mut row| {
            row.resize(width, CellValue::Empty);
            row
        })
        .collect();
    sheet
}
