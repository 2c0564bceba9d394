//! Spreadsheet-service client.
//!
//! Everything the application persists goes through [`SheetStore`]: read a
//! whole worksheet, or append one row to it. There is no locking across
//! processes and no transaction; the last writer wins.

use async_trait::async_trait;
use log::{debug, info};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::{SheetsBackend, SheetsConfig};
use crate::downloader::{csv_header, csv_row};
use crate::loader::{parse_csv, split_header};
use crate::saving::{load_workbook, save_workbook};
use crate::spreadsheet::{Row, Spreadsheet, Workbook};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("worksheet '{0}' not found")]
    MissingSheet(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed worksheet '{sheet}': {message}")]
    Malformed { sheet: String, message: String },
    #[error("request failed: {0}")]
    Http(String),
    #[error("spreadsheet service returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("store misconfigured: {0}")]
    Config(String),
}

#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Read the whole worksheet, header row included.
    async fn read(&self, sheet: &str) -> Result<Spreadsheet, StoreError>;

    /// Append one row, creating the sheet or new columns as needed.
    async fn append(&self, sheet: &str, row: Row) -> Result<(), StoreError>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// A workbook kept in a single gzip-compressed file.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Workbook, StoreError> {
        if !self.path.exists() {
            return Ok(Workbook::new());
        }
        Ok(load_workbook(&self.path)?)
    }

    /// Replace a whole worksheet. Used when importing configuration sheets.
    pub fn put_sheet(&self, sheet: Spreadsheet) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut book = self.load()?;
        book.insert(sheet);
        save_workbook(&book, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl SheetStore for FileStore {
    async fn read(&self, sheet: &str) -> Result<Spreadsheet, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let book = self.load()?;
        book.sheet(sheet)
            .cloned()
            .ok_or_else(|| StoreError::MissingSheet(sheet.to_string()))
    }

    async fn append(&self, sheet: &str, row: Row) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut book = self.load()?;
        book.append(sheet, row);
        save_workbook(&book, &self.path)?;
        debug!("appended row to '{}' in {}", sheet, self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("workbook file {}", self.path.display())
    }
}

/// One `<Sheet>.csv` file per worksheet in a directory.
pub struct CsvDirStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl CsvDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvDirStore {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn sheet_path(&self, sheet: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", sheet))
    }

    fn load(&self, sheet: &str) -> Result<Option<Spreadsheet>, StoreError> {
        let path = self.sheet_path(sheet);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        parse_csv(sheet, &text)
            .map(Some)
            .map_err(|e| StoreError::Malformed {
                sheet: sheet.to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl SheetStore for CsvDirStore {
    async fn read(&self, sheet: &str) -> Result<Spreadsheet, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.load(sheet)?
            .ok_or_else(|| StoreError::MissingSheet(sheet.to_string()))
    }

    /// Add one line at the end of `<sheet>.csv`
    ///
    /// Rows already in the file are never parsed and written back. Only when
    /// the row brings new columns is the header line replaced, and the rest of
    /// the file is copied through as is.
    async fn append(&self, sheet: &str, row: Row) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.sheet_path(sheet);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let (headers, body) = split_header(&text);
        let mut layout = Spreadsheet::spreadsheet_create(sheet, &[]);
        layout.headers = headers;
        let new_columns = layout.extend_headers(&row);
        let line = csv_row(&layout.align(&row));

        if new_columns {
            let mut rewritten = csv_header(&layout.headers);
            rewritten.push_str(body);
            if !body.is_empty() && !body.ends_with('\n') {
                rewritten.push('\n');
            }
            rewritten.push_str(&line);
            fs::create_dir_all(&self.dir)?;
            fs::write(&path, rewritten)?;
            debug!("columns of '{}' are now {:?}", sheet, layout.headers);
        } else {
            let mut file = OpenOptions::new().append(true).open(&path)?;
            if !text.ends_with('\n') {
                file.write_all(b"\n")?;
            }
            file.write_all(line.as_bytes())?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("CSV directory {}", self.dir.display())
    }
}

/// Read-through cache for sheets that change rarely (projects, templates, teams).
pub struct ReadCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, Spreadsheet)>>,
}

impl ReadCache {
    pub fn new(ttl: Duration) -> Self {
        ReadCache {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn read(&self, store: &dyn SheetStore, sheet: &str) -> Result<Spreadsheet, StoreError> {
        if let Some(hit) = self.fresh(sheet) {
            return Ok(hit);
        }

        let loaded = store.read(sheet).await?;
        if !self.ttl.is_zero() {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.insert(sheet.to_string(), (Instant::now(), loaded.clone()));
        }
        Ok(loaded)
    }

    fn fresh(&self, sheet: &str) -> Option<Spreadsheet> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(sheet)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, sheet)| sheet.clone())
    }

    pub fn invalidate(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Build the store selected in the `[sheets]` configuration section.
pub fn open_store(config: &SheetsConfig) -> Result<Arc<dyn SheetStore>, StoreError> {
    let store: Arc<dyn SheetStore> = match config.backend {
        SheetsBackend::File => Arc::new(FileStore::new(&config.path)),
        SheetsBackend::Csv => Arc::new(CsvDirStore::new(&config.path)),
        #[cfg(feature = "web")]
        SheetsBackend::Google => Arc::new(crate::gsheets::GoogleSheetsStore::from_config(config)?),
        #[cfg(not(feature = "web"))]
        SheetsBackend::Google => {
            return Err(StoreError::Config(
                "Google Sheets support requires the 'web' feature".to_string(),
            ));
        }
    };
    info!("using {}", store.describe());
    Ok(store)
}
