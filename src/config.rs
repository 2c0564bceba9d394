//! Configuration loaded from `seguiment.toml`.
//!
//! Every section has defaults, so a missing file still yields a working
//! development setup: a local workbook file and emails written to disk.

use log::info;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "seguiment.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub logo: LogoConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SheetsBackend {
    #[default]
    File,
    Csv,
    Google,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SheetsConfig {
    #[serde(default)]
    pub backend: SheetsBackend,
    /// Workbook file (`file`) or directory of CSV files (`csv`).
    #[serde(default = "default_sheets_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    /// OAuth bearer token with the spreadsheets scope.
    #[serde(default)]
    pub access_token: Option<String>,
    /// API key; only allows reads.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Sheets API endpoint, for proxies and local stand-ins.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            backend: SheetsBackend::default(),
            path: default_sheets_path(),
            spreadsheet_id: None,
            access_token: None,
            api_key: None,
            api_base: default_api_base(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_sheets_path() -> PathBuf {
    PathBuf::from("database/seguiment.bin.gz")
}

fn default_api_base() -> String {
    "https://sheets.googleapis.com/v4/spreadsheets".to_string()
}

fn default_cache_ttl() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_server")]
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from")]
    pub from: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: default_smtp_server(),
            port: default_smtp_port(),
            user: String::new(),
            password: String::new(),
            from: default_from(),
        }
    }
}

fn default_smtp_server() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from() -> String {
    "Estellé Parquet <noreply@estelleparquet.com>".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MailTransport {
    Smtp,
    #[default]
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub transport: MailTransport,
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            transport: MailTransport::default(),
            outbox_dir: default_outbox_dir(),
        }
    }
}

fn default_outbox_dir() -> PathBuf {
    PathBuf::from("outbox")
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogoConfig {
    #[serde(default = "default_logo_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_logo_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for LogoConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_logo_timeout(),
            cache_ttl_secs: default_logo_ttl(),
        }
    }
}

fn default_logo_timeout() -> u64 {
    10
}

fn default_logo_ttl() -> u64 {
    3600
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            Self::parse(&content)?
        } else {
            info!("No config file found at {}, using defaults", path.display());
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    // Secrets are usually injected by the environment rather than committed
    fn apply_env(&mut self) {
        if let Ok(password) = std::env::var("SEGUIMENT_SMTP_PASSWORD") {
            self.smtp.password = password;
        }
        if let Ok(token) = std::env::var("SEGUIMENT_SHEETS_TOKEN") {
            self.sheets.access_token = Some(token);
        }
    }
}
