//! Logging configuration and initialization
//!
//! The crate only emits `tracing` events; installing a subscriber is left to
//! the embedding application. These helpers install a `tracing-subscriber`
//! registry for binaries, benches and tests that want one.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., "warn,quantforge=debug")
//! - `QUANTFORGE_LOG_LEVEL`: Simple log level (error, warn, info, debug, trace)
//! - `QUANTFORGE_LOG_FORMAT`: Console format ("human" or "json")
//! - `QUANTFORGE_LOG_FILE`: Optional file path, always written as JSON

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Set once a subscriber has been installed
static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

const LOG_LEVEL_ENV: &str = "QUANTFORGE_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "QUANTFORGE_LOG_FORMAT";
const LOG_FILE_ENV: &str = "QUANTFORGE_LOG_FILE";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),

    #[error("failed to open log file {path}: {reason}")]
    FileOpenFailed { path: String, reason: String },

    /// Another global subscriber was installed first
    #[error("tracing subscriber already set: {0}")]
    AlreadySet(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(LoggingError::InvalidLogLevel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            other => Err(LoggingError::InvalidLogFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include file/line in console output
    pub with_file_info: bool,
    /// Emit span close events with timings
    pub with_span_events: bool,
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self, with_file_info: bool) -> Self {
        self.with_file_info = with_file_info;
        self
    }

    pub fn with_span_events(mut self, with_span_events: bool) -> Self {
        self.with_span_events = with_span_events;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Build a config from the `QUANTFORGE_LOG_*` variables.
    /// Unrecognised values fall back to the defaults.
    pub fn from_env() -> Self {
        let mut config = LoggingConfig::new();
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            match level.parse() {
                Ok(level) => config.level = level,
                Err(e) => eprintln!("quantforge: {}, using {:?}", e, config.level),
            }
        }
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            match format.parse() {
                Ok(format) => config.format = format,
                Err(e) => eprintln!("quantforge: {}, using {:?}", e, config.format),
            }
        }
        if let Ok(path) = std::env::var(LOG_FILE_ENV) {
            config.log_file = Some(PathBuf::from(path));
        }
        config
    }
}

/// Initialize logging from the environment, ignoring failures.
///
/// Idempotent: only the first call in a process does anything.
pub fn init_logging_default() {
    let _ = init_logging_from_env();
}

/// Initialize logging from `RUST_LOG` and the `QUANTFORGE_LOG_*` variables.
///
/// Idempotent: only the first call in a process does anything.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    init_with_config(&LoggingConfig::from_env())
}

/// Initialize logging with an explicit configuration.
///
/// Once a subscriber is installed, later calls return `Ok(())` without
/// touching it. A failed attempt leaves logging uninitialized so it can be
/// retried.
pub fn init_with_config(config: &LoggingConfig) -> Result<(), LoggingError> {
    init_once(&TRACING_INITIALIZED, config)
}

fn init_once(cell: &OnceCell<()>, config: &LoggingConfig) -> Result<(), LoggingError> {
    cell.get_or_try_init(|| install(config))?;
    Ok(())
}

pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}

fn span_events(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LoggingError> {
    let open_failed = |e: std::io::Error| LoggingError::FileOpenFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(open_failed)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(open_failed)
}

fn install(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_env_filter(config.level)?;

    let (human, json) = match config.format {
        LogFormat::Human => (
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_file(config.with_file_info)
                    .with_line_number(config.with_file_info)
                    .with_span_events(span_events(config.with_span_events)),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_file(config.with_file_info)
                    .with_line_number(config.with_file_info)
                    .with_span_events(span_events(config.with_span_events)),
            ),
        ),
    };

    let file_layer = match &config.log_file {
        Some(path) => Some(
            fmt::layer()
                .json()
                .with_writer(Mutex::new(open_log_file(path)?))
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(span_events(config.with_span_events)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(human)
        .with(json)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadySet(e.to_string()))
}

/// `RUST_LOG` wins over the configured level
fn build_env_filter(level: LogLevel) -> Result<EnvFilter, LoggingError> {
    match std::env::var("RUST_LOG") {
        Ok(directives) => {
            EnvFilter::try_new(directives).map_err(|e| LoggingError::InvalidLogLevel(e.to_string()))
        }
        Err(_) => Ok(EnvFilter::new(level.as_filter_str())),
    }
}
