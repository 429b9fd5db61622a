/*!
Session log sink

Leveled logging for every engine step, built on `log` + `env_logger`:
- four levels: ERROR, INFO, DEBUG, TRACE
- optional local-time timestamps (`YYYY-MM-DD HH:MM:SS`)
- output to stdout or to an append-mode session log file
*/

use chrono::{DateTime, Local};
use env_logger::{Builder, Target, WriteStyle};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::LogError;

/// Session log file name, created in the temp directory
pub const DEFAULT_LOG_FILE_NAME: &str = "vpnc.log";

/// Verbosity threshold; numeric values match `LOG_LEVEL`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
    Trace = 3,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    /// Accepts `0`..`3` or a level name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "error" => Ok(LogLevel::Error),
            "1" | "info" => Ok(LogLevel::Info),
            "2" | "debug" => Ok(LogLevel::Debug),
            "3" | "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Stdout,
    File(PathBuf),
}

/// Log sink settings, read once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LogLevel,
    pub timestamps: bool,
    pub destination: LogDestination,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            timestamps: false,
            destination: LogDestination::Stdout,
        }
    }
}

/// `<temp dir>/vpnc.log`
pub fn default_log_file() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_LOG_FILE_NAME)
}

/// Same layout as the VPN client's `--timestamp` output
pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// One log line, without the trailing newline
pub fn format_line(timestamp: Option<&DateTime<Local>>, message: &str) -> String {
    match timestamp {
        Some(at) => format!("[{}] {}", format_timestamp(at), message),
        None => message.to_string(),
    }
}

/// Build the logger described by `settings` without installing it
pub fn builder(settings: &LogSettings) -> Result<Builder, LogError> {
    let mut builder = Builder::new();
    builder
        .filter_level(settings.level.into())
        .write_style(WriteStyle::Never);

    let timestamps = settings.timestamps;
    builder.format(move |buf, record| {
        let now = timestamps.then(Local::now);
        writeln!(buf, "{}", format_line(now.as_ref(), &record.args().to_string()))
    });

    match &settings.destination {
        LogDestination::Stdout => {
            builder.target(Target::Stdout);
        }
        LogDestination::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.target(Target::Pipe(Box::new(file)));
        }
    }

    Ok(builder)
}

/// Install the global logger for this process
pub fn init(settings: &LogSettings) -> Result<(), LogError> {
    builder(settings)?.try_init()?;
    Ok(())
}
