use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::dispatch::archive::ArchiveFormat;

/// Upload ceiling, 100 MiB.
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_RETENTION_SECS: u64 = 60 * 60;
const DEFAULT_SWEEP_SECS: u64 = 60;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_EXTRACTED_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
#[error("{name}: invalid value '{value}': {reason}")]
pub struct ConfigError {
    name: &'static str,
    value: String,
    reason: String,
}

/// Gateway settings, read once before serving.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_upload_bytes: u64,
    /// How long an unclaimed artifact may stay in the converted area
    pub retention: Duration,
    pub sweep_interval: Duration,
    /// Bound on every external tool invocation
    pub tool_timeout: Duration,
    pub ffmpeg: PathBuf,
    pub soffice: PathBuf,
    pub archive_targets: Vec<ArchiveFormat>,
    pub max_extracted_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            max_upload_bytes: MAX_UPLOAD_BYTES,
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_SECS),
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            ffmpeg: PathBuf::from("ffmpeg"),
            soffice: PathBuf::from("soffice"),
            archive_targets: vec![ArchiveFormat::Zip],
            max_extracted_bytes: DEFAULT_MAX_EXTRACTED_BYTES,
        }
    }
}

impl Config {
    /// Reads `CONVGATE_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(port) = parsed(&lookup, "CONVGATE_PORT")? {
            config.port = port;
        }
        if let Some(dir) = lookup("CONVGATE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parsed(&lookup, "CONVGATE_RETENTION_SECS")? {
            config.retention = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed::<u64, _>(&lookup, "CONVGATE_SWEEP_SECS")? {
            if secs == 0 {
                return Err(ConfigError {
                    name: "CONVGATE_SWEEP_SECS",
                    value: secs.to_string(),
                    reason: "must be positive".to_owned(),
                });
            }
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed::<u64, _>(&lookup, "CONVGATE_TOOL_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(ConfigError {
                    name: "CONVGATE_TOOL_TIMEOUT_SECS",
                    value: secs.to_string(),
                    reason: "must be positive".to_owned(),
                });
            }
            config.tool_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = lookup("CONVGATE_FFMPEG") {
            config.ffmpeg = PathBuf::from(path);
        }
        if let Some(path) = lookup("CONVGATE_SOFFICE") {
            config.soffice = PathBuf::from(path);
        }
        if let Some(list) = lookup("CONVGATE_ARCHIVE_TARGETS") {
            config.archive_targets =
                ArchiveFormat::parse_list(&list).map_err(|reason| ConfigError {
                    name: "CONVGATE_ARCHIVE_TARGETS",
                    value: list.clone(),
                    reason,
                })?;
        }
        if let Some(bytes) = parsed(&lookup, "CONVGATE_MAX_EXTRACTED_BYTES")? {
            config.max_extracted_bytes = bytes;
        }

        Ok(config)
    }
}

fn parsed<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigError {
                name,
                reason: e.to_string(),
                value,
            }),
        },
    }
}
