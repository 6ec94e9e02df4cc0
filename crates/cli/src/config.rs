#![forbid(unsafe_code)]
//! Flat typed settings bag, persisted as JSON next to the queue database.
//!
//! The file is authoritative: `db_path` is itself a key, so configuration
//! must be readable before the store can be opened. Workers read it once at
//! process start; there is no hot reload.

use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "QUEUECTL_CONFIG";
pub const DB_PATH_ENV: &str = "QUEUECTL_DB";
const DEFAULT_CONFIG_FILE: &str = "queuectl.config.json";

pub const KEYS: [&str; 8] = [
    "backoff_base",
    "backoff_max_delay",
    "db_path",
    "job_timeout",
    "log_level",
    "max_retries",
    "worker_heartbeat_interval",
    "worker_poll_interval",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(raw: &str) -> Option<LogLevel> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARNING" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Directive understood by the tracing filter.
    pub fn filter_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub max_retries: u32,
    pub backoff_base: f64,
    pub backoff_max_delay: u64,
    pub worker_poll_interval: u64,
    pub worker_heartbeat_interval: u64,
    pub job_timeout: u64,
    pub db_path: String,
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            backoff_max_delay: 3600,
            worker_poll_interval: 1,
            worker_heartbeat_interval: 5,
            job_timeout: 300,
            db_path: "queuectl.db".to_string(),
            log_level: LogLevel::Info,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    UnknownKey(String),
    InvalidValue {
        key: &'static str,
        reason: &'static str,
    },
    Io(std::io::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownKey(key) => write!(f, "unknown config key: {key}"),
            Self::InvalidValue { key, reason } => write!(f, "invalid value for {key}: {reason}"),
            Self::Io(err) => write!(f, "config io: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

fn positive_int(value: &Value, key: &'static str) -> Result<u64, ConfigError> {
    let Some(v) = value.as_u64() else {
        return Err(ConfigError::InvalidValue {
            key,
            reason: "must be an integer >= 1",
        });
    };
    if v < 1 {
        return Err(ConfigError::InvalidValue {
            key,
            reason: "must be an integer >= 1",
        });
    }
    Ok(v)
}

impl Config {
    pub fn path_from_env() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Missing or corrupt files fall back to defaults; an individually
    /// invalid value keeps that key's default. Operators fix settings with
    /// `config set`, which does validate.
    pub fn load(path: &Path) -> Config {
        let mut config = Config::default();
        let Ok(text) = std::fs::read_to_string(path) else {
            return config;
        };
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text) else {
            return config;
        };
        for (key, value) in &map {
            let _ = config.apply(key, value);
        }
        config
    }

    fn apply(&mut self, key: &str, value: &Value) -> Result<(), ConfigError> {
        match key {
            "max_retries" => {
                let v = positive_int(value, "max_retries")?;
                if v > u64::from(u32::MAX) {
                    return Err(ConfigError::InvalidValue {
                        key: "max_retries",
                        reason: "must be an integer >= 1",
                    });
                }
                self.max_retries = v as u32;
            }
            "backoff_base" => {
                let Some(v) = value.as_f64() else {
                    return Err(ConfigError::InvalidValue {
                        key: "backoff_base",
                        reason: "must be a number >= 1",
                    });
                };
                if !(v >= 1.0) || !v.is_finite() {
                    return Err(ConfigError::InvalidValue {
                        key: "backoff_base",
                        reason: "must be a number >= 1",
                    });
                }
                self.backoff_base = v;
            }
            "backoff_max_delay" => {
                self.backoff_max_delay = positive_int(value, "backoff_max_delay")?
            }
            "worker_poll_interval" => {
                self.worker_poll_interval = positive_int(value, "worker_poll_interval")?
            }
            "worker_heartbeat_interval" => {
                self.worker_heartbeat_interval = positive_int(value, "worker_heartbeat_interval")?
            }
            "job_timeout" => self.job_timeout = positive_int(value, "job_timeout")?,
            "db_path" => {
                let Some(v) = value.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                    return Err(ConfigError::InvalidValue {
                        key: "db_path",
                        reason: "must be a non-empty string",
                    });
                };
                self.db_path = v.to_string();
            }
            "log_level" => {
                let Some(level) = value.as_str().and_then(LogLevel::parse) else {
                    return Err(ConfigError::InvalidValue {
                        key: "log_level",
                        reason: "must be one of DEBUG|INFO|WARNING|ERROR",
                    });
                };
                self.log_level = level;
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let value = match key {
            "max_retries" | "backoff_max_delay" | "worker_poll_interval"
            | "worker_heartbeat_interval" | "job_timeout" => raw
                .trim()
                .parse::<u64>()
                .map(|v| json!(v))
                .unwrap_or(Value::Null),
            "backoff_base" => raw
                .trim()
                .parse::<f64>()
                .map(|v| json!(v))
                .unwrap_or(Value::Null),
            "db_path" | "log_level" => json!(raw),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        };
        self.apply(key, &value)
    }

    pub fn reset(&mut self, key: Option<&str>) -> Result<(), ConfigError> {
        let defaults = Config::default();
        let Some(key) = key else {
            *self = defaults;
            return Ok(());
        };
        match key {
            "max_retries" => self.max_retries = defaults.max_retries,
            "backoff_base" => self.backoff_base = defaults.backoff_base,
            "backoff_max_delay" => self.backoff_max_delay = defaults.backoff_max_delay,
            "worker_poll_interval" => self.worker_poll_interval = defaults.worker_poll_interval,
            "worker_heartbeat_interval" => {
                self.worker_heartbeat_interval = defaults.worker_heartbeat_interval
            }
            "job_timeout" => self.job_timeout = defaults.job_timeout,
            "db_path" => self.db_path = defaults.db_path,
            "log_level" => self.log_level = defaults.log_level,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        match key {
            "max_retries" => Ok(self.max_retries.to_string()),
            "backoff_base" => Ok(format_number(self.backoff_base)),
            "backoff_max_delay" => Ok(self.backoff_max_delay.to_string()),
            "worker_poll_interval" => Ok(self.worker_poll_interval.to_string()),
            "worker_heartbeat_interval" => Ok(self.worker_heartbeat_interval.to_string()),
            "job_timeout" => Ok(self.job_timeout.to_string()),
            "db_path" => Ok(self.db_path.clone()),
            "log_level" => Ok(self.log_level.as_str().to_string()),
            other => Err(ConfigError::UnknownKey(other.to_string())),
        }
    }

    pub fn entries(&self) -> Vec<(&'static str, String)> {
        KEYS.iter()
            .map(|key| (*key, self.get(key).unwrap_or_default()))
            .collect()
    }

    fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("max_retries".to_string(), json!(self.max_retries));
        map.insert("backoff_base".to_string(), json!(self.backoff_base));
        map.insert("backoff_max_delay".to_string(), json!(self.backoff_max_delay));
        map.insert(
            "worker_poll_interval".to_string(),
            json!(self.worker_poll_interval),
        );
        map.insert(
            "worker_heartbeat_interval".to_string(),
            json!(self.worker_heartbeat_interval),
        );
        map.insert("job_timeout".to_string(), json!(self.job_timeout));
        map.insert("db_path".to_string(), json!(self.db_path));
        map.insert("log_level".to_string(), json!(self.log_level.as_str()));
        Value::Object(map)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut text = serde_json::to_string_pretty(&self.to_json())
            .map_err(|_| ConfigError::InvalidValue {
                key: "config",
                reason: "failed to serialize",
            })?;
        text.push('\n');
        std::fs::write(path, text)?;
        Ok(())
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
