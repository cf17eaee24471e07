//! Server configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::UtcOffset;
use time::macros::format_description;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Sensor endpoint settings.
    pub sensor: SensorConfig,
    /// Collector schedule settings.
    pub collector: CollectorConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Server bind address is valid (host:port format)
    /// - Storage path is not empty
    /// - Sensor URL is http(s) and the timeout is within 1-300 seconds
    /// - Collector interval is within 1 minute - 1 day
    /// - The UTC offset, if set, parses as `±HH:MM`
    ///
    /// # Example
    ///
    /// ```
    /// use thermolog_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.sensor.validate());
        errors.extend(self.collector.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
            return errors;
        }

        let Some((_, port)) = self.bind.rsplit_once(':') else {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            });
            return errors;
        };

        match port.parse::<u16>() {
            Ok(0) => errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "port cannot be 0".to_string(),
            }),
            Err(_) => errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!("invalid port '{}': must be a number 1-65535", port),
            }),
            Ok(_) => {}
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding the year/month partitions.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: thermolog_store::default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "storage path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Minimum sensor request timeout in seconds.
pub const MIN_SENSOR_TIMEOUT: u64 = 1;
/// Maximum sensor request timeout in seconds (5 minutes).
pub const MAX_SENSOR_TIMEOUT: u64 = 300;

/// Sensor endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// URL returning `{"temperature": .., "humidity": ..}`.
    pub url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8081/".to_string(),
            timeout_secs: 10,
        }
    }
}

impl SensorConfig {
    /// Validate sensor configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            errors.push(ValidationError {
                field: "sensor.url".to_string(),
                message: format!(
                    "sensor URL '{}' must start with http:// or https://",
                    self.url
                ),
            });
        }

        if !(MIN_SENSOR_TIMEOUT..=MAX_SENSOR_TIMEOUT).contains(&self.timeout_secs) {
            errors.push(ValidationError {
                field: "sensor.timeout_secs".to_string(),
                message: format!(
                    "timeout {} is out of range ({}-{} seconds)",
                    self.timeout_secs, MIN_SENSOR_TIMEOUT, MAX_SENSOR_TIMEOUT
                ),
            });
        }

        errors
    }
}

/// Minimum collection interval in seconds (1 minute).
pub const MIN_COLLECT_INTERVAL: u64 = 60;
/// Maximum collection interval in seconds (1 day).
pub const MAX_COLLECT_INTERVAL: u64 = 86_400;

/// Collector schedule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Whether the collector runs at all.
    pub enabled: bool,
    /// Seconds between collections; ticks are aligned to multiples of this
    /// interval in local time.
    pub interval_secs: u64,
    /// Collect once immediately at startup.
    pub run_on_start: bool,
    /// Local UTC offset (`"+01:00"`). Defaults to the host offset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_offset: Option<String>,
    /// What counts as "the same hour" when deduplicating readings.
    pub dedup_scope: DedupScope,
}

/// Scope of the one-reading-per-hour rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupScope {
    /// At most one reading per hour-of-day (0-23) in the whole monthly
    /// partition.
    #[default]
    HourOfDay,
    /// At most one reading per calendar hour (date and hour).
    CalendarHour,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            run_on_start: true,
            utc_offset: None,
            dedup_scope: DedupScope::HourOfDay,
        }
    }
}

impl CollectorConfig {
    /// Validate collector configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.interval_secs < MIN_COLLECT_INTERVAL {
            errors.push(ValidationError {
                field: "collector.interval_secs".to_string(),
                message: format!(
                    "interval {} is too short (minimum {} seconds)",
                    self.interval_secs, MIN_COLLECT_INTERVAL
                ),
            });
        } else if self.interval_secs > MAX_COLLECT_INTERVAL {
            errors.push(ValidationError {
                field: "collector.interval_secs".to_string(),
                message: format!(
                    "interval {} is too long (maximum {} seconds / 1 day)",
                    self.interval_secs, MAX_COLLECT_INTERVAL
                ),
            });
        }

        if let Some(offset) = &self.utc_offset
            && parse_utc_offset(offset).is_none()
        {
            errors.push(ValidationError {
                field: "collector.utc_offset".to_string(),
                message: format!("invalid UTC offset '{}': expected '+HH:MM' or 'Z'", offset),
            });
        }

        errors
    }

    /// Resolve the local offset used for partitioning and queries.
    ///
    /// An explicit `utc_offset` wins; otherwise `host` is used, falling back
    /// to UTC.
    pub fn local_offset(&self, host: Option<UtcOffset>) -> Result<UtcOffset, ConfigError> {
        match &self.utc_offset {
            Some(raw) => parse_utc_offset(raw).ok_or_else(|| {
                ConfigError::Validation(vec![ValidationError {
                    field: "collector.utc_offset".to_string(),
                    message: format!("invalid UTC offset '{}'", raw),
                }])
            }),
            None => Ok(host.unwrap_or(UtcOffset::UTC)),
        }
    }
}

/// Parse an offset written as `Z`, `UTC`, `+HH:MM`, `-HH:MM` or `+HH`.
pub fn parse_utc_offset(raw: &str) -> Option<UtcOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return Some(UtcOffset::UTC);
    }

    if raw.contains(':') {
        UtcOffset::parse(
            raw,
            format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
        )
        .ok()
    } else {
        UtcOffset::parse(raw, format_description!("[offset_hour sign:mandatory]")).ok()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `collector.utc_offset`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("thermolog")
        .join("server.toml")
}
