//! Directory configuration
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | ROSTER_CONFIG | path of the TOML file (optional) |
//! | ROSTER_REGION | `region` |
//! | ROSTER_HTTP_ADDR | `http.listen_addr` |
//! | ROSTER_REQUIRED_FIELDS | `write_path.required_fields` (comma list) |
//! | ROSTER_PEERS | `replication.peers` (comma list, enables replication) |
//! | ROSTER_LOG_FORMAT | `logging.format` (`pretty` or `json`) |

use crate::observability::{LogFormat, LoggingConfig};
use crate::record::RegionId;
use crate::replication::ReplicationConfig;
use crate::store::DEFAULT_MAX_PAGE_SIZE;
use crate::write_path::{RecordValidator, RetryPolicy, RETRY_ATTEMPTS_MAX};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WritePathConfig {
    pub required_fields: Vec<String>,
}

impl Default for WritePathConfig {
    fn default() -> Self {
        WritePathConfig {
            required_fields: vec!["name".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 4,
            base_backoff_ms: 20,
            max_backoff_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Page size used when a caller gives none
    pub page_size_hint: usize,
    pub max_page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        PaginationConfig {
            page_size_hint: 100,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub region: String,
    pub write_path: WritePathConfig,
    pub retry: RetryConfig,
    pub pagination: PaginationConfig,
    pub http: HttpConfig,
    pub replication: ReplicationConfig,
    pub logging: LoggingConfig,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        DirectoryConfig {
            region: "local".to_string(),
            write_path: WritePathConfig::default(),
            retry: RetryConfig::default(),
            pagination: PaginationConfig::default(),
            http: HttpConfig::default(),
            replication: ReplicationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DirectoryConfig {
    /// Fast settings for tests: loopback listeners, no backoff sleeps
    pub fn test() -> Self {
        DirectoryConfig {
            region: "test-region".to_string(),
            retry: RetryConfig {
                max_attempts: 3,
                base_backoff_ms: 0,
                max_backoff_ms: 0,
            },
            http: HttpConfig {
                listen_addr: "127.0.0.1:0".to_string(),
            },
            replication: ReplicationConfig {
                listen_addr: "127.0.0.1:0".to_string(),
                gossip_interval_ms: 20,
                ..ReplicationConfig::default()
            },
            ..Self::default()
        }
    }

    /// File (if `ROSTER_CONFIG` is set), then process environment, then validate
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ROSTER_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `ROSTER_*` overrides read through `lookup`
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(region) = lookup("ROSTER_REGION") {
            self.region = region.trim().to_string();
        }
        if let Some(addr) = lookup("ROSTER_HTTP_ADDR") {
            self.http.listen_addr = addr.trim().to_string();
        }
        if let Some(fields) = lookup("ROSTER_REQUIRED_FIELDS") {
            self.write_path.required_fields = split_list(&fields);
        }
        if let Some(peers) = lookup("ROSTER_PEERS") {
            self.replication.peers = split_list(&peers);
            self.replication.enabled = !self.replication.peers.is_empty();
        }
        if let Some(format) = lookup("ROSTER_LOG_FORMAT") {
            self.logging.format = match format.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(invalid(
                        "logging.format",
                        format!("unknown format {:?}, expected pretty or json", other),
                    ))
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(invalid("region", "must not be empty"));
        }
        if self.retry.max_attempts == 0 || self.retry.max_attempts > RETRY_ATTEMPTS_MAX {
            return Err(invalid(
                "retry.max_attempts",
                format!("must be within 1..={}", RETRY_ATTEMPTS_MAX),
            ));
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return Err(invalid("retry.base_backoff_ms", "exceeds max_backoff_ms"));
        }
        if self.pagination.max_page_size == 0 {
            return Err(invalid("pagination.max_page_size", "must be positive"));
        }
        if self.pagination.page_size_hint == 0
            || self.pagination.page_size_hint > self.pagination.max_page_size
        {
            return Err(invalid(
                "pagination.page_size_hint",
                "must be within 1..=max_page_size",
            ));
        }
        if self.write_path.required_fields.iter().any(|f| f.trim().is_empty()) {
            return Err(invalid("write_path.required_fields", "contains an empty name"));
        }
        if self.replication.enabled && self.replication.peers.is_empty() {
            return Err(invalid("replication.peers", "replication enabled without peers"));
        }
        if self.replication.max_backlog == 0 {
            return Err(invalid("replication.max_backlog", "must be positive"));
        }
        Ok(())
    }

    pub fn region_id(&self) -> RegionId {
        RegionId::new(self.region.trim())
    }

    pub fn validator(&self) -> RecordValidator {
        RecordValidator::new(self.write_path.required_fields.clone())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
