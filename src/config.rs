//! Configuration management for the log shipper

use crate::batch::DEFAULT_MAX_BATCH_BYTES;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_WORKFLOW_REGION: &str = "nb";
pub const DEFAULT_LOGDB_RETENTION: &str = "30d";
pub const DEFAULT_FLUSH_INTERVAL_SECS: i64 = 5;
pub const DEFAULT_PIPELINE_HOST: &str = "https://pipeline.qiniu.com";
pub const DEFAULT_LOGDB_HOST: &str = "https://logdb.qiniu.com";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the ingestion workflow
    pub workflow_name: String,

    /// Region the workflow lives in
    pub workflow_region: String,

    /// Repository receiving the raw points
    pub pipeline_repo: String,

    /// Search repository the pipeline exports into, empty to skip
    pub logdb_repo: String,

    /// Retention for the search repository, e.g. `30d`
    pub logdb_retention: String,

    pub access_key: String,

    #[serde(skip_serializing)]
    pub secret_key: String,

    /// Seconds between timer flushes; values <= 0 fall back to the default
    pub flush_interval_secs: i64,

    pub pipeline_host: String,

    pub logdb_host: String,

    /// Payload capacity of a single batch in bytes
    pub max_batch_bytes: usize,

    /// Concurrent sends allowed, 0 for unbounded
    pub max_in_flight: usize,

    pub http_timeout_secs: u64,

    /// Retries per payload inside the transport
    pub max_retries: u32,

    pub retry_backoff_ms: u64,

    /// How long `stop` waits for in-flight sends
    pub shutdown_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow_name: "logging".to_string(),
            workflow_region: DEFAULT_WORKFLOW_REGION.to_string(),
            pipeline_repo: "logs".to_string(),
            logdb_repo: String::new(),
            logdb_retention: DEFAULT_LOGDB_RETENTION.to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            pipeline_host: DEFAULT_PIPELINE_HOST.to_string(),
            logdb_host: DEFAULT_LOGDB_HOST.to_string(),
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            max_in_flight: 8,
            http_timeout_secs: 10,
            max_retries: 0,
            retry_backoff_ms: 500,
            shutdown_timeout_secs: 5,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("workflow_name", &self.workflow_name)
            .field("workflow_region", &self.workflow_region)
            .field("pipeline_repo", &self.pipeline_repo)
            .field("logdb_repo", &self.logdb_repo)
            .field("logdb_retention", &self.logdb_retention)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("flush_interval_secs", &self.flush_interval_secs)
            .field("pipeline_host", &self.pipeline_host)
            .field("logdb_host", &self.logdb_host)
            .field("max_batch_bytes", &self.max_batch_bytes)
            .field("max_in_flight", &self.max_in_flight)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().merge_env()
    }

    /// Load configuration from a JSON file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Override fields with any `LOG_SHIPPER_*` variables that are set
    pub fn merge_env(self) -> Self {
        self.merge_vars(|name| env::var(name).ok())
    }

    /// Override fields from `lookup`, keyed by `LOG_SHIPPER_*` names;
    /// values that fail to parse are ignored
    pub fn merge_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("LOG_SHIPPER_WORKFLOW_NAME") {
            self.workflow_name = v;
        }

        if let Some(v) = lookup("LOG_SHIPPER_WORKFLOW_REGION") {
            self.workflow_region = v;
        }

        if let Some(v) = lookup("LOG_SHIPPER_PIPELINE_REPO") {
            self.pipeline_repo = v;
        }

        if let Some(v) = lookup("LOG_SHIPPER_LOGDB_REPO") {
            self.logdb_repo = v;
        }

        if let Some(v) = lookup("LOG_SHIPPER_LOGDB_RETENTION") {
            self.logdb_retention = v;
        }

        if let Some(v) = lookup("LOG_SHIPPER_ACCESS_KEY") {
            self.access_key = v;
        }

        if let Some(v) = lookup("LOG_SHIPPER_SECRET_KEY") {
            self.secret_key = v;
        }

        if let Some(v) = lookup("LOG_SHIPPER_PIPELINE_HOST") {
            self.pipeline_host = v;
        }

        if let Some(v) = lookup("LOG_SHIPPER_LOGDB_HOST") {
            self.logdb_host = v;
        }

        if let Some(v) = lookup("LOG_SHIPPER_FLUSH_INTERVAL_SECONDS") {
            if let Ok(seconds) = v.parse() {
                self.flush_interval_secs = seconds;
            }
        }

        if let Some(v) = lookup("LOG_SHIPPER_MAX_BATCH_BYTES") {
            if let Ok(bytes) = v.parse() {
                self.max_batch_bytes = bytes;
            }
        }

        if let Some(v) = lookup("LOG_SHIPPER_MAX_IN_FLIGHT") {
            if let Ok(n) = v.parse() {
                self.max_in_flight = n;
            }
        }

        if let Some(v) = lookup("LOG_SHIPPER_HTTP_TIMEOUT_SECONDS") {
            if let Ok(seconds) = v.parse() {
                self.http_timeout_secs = seconds;
            }
        }

        if let Some(v) = lookup("LOG_SHIPPER_MAX_RETRIES") {
            if let Ok(retries) = v.parse() {
                self.max_retries = retries;
            }
        }

        if let Some(v) = lookup("LOG_SHIPPER_RETRY_BACKOFF_MS") {
            if let Ok(ms) = v.parse() {
                self.retry_backoff_ms = ms;
            }
        }

        if let Some(v) = lookup("LOG_SHIPPER_SHUTDOWN_TIMEOUT_SECONDS") {
            if let Ok(seconds) = v.parse() {
                self.shutdown_timeout_secs = seconds;
            }
        }

        self
    }

    /// Replace unset or invalid optional fields with their defaults
    pub fn with_defaults(mut self) -> Self {
        let defaults = Config::default();

        if self.workflow_region.trim().is_empty() {
            self.workflow_region = defaults.workflow_region;
        }

        if self.logdb_retention.trim().is_empty() {
            self.logdb_retention = defaults.logdb_retention;
        }

        if self.flush_interval_secs <= 0 {
            warn!(
                "flush_interval_secs = {} is not positive, using {}",
                self.flush_interval_secs, DEFAULT_FLUSH_INTERVAL_SECS
            );
            self.flush_interval_secs = defaults.flush_interval_secs;
        }

        if self.pipeline_host.trim().is_empty() {
            self.pipeline_host = defaults.pipeline_host;
        }

        if self.logdb_host.trim().is_empty() {
            self.logdb_host = defaults.logdb_host;
        }

        if self.max_batch_bytes == 0 {
            self.max_batch_bytes = defaults.max_batch_bytes;
        }

        if self.http_timeout_secs == 0 {
            self.http_timeout_secs = defaults.http_timeout_secs;
        }

        if self.shutdown_timeout_secs == 0 {
            self.shutdown_timeout_secs = defaults.shutdown_timeout_secs;
        }

        self
    }

    /// Validate the configuration; only missing credentials are fatal
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key.is_empty() {
            return Err(ConfigError::MissingCredentials("access_key"));
        }

        if self.secret_key.is_empty() {
            return Err(ConfigError::MissingCredentials("secret_key"));
        }

        if self.pipeline_repo.is_empty() {
            warn!("pipeline_repo is empty, sends will be rejected by the endpoint");
        }

        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        let secs = if self.flush_interval_secs > 0 {
            self.flush_interval_secs
        } else {
            DEFAULT_FLUSH_INTERVAL_SECS
        };
        Duration::from_secs(secs.unsigned_abs())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn with_credentials() -> Config {
        Config {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_non_positive_interval_falls_back_to_default() {
        for interval in [0, -5] {
            let config = Config {
                flush_interval_secs: interval,
                ..with_credentials()
            }
            .with_defaults();

            assert_eq!(config.flush_interval_secs, DEFAULT_FLUSH_INTERVAL_SECS);
            assert_eq!(config.flush_interval(), Duration::from_secs(5));
        }
    }

    #[test]
    fn test_positive_interval_is_preserved() {
        let config = Config {
            flush_interval_secs: 30,
            ..with_credentials()
        }
        .with_defaults();

        assert_eq!(config.flush_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_defaults_are_idempotent() {
        let once = with_credentials().with_defaults();
        let twice = once.clone().with_defaults();

        assert_eq!(once.flush_interval_secs, twice.flush_interval_secs);
        assert_eq!(once.workflow_region, twice.workflow_region);
        assert_eq!(once.logdb_retention, twice.logdb_retention);
    }

    #[test]
    fn test_blank_region_and_retention_fall_back() {
        let config = Config {
            workflow_region: " ".to_string(),
            logdb_retention: String::new(),
            ..with_credentials()
        }
        .with_defaults();

        assert_eq!(config.workflow_region, DEFAULT_WORKFLOW_REGION);
        assert_eq!(config.logdb_retention, DEFAULT_LOGDB_RETENTION);
    }

    #[test]
    fn test_missing_credentials_fail_validation() {
        assert!(matches!(
            Config::default().validate(),
            Err(ConfigError::MissingCredentials("access_key"))
        ));

        let config = Config {
            access_key: "ak".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredentials("secret_key"))
        ));

        assert!(with_credentials().validate().is_ok());
    }

    #[test]
    fn test_from_file_fills_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"pipeline_repo": "app_logs", "access_key": "ak", "secret_key": "sk", "flush_interval_secs": -1}}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap().with_defaults();

        assert_eq!(config.pipeline_repo, "app_logs");
        assert_eq!(config.flush_interval_secs, DEFAULT_FLUSH_INTERVAL_SECS);
        assert_eq!(config.workflow_region, DEFAULT_WORKFLOW_REGION);
        assert_eq!(config.max_batch_bytes, DEFAULT_MAX_BATCH_BYTES);
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            Config::from_file("/definitely/not/here.json"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", with_credentials());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("\"sk\""));
    }

    #[test]
    fn test_merge_vars_overrides_fields() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("LOG_SHIPPER_PIPELINE_REPO", "app_logs"),
            ("LOG_SHIPPER_SECRET_KEY", "from-env"),
            ("LOG_SHIPPER_MAX_IN_FLIGHT", "2"),
            ("LOG_SHIPPER_SHUTDOWN_TIMEOUT_SECONDS", "12"),
            ("LOG_SHIPPER_HTTP_TIMEOUT_SECONDS", "soon"),
        ]);

        let config = with_credentials().merge_vars(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.pipeline_repo, "app_logs");
        assert_eq!(config.secret_key, "from-env");
        assert_eq!(config.max_in_flight, 2);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(12));
        assert_eq!(config.http_timeout_secs, 10);
    }

    #[test]
    fn test_zero_shutdown_timeout_falls_back() {
        let config = Config {
            shutdown_timeout_secs: 0,
            ..with_credentials()
        }
        .with_defaults();

        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_serialized_config_omits_secret() {
        let config = Config {
            secret_key: "s3cr3t-value".to_string(),
            ..with_credentials()
        };

        let rendered = serde_json::to_string(&config).unwrap();
        assert!(!rendered.contains("s3cr3t-value"));
        assert!(!rendered.contains("secret_key"));
        assert!(rendered.contains("\"access_key\":\"ak\""));
    }
}
