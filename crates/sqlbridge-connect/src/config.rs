//! Configuration for sqlbridge-connect
//!
//! Two inputs configure the bridge:
//!
//! - [`BridgeConfig`]: the process configuration, a YAML file read once at
//!   startup, with `${VAR}` / `${VAR:-default}` environment expansion.
//! - [`SourceConfig`]: the database source document delivered by the
//!   platform in a `Configure` event. It is camelCase JSON and may arrive
//!   wrapped as `{"config": {"jdbcConfig": {..}}}`, `{"jdbcConfig": {..}}`
//!   or bare.

use serde::{Deserialize, Serialize};
use sqlbridge_rdbc::connection::ConnectionConfig;
use sqlbridge_rdbc::security::parse_table_name;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::warn;

use crate::error::{ConnectorError, Result};
use crate::retry::RetryPolicy;
use crate::types::SensitiveString;

static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Default process configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "sqlbridge.yaml";

/// Root process configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Orchestration platform connection
    pub platform: PlatformConfig,

    /// Database pool settings shared by every source configuration
    #[serde(default)]
    pub database: DatabaseSettings,
}

/// Orchestration platform connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformConfig {
    /// Platform address (host:port)
    pub url: String,

    /// Access token presented during the handshake
    pub token: SensitiveString,

    /// Name this source registers under
    pub source: String,

    /// Handshake timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Timeout for a platform-requested reconnect, in seconds
    #[serde(default = "default_reconnect_timeout_secs")]
    pub reconnect_timeout_secs: u64,

    /// Sleep between handshake attempts, in milliseconds
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Give up after this many handshake attempts (unbounded when absent)
    #[serde(default)]
    pub max_connect_attempts: Option<u32>,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_reconnect_timeout_secs() -> u64 {
    10
}

fn default_reconnect_interval_ms() -> u64 {
    5000
}

impl PlatformConfig {
    /// Handshake timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Platform-requested reconnect timeout
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_secs)
    }

    /// Retry policy for the connect loop
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::fixed(Duration::from_millis(self.reconnect_interval_ms));
        match self.max_connect_attempts {
            Some(max) => policy.with_max_attempts(max),
            None => policy,
        }
    }
}

/// Database pool settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseSettings {
    /// Maximum wait for a pooled connection, in milliseconds
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_acquire_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl DatabaseSettings {
    /// Connection acquisition timeout
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl BridgeConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| ConnectorError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.platform.url.trim().is_empty() {
            return Err(ConnectorError::config("platform.url must be set"));
        }
        if self.platform.token.is_empty() {
            return Err(ConnectorError::config("platform.token must be set"));
        }
        if self.platform.source.trim().is_empty() {
            return Err(ConnectorError::config("platform.source must be set"));
        }
        if self.platform.max_connect_attempts == Some(0) {
            return Err(ConnectorError::config(
                "platform.max_connect_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Expand environment variables in the format ${VAR} or ${VAR:-default}
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .to_string()
}

/// Database source configuration from a `Configure` event
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// Database user
    #[serde(default)]
    pub username: Option<String>,

    /// Database password
    #[serde(default)]
    pub password: Option<SensitiveString>,

    /// Database URL, `jdbc:` prefix allowed
    #[serde(default, rename = "dbURL")]
    pub db_url: Option<String>,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: i64,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_time")]
    pub poll_time: i64,

    /// Statement run on every poll
    #[serde(default)]
    pub poll_query: Option<String>,

    /// Table exported page by page
    #[serde(default)]
    pub load_table: Option<String>,

    /// Bulk load interval in milliseconds
    #[serde(default = "default_load_interval")]
    pub load_interval: i64,

    /// Rows per bulk load page
    #[serde(default = "default_load_size")]
    pub load_size: i64,

    /// Rewrite bulk load column labels from snake_case to camelCase
    #[serde(default)]
    pub load_camel_case: bool,
}

fn default_pool_size() -> i64 {
    10
}

fn default_poll_time() -> i64 {
    1000
}

fn default_load_interval() -> i64 {
    1000
}

fn default_load_size() -> i64 {
    100
}

/// Background task a source configuration asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// Run a fixed query on every tick
    Poll {
        /// Statement text
        query: String,
        /// Tick period
        interval: Duration,
    },
    /// Export a table one page per tick
    Load {
        /// Possibly schema-qualified table name
        table: String,
        /// Tick period
        interval: Duration,
        /// Rows per page
        page_size: u64,
        /// Rewrite labels to camelCase
        camel_case: bool,
    },
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl SourceConfig {
    /// Parse and validate a configuration document
    pub fn from_document(document: &serde_json::Value) -> Result<Self> {
        let inner = document
            .get("config")
            .and_then(|c| c.get("jdbcConfig"))
            .or_else(|| document.get("jdbcConfig"))
            .unwrap_or(document);

        if !inner.is_object() {
            return Err(ConnectorError::config(
                "configuration document must be an object",
            ));
        }

        let config: Self = serde_json::from_value(inner.clone())
            .map_err(|e| ConnectorError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate credentials and scheduling fields
    pub fn validate(&self) -> Result<()> {
        if !non_empty(&self.username) {
            return Err(ConnectorError::config("username is required"));
        }
        if self.password.as_ref().is_none_or(SensitiveString::is_empty) {
            return Err(ConnectorError::config("password is required"));
        }
        if !non_empty(&self.db_url) {
            return Err(ConnectorError::config("dbURL is required"));
        }
        if self.pool_size <= 0 {
            return Err(ConnectorError::config(format!(
                "poolSize must be greater than zero, got {}",
                self.pool_size
            )));
        }

        if non_empty(&self.poll_query) {
            if self.poll_time <= 0 {
                return Err(ConnectorError::config(format!(
                    "pollTime must be greater than zero, got {}",
                    self.poll_time
                )));
            }
        } else if let Some(table) = self.load_table() {
            parse_table_name(table)
                .map_err(|e| ConnectorError::config(format!("invalid loadTable: {e}")))?;
            if self.load_interval <= 0 {
                return Err(ConnectorError::config(format!(
                    "loadInterval must be greater than zero, got {}",
                    self.load_interval
                )));
            }
            if self.load_size <= 0 {
                return Err(ConnectorError::config(format!(
                    "loadSize must be greater than zero, got {}",
                    self.load_size
                )));
            }
        }
        Ok(())
    }

    /// Load table, treating a blank value as absent
    fn load_table(&self) -> Option<&str> {
        self.load_table.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// The background task to run, if any
    ///
    /// A poll query wins over a load table when both are configured.
    pub fn schedule(&self) -> Option<ScheduleSpec> {
        if let Some(query) = self.poll_query.as_deref().filter(|q| !q.trim().is_empty()) {
            if self.load_table().is_some() {
                warn!("Both pollQuery and loadTable configured; loadTable is ignored");
            }
            return Some(ScheduleSpec::Poll {
                query: query.to_string(),
                interval: Duration::from_millis(self.poll_time.unsigned_abs()),
            });
        }
        self.load_table().map(|table| ScheduleSpec::Load {
            table: table.to_string(),
            interval: Duration::from_millis(self.load_interval.unsigned_abs()),
            page_size: self.load_size.unsigned_abs(),
            camel_case: self.load_camel_case,
        })
    }

    /// Pool size as validated
    pub fn max_connections(&self) -> usize {
        usize::try_from(self.pool_size).unwrap_or(1).max(1)
    }

    /// Driver connection settings
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.db_url.clone().unwrap_or_default());
        config.username = self.username.clone();
        config.password = self
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string());
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> serde_json::Value {
        json!({
            "username": "app",
            "password": "s3cret",
            "dbURL": "jdbc:postgresql://db:5432/orders"
        })
    }

    #[test]
    fn test_bridge_config_defaults() {
        let yaml = r#"
platform:
  url: "localhost:7070"
  token: "abc"
  source: "orders-db"
"#;
        let config = BridgeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.platform.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.platform.reconnect_timeout(), Duration::from_secs(10));
        assert_eq!(config.platform.reconnect_interval_ms, 5000);
        assert_eq!(config.platform.max_connect_attempts, None);
        assert_eq!(config.database.acquire_timeout(), Duration::from_millis(5000));
        assert!(!format!("{config:?}").contains("abc\""));
    }

    #[test]
    fn test_bridge_config_env_expansion() {
        std::env::set_var("SQLBRIDGE_TEST_TOKEN", "from-env");
        let yaml = r#"
platform:
  url: "${SQLBRIDGE_TEST_HOST:-127.0.0.1:7070}"
  token: "${SQLBRIDGE_TEST_TOKEN}"
  source: "orders"
  max_connect_attempts: 3
"#;
        let config = BridgeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.platform.url, "127.0.0.1:7070");
        assert_eq!(config.platform.token.expose_secret(), "from-env");
        assert_eq!(config.platform.retry_policy().max_attempts(), Some(3));
    }

    #[test]
    fn test_bridge_config_requires_fields() {
        let yaml = r#"
platform:
  url: ""
  token: "abc"
  source: "orders"
"#;
        let err = BridgeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("platform.url"));
    }

    #[test]
    fn test_source_config_defaults() {
        let config = SourceConfig::from_document(&valid()).unwrap();
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.poll_time, 1000);
        assert_eq!(config.load_interval, 1000);
        assert_eq!(config.load_size, 100);
        assert!(!config.load_camel_case);
        assert_eq!(config.schedule(), None);
        assert_eq!(
            config.connection_config().driver_url(),
            "postgresql://db:5432/orders"
        );
    }

    #[test]
    fn test_source_config_accepts_wrapped_documents() {
        let nested = json!({ "config": { "jdbcConfig": valid() } });
        assert!(SourceConfig::from_document(&nested).is_ok());

        let wrapped = json!({ "jdbcConfig": valid() });
        assert!(SourceConfig::from_document(&wrapped).is_ok());
    }

    #[test]
    fn test_source_config_missing_credentials() {
        for field in ["username", "password", "dbURL"] {
            let mut doc = valid();
            doc.as_object_mut().unwrap().remove(field);
            let err = SourceConfig::from_document(&doc).unwrap_err();
            assert!(matches!(err, ConnectorError::Config(_)), "{field}");
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    #[test]
    fn test_source_config_rejects_bad_sizes() {
        let mut doc = valid();
        doc["poolSize"] = json!(0);
        assert!(SourceConfig::from_document(&doc).is_err());

        let mut doc = valid();
        doc["loadTable"] = json!("events");
        doc["loadSize"] = json!(-1);
        assert!(SourceConfig::from_document(&doc).is_err());

        let mut doc = valid();
        doc["pollQuery"] = json!("SELECT 1");
        doc["pollTime"] = json!(0);
        assert!(SourceConfig::from_document(&doc).is_err());

        let mut doc = valid();
        doc["loadTable"] = json!("events; DROP TABLE x");
        assert!(SourceConfig::from_document(&doc).is_err());
    }

    #[test]
    fn test_poll_query_wins_over_load_table() {
        let mut doc = valid();
        doc["pollQuery"] = json!("SELECT * FROM alerts");
        doc["pollTime"] = json!(250);
        doc["loadTable"] = json!("events");

        let config = SourceConfig::from_document(&doc).unwrap();
        assert_eq!(
            config.schedule(),
            Some(ScheduleSpec::Poll {
                query: "SELECT * FROM alerts".into(),
                interval: Duration::from_millis(250),
            })
        );
    }

    #[test]
    fn test_blank_load_table_is_absent() {
        for blank in ["", "   "] {
            let mut doc = valid();
            doc["loadTable"] = json!(blank);
            let config = SourceConfig::from_document(&doc).unwrap();
            assert_eq!(config.schedule(), None);
        }
    }

    #[test]
    fn test_load_schedule() {
        let mut doc = valid();
        doc["loadTable"] = json!("audit.events");
        doc["loadInterval"] = json!(500);
        doc["loadSize"] = json!(3);
        doc["loadCamelCase"] = json!(true);

        let config = SourceConfig::from_document(&doc).unwrap();
        assert_eq!(
            config.schedule(),
            Some(ScheduleSpec::Load {
                table: "audit.events".into(),
                interval: Duration::from_millis(500),
                page_size: 3,
                camel_case: true,
            })
        );
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let config = SourceConfig::from_document(&valid()).unwrap();
        assert!(!format!("{config:?}").contains("s3cret"));
    }
}
