use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use jsonschema::{JSONSchema, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_broker_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_stream() -> String {
    "chatrelay".to_string()
}

fn default_subjects() -> String {
    "chatrelay.>".to_string()
}

fn default_consume_subject() -> String {
    String::new()
}

fn default_durable() -> String {
    "chatrelay-agent".to_string()
}

fn default_batch_size() -> usize {
    16
}

fn default_fetch_timeout_ms() -> u64 {
    1_000
}

fn default_fetch_error_pause_ms() -> u64 {
    500
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("chatrelay.sock")
}

fn default_queue_capacity() -> usize {
    64
}

fn default_dedup_capacity() -> usize {
    1_024
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from("./logs/chatrelay")
}

fn default_logging_filter() -> String {
    "info".to_string()
}

fn default_logging_rotation() -> LoggingRotation {
    LoggingRotation::Daily
}

fn default_logging_retention_days() -> usize {
    14
}

fn default_enabled_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingRotation {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_logging_filter")]
    pub filter: String,
    #[serde(default = "default_logging_rotation")]
    pub rotation: LoggingRotation,
    #[serde(default = "default_logging_retention_days")]
    pub retention_days: usize,
    #[serde(default = "default_enabled_true")]
    pub stderr_warn_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_logging_dir(),
            filter: default_logging_filter(),
            rotation: default_logging_rotation(),
            retention_days: default_logging_retention_days(),
            stderr_warn_enabled: true,
        }
    }
}

/// Broker endpoint plus the stream/consumer identities the process
/// ensures at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default = "default_stream")]
    pub stream: String,
    #[serde(default = "default_subjects")]
    pub subjects: String,
    #[serde(default = "default_consume_subject")]
    pub consume_subject: String,
    #[serde(default = "default_durable")]
    pub durable: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            stream: default_stream(),
            subjects: default_subjects(),
            consume_subject: default_consume_subject(),
            durable: default_durable(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_fetch_error_pause_ms")]
    pub fetch_error_pause_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            fetch_error_pause_ms: default_fetch_error_pause_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRuntimeConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Capacity of the friend-message dedup cache; 0 disables dedup.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

impl Default for BridgeRuntimeConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            queue_capacity: default_queue_capacity(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

/// One conversation→subject mapping; the full ordered list forms the
/// routing table for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    pub chat: String,
    pub subject: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub bridge: BridgeRuntimeConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config_value: Value = json5::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        let config_base = config_path.parent().unwrap_or_else(|| Path::new("."));
        let schema_path = resolve_schema_path(config_base, &config_value)?;
        validate_against_schema(&config_value, &schema_path)?;

        let mut config: Config =
            serde_json::from_value(config_value).context("failed to deserialize config")?;

        if !config.bridge.socket_path.is_absolute() {
            config.bridge.socket_path = config_base.join(&config.bridge.socket_path);
        }
        if !config.logging.dir.is_absolute() {
            config.logging.dir = config_base.join(&config.logging.dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Structural checks the schema cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for route in &self.routes {
            if route.chat.trim().is_empty() {
                return Err(anyhow!("routes: conversation name cannot be empty"));
            }
            if route.subject.trim().is_empty() {
                return Err(anyhow!(
                    "routes: subject for conversation '{}' cannot be empty",
                    route.chat
                ));
            }
            if !seen.insert(route.chat.as_str()) {
                return Err(anyhow!(
                    "routes: conversation '{}' is listed more than once",
                    route.chat
                ));
            }
        }
        if self.broker.url.trim().is_empty() {
            return Err(anyhow!("broker.url cannot be empty"));
        }
        if self.broker.stream.trim().is_empty() {
            return Err(anyhow!("broker.stream cannot be empty"));
        }
        if self.broker.durable.trim().is_empty() {
            return Err(anyhow!("broker.durable cannot be empty"));
        }
        Ok(())
    }
}

fn resolve_schema_path(config_base: &Path, config_value: &Value) -> Result<PathBuf> {
    if let Some(path_text) = config_value.get("$schema").and_then(|value| value.as_str()) {
        let configured = PathBuf::from(path_text);
        if configured.is_absolute() {
            return Ok(configured);
        }
        return Ok(config_base.join(&configured));
    }

    let local_default = config_base.join("chatrelay.schema.json");
    if local_default.exists() {
        return Ok(local_default);
    }

    Err(anyhow!(
        "unable to resolve schema path: expected $schema in config or chatrelay.schema.json"
    ))
}

fn validate_against_schema(config_value: &Value, schema_path: &Path) -> Result<()> {
    let schema_content = fs::read_to_string(schema_path)
        .with_context(|| format!("failed to read schema {}", schema_path.display()))?;
    let schema: Value = serde_json::from_str(&schema_content)
        .with_context(|| format!("failed to parse schema {}", schema_path.display()))?;

    let compiled =
        JSONSchema::compile(&schema).map_err(|e| anyhow!("failed to compile schema: {e}"))?;

    match compiled.validate(config_value) {
        Ok(()) => Ok(()),
        Err(errors_iter) => {
            let validation_errors: Vec<ValidationError> = errors_iter.collect();
            let messages: Vec<String> = validation_errors
                .into_iter()
                .map(|error| error.to_string())
                .collect();
            Err(anyhow!("config validation failed: {}", messages.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use uuid::Uuid;

    use super::{Config, LoggingConfig, LoggingRotation, RouteConfig};

    #[test]
    fn logging_config_defaults_match_contract() {
        let config = LoggingConfig::default();
        assert_eq!(config.dir, std::path::PathBuf::from("./logs/chatrelay"));
        assert_eq!(config.filter, "info");
        assert_eq!(config.rotation, LoggingRotation::Daily);
        assert_eq!(config.retention_days, 14);
        assert!(config.stderr_warn_enabled);
    }

    #[test]
    fn broker_and_consumer_defaults_match_contract() {
        let config: Config = serde_json::from_value(serde_json::json!({})).expect("defaults");
        assert_eq!(config.broker.url, "nats://localhost:4222");
        assert_eq!(config.broker.stream, "chatrelay");
        assert_eq!(config.broker.durable, "chatrelay-agent");
        assert_eq!(config.consumer.batch_size, 16);
        assert_eq!(config.consumer.fetch_timeout_ms, 1_000);
        assert_eq!(config.bridge.queue_capacity, 64);
        assert_eq!(config.bridge.dedup_capacity, 1_024);
    }

    #[test]
    fn duplicate_route_conversations_are_rejected() {
        let mut config: Config = serde_json::from_value(serde_json::json!({})).expect("defaults");
        config.routes = vec![
            RouteConfig {
                chat: "Friends".to_string(),
                subject: "chatrelay.friends".to_string(),
            },
            RouteConfig {
                chat: "Friends".to_string(),
                subject: "chatrelay.other".to_string(),
            },
        ];

        let err = config.validate().expect_err("duplicates must be rejected");
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn empty_route_subject_is_rejected() {
        let mut config: Config = serde_json::from_value(serde_json::json!({})).expect("defaults");
        config.routes = vec![RouteConfig {
            chat: "Friends".to_string(),
            subject: "  ".to_string(),
        }];

        assert!(config.validate().is_err());
    }

    #[test]
    fn config_load_rejects_zero_queue_capacity() {
        let work_dir =
            std::env::temp_dir().join(format!("chatrelay-config-test-{}", Uuid::now_v7()));
        fs::create_dir_all(&work_dir).expect("temp work dir should be created");

        let config_path = work_dir.join("chatrelay.jsonc");
        let schema_path =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("chatrelay.schema.json");
        let config_text = format!(
            r#"{{
  "$schema": "{}",
  "bridge": {{
    "queue_capacity": 0
  }}
}}"#,
            schema_path.display(),
        );
        fs::write(&config_path, config_text).expect("config should be written");

        let err = Config::load(&config_path).expect_err("queue_capacity=0 should fail schema");
        assert!(
            err.to_string().contains("minimum"),
            "unexpected error: {err}",
        );

        let _ = fs::remove_file(&config_path);
        let _ = fs::remove_dir(&work_dir);
    }

    #[test]
    fn config_load_parses_routes_in_order() {
        let work_dir =
            std::env::temp_dir().join(format!("chatrelay-config-test-{}", Uuid::now_v7()));
        fs::create_dir_all(&work_dir).expect("temp work dir should be created");

        let config_path = work_dir.join("chatrelay.jsonc");
        let schema_path =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("chatrelay.schema.json");
        let config_text = format!(
            r#"{{
  "$schema": "{}",
  "routes": [
    {{ "chat": "Friends", "subject": "chatrelay.friends" }},
    {{ "chat": "Work", "subject": "chatrelay.work" }}
  ]
}}"#,
            schema_path.display(),
        );
        fs::write(&config_path, config_text).expect("config should be written");

        let config = Config::load(&config_path).expect("config should load");
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].chat, "Friends");
        assert_eq!(config.routes[1].subject, "chatrelay.work");

        let _ = fs::remove_file(&config_path);
        let _ = fs::remove_dir(&work_dir);
    }
}
