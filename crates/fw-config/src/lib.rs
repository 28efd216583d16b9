//! # fw-config
//!
//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `WARDEN__SECTION__KEY` environment variables.

use fw_core::PermissionTier;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "WARDEN_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main process configuration
#[derive(Debug, Deserialize, Default)]
pub struct WardenConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub forum_api: ForumApiConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub forums: Vec<ForumConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Reconnect attempts before a call fails with `StoreUnavailable`.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ForumApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub token: SecretString,
    #[serde(default = "default_api_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_api_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for ForumApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: empty_secret(),
            connect_timeout_ms: default_api_connect_timeout_ms(),
            read_timeout_ms: default_api_read_timeout_ms(),
        }
    }
}

impl ForumApiConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_review_interval_secs")]
    pub interval_secs: u64,
    /// Authors above this platform level skip the content rules.
    #[serde(default = "default_trusted_level")]
    pub trusted_level: u8,
    #[serde(default = "default_ban_days")]
    pub ban_days: u32,
    /// A thread's first reply is peeked at when its reply count exceeds this.
    #[serde(default)]
    pub nested_reply_threshold: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Extra attempts for an enforcement call that failed in transport.
    #[serde(default = "default_action_retries")]
    pub action_retries: u32,
    /// Benign-topic keywords that keep exemptible rules from firing.
    #[serde(default)]
    pub exempt_pattern: Option<String>,
    /// Category name to regex, replacing the built-in pattern.
    #[serde(default)]
    pub patterns: HashMap<String, String>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_review_interval_secs(),
            trusted_level: default_trusted_level(),
            ban_days: default_ban_days(),
            nested_reply_threshold: 0,
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
            action_retries: default_action_retries(),
            exempt_pattern: None,
            patterns: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    #[serde(default = "default_command_interval_secs")]
    pub interval_secs: u64,
    /// On startup, mentions younger than this are still handled.
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: i64,
    #[serde(default = "default_broadcast_cooldown_secs")]
    pub broadcast_cooldown_secs: u64,
    #[serde(default = "default_broadcast_size")]
    pub broadcast_size: usize,
    #[serde(default = "default_rotation_capacity")]
    pub rotation_capacity: usize,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_command_interval_secs(),
            lookback_secs: default_lookback_secs(),
            broadcast_cooldown_secs: default_broadcast_cooldown_secs(),
            broadcast_size: default_broadcast_size(),
            rotation_capacity: default_rotation_capacity(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForumConfig {
    pub name: String,
    /// Thread reserved for operator-only commands.
    #[serde(default)]
    pub control_thread: Option<u64>,
    #[serde(default)]
    pub busy_hours: Option<BusyHours>,
    #[serde(default)]
    pub operators: Vec<OperatorSeed>,
}

/// Local-time window during which temporarily hidden threads stay hidden.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct BusyHours {
    pub start: u8,
    pub end: u8,
}

impl BusyHours {
    /// Whether `hour` (0-23) falls inside the window. Windows may wrap midnight.
    pub fn contains(&self, hour: u8) -> bool {
        if self.start <= self.end {
            self.start <= hour && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorSeed {
    pub user_id: u64,
    pub tier: PermissionTier,
}

impl WardenConfig {
    /// Loads `.env`, then the file named by `WARDEN_CONFIG` if any.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let path = std::env::var(CONFIG_PATH_VAR).ok();
        Self::load(path.as_deref().map(Path::new))
    }

    /// Loads from file and environment, then validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("WARDEN")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: WardenConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the loops cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forums.is_empty() {
            return Err(ConfigError::Invalid("at least one [[forums]] entry is required".into()));
        }
        if let Some(forum) = self.forums.iter().find(|f| f.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("forum with empty name (control_thread={:?})", forum.control_thread)));
        }
        if self.review.interval_secs == 0 || self.commands.interval_secs == 0 || self.review.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("polling intervals must be positive".into()));
        }
        if self.review.retention_days <= 0 {
            return Err(ConfigError::Invalid("review.retention_days must be positive".into()));
        }
        for forum in &self.forums {
            if let Some(window) = forum.busy_hours {
                if window.start > 23 || window.end > 23 || window.start == window.end {
                    return Err(ConfigError::Invalid(format!("forum {}: bad busy_hours {:?}", forum.name, window)));
                }
            }
        }
        for (name, pattern) in &self.review.patterns {
            regex::Regex::new(pattern)
                .map_err(|e| ConfigError::Invalid(format!("pattern {name}: {e}")))?;
        }
        if let Some(pattern) = &self.review.exempt_pattern {
            regex::Regex::new(pattern)
                .map_err(|e| ConfigError::Invalid(format!("exempt_pattern: {e}")))?;
        }
        Ok(())
    }

    pub fn forum(&self, name: &str) -> Option<&ForumConfig> {
        self.forums.iter().find(|f| f.name == name)
    }
}

fn deserialize_secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

// Default value helpers
fn default_log_level() -> String {
    "info".to_string()
}

fn default_store_url() -> String {
    "sqlite://forum_warden.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_backoff_ms() -> u64 {
    500
}

fn default_base_url() -> String {
    "http://127.0.0.1:8700".to_string()
}

fn default_api_connect_timeout_ms() -> u64 {
    3_000
}

fn default_api_read_timeout_ms() -> u64 {
    15_000
}

fn default_review_interval_secs() -> u64 {
    30
}

fn default_trusted_level() -> u8 {
    4
}

fn default_ban_days() -> u32 {
    10
}

fn default_retention_days() -> i64 {
    15
}

fn default_sweep_interval_secs() -> u64 {
    3_600
}

fn default_action_retries() -> u32 {
    2
}

fn default_command_interval_secs() -> u64 {
    5
}

fn default_lookback_secs() -> i64 {
    3_600
}

fn default_broadcast_cooldown_secs() -> u64 {
    30
}

fn default_broadcast_size() -> usize {
    4
}

fn default_rotation_capacity() -> usize {
    16
}

fn default_command_timeout_secs() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn minimal() -> WardenConfig {
        serde_json::from_value(serde_json::json!({
            "forums": [{ "name": "soulknight", "control_thread": 42 }]
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = minimal();
        assert_eq!(config.review.trusted_level, 4);
        assert_eq!(config.review.retention_days, 15);
        assert_eq!(config.commands.broadcast_size, 4);
        assert_eq!(config.forum_api.token.expose_secret(), "");
        assert_eq!(config.forum("soulknight").and_then(|f| f.control_thread), Some(42));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_validates_file() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("warden-good-{}.toml", std::process::id()));
        let bad = dir.join(format!("warden-bad-{}.toml", std::process::id()));
        std::fs::write(&good, "[[forums]]\nname = \"soulknight\"\ncontrol_thread = 42\n").unwrap();
        std::fs::write(&bad, "[review]\ntrusted_level = 3\n").unwrap();

        let loaded = WardenConfig::load(Some(&good));
        let rejected = WardenConfig::load(Some(&bad));
        std::fs::remove_file(&good).ok();
        std::fs::remove_file(&bad).ok();

        assert_eq!(loaded.unwrap().forums[0].control_thread, Some(42));
        assert!(matches!(rejected, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_forum_list_is_rejected() {
        let config = WardenConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_pattern_is_rejected() {
        let mut config = minimal();
        config.review.patterns.insert("contact".into(), "(unclosed".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_busy_hours_wrap_midnight() {
        let window = BusyHours { start: 22, end: 2 };
        assert!(window.contains(23));
        assert!(window.contains(1));
        assert!(!window.contains(2));
        assert!(!window.contains(12));

        let day = BusyHours { start: 18, end: 23 };
        assert!(day.contains(18));
        assert!(!day.contains(23));
    }

    #[test]
    fn test_operator_tiers_deserialize() {
        let forum: ForumConfig = serde_json::from_value(serde_json::json!({
            "name": "f",
            "operators": [{ "user_id": 7, "tier": "tier3" }]
        }))
        .unwrap();
        assert_eq!(forum.operators[0].tier, PermissionTier::Tier3);
    }
}
