mod observability;

pub use observability::ObservabilityConfig;

use crate::error::ConfigError;
use crate::queue::retry::RetryBackoff;
use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub queue: QueueConfig,

    /// Mail relay for escalation alerts; alerts are only logged when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpConfig>,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Upload queue ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Scoring API endpoint batches are POSTed to (required)
    #[serde(default)]
    pub endpoint: String,
    /// Max estimated size of one batch in bytes (default: 4,000,000)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u64,
    /// Flush interval for partially filled batches, and the fixed retry delay (default: 30,000)
    #[serde(default = "default_wait_time_ms")]
    pub wait_time_ms: u64,
    /// Send attempts per batch before escalating (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Comma-separated alert recipients
    #[serde(default)]
    pub error_email_recipients: String,
    /// Per-request HTTP timeout (default: 30)
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// "fixed" (default) or "exponential"
    #[serde(default)]
    pub retry_backoff: RetryBackoff,
    /// Upper bound for exponential retry delays (default: 300,000)
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

fn default_max_batch_size() -> u64 {
    4_000_000
}

fn default_wait_time_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_max_retry_delay_ms() -> u64 {
    300_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            max_batch_size: default_max_batch_size(),
            wait_time_ms: default_wait_time_ms(),
            max_retries: default_max_retries(),
            error_email_recipients: String::new(),
            send_timeout_secs: default_send_timeout_secs(),
            retry_backoff: RetryBackoff::default(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

impl QueueConfig {
    /// Recipient list parsed from the comma-separated setting.
    pub fn recipients(&self) -> Vec<String> {
        self.error_email_recipients
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn max_batch_bytes(&self) -> usize {
        usize::try_from(self.max_batch_size).unwrap_or(usize::MAX)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        if self.endpoint.trim().is_empty() {
            return invalid("queue.endpoint is required".into());
        }
        match url::Url::parse(&self.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return invalid(format!(
                    "queue.endpoint must use http or https, got {}",
                    url.scheme()
                ));
            }
            Err(e) => return invalid(format!("queue.endpoint is not a valid URL: {e}")),
        }
        if self.max_batch_size == 0 {
            return invalid("queue.max_batch_size must be > 0".into());
        }
        if self.wait_time_ms == 0 {
            return invalid("queue.wait_time_ms must be > 0".into());
        }
        if self.max_retries == 0 {
            return invalid("queue.max_retries must be >= 1".into());
        }
        if self.send_timeout_secs == 0 {
            return invalid("queue.send_timeout_secs must be > 0".into());
        }
        for recipient in self.recipients() {
            if let Some(reason) = address_error(&recipient) {
                return invalid(format!(
                    "queue.error_email_recipients contains an invalid address {recipient}: {reason}"
                ));
            }
        }
        Ok(())
    }
}

/// Why `address` is not a usable mailbox, if it is not.
#[cfg(feature = "email")]
fn address_error(address: &str) -> Option<String> {
    address
        .parse::<lettre::message::Mailbox>()
        .err()
        .map(|e| e.to_string())
}

// Without mail delivery, addresses only appear in logged alerts.
#[cfg(not(feature = "email"))]
fn address_error(_address: &str) -> Option<String> {
    None
}

// ── SMTP (escalation mail) ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    #[default]
    Starttls,
    Tls,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    /// SMTP port (default: 587)
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Sender address of alert mails
    pub from: String,
    #[serde(default)]
    pub security: SmtpSecurity,
    #[serde(default = "default_smtp_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout_secs() -> u64 {
    30
}

impl SmtpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation("smtp.host is required".into()));
        }
        if let Some(reason) = address_error(self.from.trim()) {
            return Err(ConfigError::Validation(format!(
                "smtp.from is not a valid address {}: {reason}",
                self.from
            )));
        }
        Ok(())
    }
}

// ── Service supervision ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// How often the watchdog checks the upload worker (default: 30)
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
}

fn default_watchdog_interval_secs() -> u64 {
    30
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            watchdog_interval_secs: default_watchdog_interval_secs(),
        }
    }
}

impl ServiceConfig {
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            queue: QueueConfig::default(),
            smtp: None,
            service: ServiceConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

fn default_config_path() -> PathBuf {
    let home = UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
    home.join(".scorerelay").join("config.toml")
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Load `~/.scorerelay/config.toml`, writing a default file on first run.
    pub fn load_or_init() -> Result<Self> {
        let config_path = default_config_path();
        if config_path.exists() {
            return Self::load_from_path(&config_path);
        }

        let config = Self {
            config_path,
            ..Self::default()
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.config_path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = get("SCORERELAY_ENDPOINT") {
            self.queue.endpoint = endpoint;
        }
        if let Some(recipients) = get("SCORERELAY_ERROR_EMAIL_RECIPIENTS") {
            self.queue.error_email_recipients = recipients;
        }
        override_number(&get, "SCORERELAY_MAX_BATCH_SIZE", &mut self.queue.max_batch_size);
        override_number(&get, "SCORERELAY_WAIT_TIME_MS", &mut self.queue.wait_time_ms);
        override_number(&get, "SCORERELAY_MAX_RETRIES", &mut self.queue.max_retries);
        override_number(
            &get,
            "SCORERELAY_SEND_TIMEOUT_SECS",
            &mut self.queue.send_timeout_secs,
        );
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.queue.validate()?;
        if let Some(smtp) = &self.smtp {
            smtp.validate()?;
        }
        Ok(())
    }
}

fn override_number<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = get(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring non-numeric override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_queue() -> QueueConfig {
        QueueConfig {
            endpoint: "https://scores.example/api/batch".into(),
            ..QueueConfig::default()
        }
    }

    // ── Defaults ─────────────────────────────────────────────

    #[test]
    fn queue_defaults_match_documented_values() {
        let q = QueueConfig::default();
        assert_eq!(q.max_batch_size, 4_000_000);
        assert_eq!(q.wait_time(), Duration::from_secs(30));
        assert_eq!(q.max_retries, 3);
        assert!(q.recipients().is_empty());
        assert_eq!(q.retry_backoff, RetryBackoff::Fixed);
    }

    #[test]
    fn config_default_path_ends_in_config_toml() {
        let c = Config::default();
        assert!(c.config_path.ends_with(".scorerelay/config.toml"));
        assert!(c.smtp.is_none());
        assert_eq!(c.observability.backend, "none");
    }

    // ── Parsing ──────────────────────────────────────────────

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [queue]
            endpoint = "http://localhost:8080/scores"
            max_retries = 5
            error_email_recipients = "some.email@example.com, another.email@example.com"

            [smtp]
            host = "mail.example.com"
            from = "relay@example.com"
            security = "tls"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.queue.wait_time_ms, 30_000);
        assert_eq!(
            config.queue.recipients(),
            ["some.email@example.com", "another.email@example.com"]
        );
        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.security, SmtpSecurity::Tls);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            config_path: dir.path().join("nested").join("config.toml"),
            queue: valid_queue(),
            ..Config::default()
        };
        config.save().unwrap();

        let loaded = Config::load_from_path(&config.config_path).unwrap();
        assert_eq!(loaded.queue.endpoint, config.queue.endpoint);
        assert_eq!(loaded.config_path, config.config_path);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load_from_path(Path::new("/nonexistent/scorerelay.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    // ── Validation ───────────────────────────────────────────

    #[test]
    fn validate_accepts_minimal_queue() {
        assert!(valid_queue().validate().is_ok());
    }

    #[test]
    fn validate_requires_endpoint() {
        let err = QueueConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("queue.endpoint is required"));
    }

    #[test]
    fn validate_rejects_non_http_endpoint() {
        let q = QueueConfig {
            endpoint: "ftp://scores.example/upload".into(),
            ..QueueConfig::default()
        };
        assert!(q.validate().unwrap_err().to_string().contains("http or https"));
    }

    #[test]
    fn validate_rejects_zero_retries() {
        let q = QueueConfig {
            max_retries: 0,
            ..valid_queue()
        };
        assert!(q.validate().is_err());
    }

    #[cfg(feature = "email")]
    #[test]
    fn validate_parses_recipients_as_mailboxes() {
        let q = QueueConfig {
            error_email_recipients: "Ops <ops@example.com>, web@example.com".into(),
            ..valid_queue()
        };
        q.validate().unwrap();

        let q = QueueConfig {
            error_email_recipients: "ops@example.com,not-an-address".into(),
            ..valid_queue()
        };
        assert!(
            q.validate()
                .unwrap_err()
                .to_string()
                .contains("not-an-address")
        );
    }

    #[cfg(feature = "email")]
    #[test]
    fn validate_checks_smtp_sender() {
        let config = Config {
            queue: valid_queue(),
            smtp: Some(SmtpConfig {
                host: "mail.example.com".into(),
                port: 25,
                username: None,
                password: None,
                from: "relay".into(),
                security: SmtpSecurity::None,
                timeout_secs: 10,
            }),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    // ── Overrides ────────────────────────────────────────────

    #[test]
    fn overrides_replace_queue_settings() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SCORERELAY_ENDPOINT", "http://override.example/scores"),
            ("SCORERELAY_MAX_RETRIES", "7"),
            ("SCORERELAY_WAIT_TIME_MS", "not-a-number"),
            ("SCORERELAY_ERROR_EMAIL_RECIPIENTS", ""),
        ]);
        let mut config = Config {
            queue: QueueConfig {
                error_email_recipients: "ops@example.com".into(),
                ..valid_queue()
            },
            ..Config::default()
        };
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.queue.endpoint, "http://override.example/scores");
        assert_eq!(config.queue.max_retries, 7);
        assert_eq!(config.queue.wait_time_ms, 30_000);
        assert_eq!(config.queue.error_email_recipients, "ops@example.com");
    }
}
