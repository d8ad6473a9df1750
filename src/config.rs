//! TOML configuration for the ivrcall daemon.
//!
//! Layered model: compiled-in defaults, an optional TOML file, then
//! environment overrides for credentials. Telephony and each notification
//! channel count as configured only when all of their credentials are set.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "IVRCALL_CONFIG";

/// Standard system location for the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/ivrcall/ivrcall.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the ivrcall process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub telephony: TelephonyConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration from, in order:
    /// 1. `explicit` (the `--config` flag), which must load if given.
    /// 2. The path in `IVRCALL_CONFIG`.
    /// 3. `/etc/ivrcall/ivrcall.toml`.
    /// 4. Compiled-in defaults.
    ///
    /// Environment credential overrides are applied on top in every case.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(),
        };
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "IVRCALL_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Overlay credentials from the environment. `lookup` is injected so the
    /// override table can be tested without touching process state.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |slot: &mut Option<String>, key: &str| {
            if let Some(v) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = Some(v);
            }
        };

        set(&mut self.telephony.account_sid, "TWILIO_ACCOUNT_SID");
        set(&mut self.telephony.auth_token, "TWILIO_AUTH_TOKEN");
        set(&mut self.telephony.from_number, "TWILIO_PHONE_NUMBER");

        set(&mut self.notify.email.api_url, "SMTP_HOST");
        set(&mut self.notify.email.username, "SMTP_USERNAME");
        set(&mut self.notify.email.password, "SMTP_PASSWORD");
        set(&mut self.notify.email.from_address, "EMAIL_FROM_ADDRESS");

        set(&mut self.notify.sms.account_id, "SMS_ACCOUNT_ID");
        set(&mut self.notify.sms.auth_token, "SMS_AUTH_TOKEN");
        set(&mut self.notify.sms.from_number, "SMS_FROM_NUMBER");

        set(&mut self.notify.chat.webhook_url, "SLACK_WEBHOOK_URL");
        if let Some(channel) = lookup("SLACK_CHANNEL").filter(|v| !v.is_empty()) {
            self.notify.chat.channel = channel;
        }
    }
}

// ---------------------------------------------------------------------------
// Server / database
// ---------------------------------------------------------------------------

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the API listens on.
    pub bind: String,
    /// Externally reachable origin used to build provider callback URLs,
    /// e.g. `https://ivr.example.com`.
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
        }
    }
}

/// SQLite location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/ivrcall.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Telephony
// ---------------------------------------------------------------------------

/// Voice provider credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelephonyConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    /// Caller ID used for outbound test calls.
    pub from_number: Option<String>,
    /// Base of the REST API (calls, recordings).
    pub api_base_url: String,
    /// Base of the voice insights API (quality metrics).
    pub insights_base_url: String,
    /// Ring timeout used when a test case does not specify one.
    pub default_timeout_secs: u32,
    /// Per-request HTTP timeout against the provider.
    pub request_timeout_secs: u64,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            from_number: None,
            api_base_url: "https://api.twilio.com".to_string(),
            insights_base_url: "https://insights.twilio.com".to_string(),
            default_timeout_secs: 30,
            request_timeout_secs: 15,
        }
    }
}

/// Complete provider credentials, present only when every field is set.
#[derive(Debug, Clone)]
pub struct TelephonyCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

impl TelephonyConfig {
    pub fn credentials(&self) -> Option<TelephonyCredentials> {
        Some(TelephonyCredentials {
            account_sid: non_empty(&self.account_sid)?,
            auth_token: non_empty(&self.auth_token)?,
            from_number: non_empty(&self.from_number)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Reconcile
// ---------------------------------------------------------------------------

/// Callback reconciliation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Delay before polling quality metrics after a completed call.
    pub quality_poll_delay_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            quality_poll_delay_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Notify
// ---------------------------------------------------------------------------

/// Outbound notification transports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Mail relay reached over HTTP with basic auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub api_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            username: None,
            password: None,
            from_address: Some("noreply@ivrtesting.com".to_string()),
        }
    }
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        non_empty(&self.api_url).is_some()
            && non_empty(&self.username).is_some()
            && non_empty(&self.password).is_some()
    }
}

/// SMS provider account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    pub account_id: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    pub api_base_url: String,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            account_id: None,
            auth_token: None,
            from_number: None,
            api_base_url: "https://api.twilio.com".to_string(),
        }
    }
}

impl SmsConfig {
    pub fn is_configured(&self) -> bool {
        non_empty(&self.account_id).is_some() && non_empty(&self.auth_token).is_some()
    }
}

/// Chat incoming-webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub webhook_url: Option<String>,
    pub channel: String,
    pub username: String,
    pub icon_emoji: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            channel: "#ivr-notifications".to_string(),
            username: "IVR Bot".to_string(),
            icon_emoji: ":telephone_receiver:".to_string(),
        }
    }
}

impl ChatConfig {
    pub fn is_configured(&self) -> bool {
        non_empty(&self.webhook_url).is_some()
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Static bearer tokens mapped to user ids. Empty means no verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: HashMap<String, i64>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// `text` or `json`.
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_ref().filter(|s| !s.trim().is_empty()).cloned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.database.path, PathBuf::from("data/ivrcall.db"));
        assert!(cfg.telephony.credentials().is_none());
        assert_eq!(cfg.telephony.default_timeout_secs, 30);
        assert_eq!(cfg.reconcile.quality_poll_delay_secs, 5);
        assert!(!cfg.notify.email.is_configured());
        assert!(!cfg.notify.sms.is_configured());
        assert!(!cfg.notify.chat.is_configured());
        assert_eq!(cfg.notify.chat.channel, "#ivr-notifications");
        assert!(cfg.auth.tokens.is_empty());
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[server]
bind = "127.0.0.1:9000"
public_base_url = "https://ivr.example.com"

[telephony]
account_sid = "AC123"
auth_token = "secret"
from_number = "+15550000000"

[reconcile]
quality_poll_delay_secs = 1

[notify.chat]
webhook_url = "https://hooks.example.com/T000"

[auth.tokens]
"tok-alice" = 7

[logging]
level = "debug"
format = "json"
"#;

        let cfg: AppConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
        assert_eq!(cfg.server.public_base_url, "https://ivr.example.com");
        let creds = cfg.telephony.credentials().unwrap();
        assert_eq!(creds.account_sid, "AC123");
        assert_eq!(creds.from_number, "+15550000000");
        assert_eq!(cfg.reconcile.quality_poll_delay_secs, 1);
        assert!(cfg.notify.chat.is_configured());
        assert_eq!(cfg.notify.chat.username, "IVR Bot");
        assert_eq!(cfg.auth.tokens.get("tok-alice"), Some(&7));
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_partial_telephony_is_not_configured() {
        let cfg: AppConfig = toml::from_str(
            r#"
[telephony]
account_sid = "AC123"
auth_token = ""
"#,
        )
        .unwrap();
        assert!(cfg.telephony.credentials().is_none());
    }

    #[test]
    fn test_env_overrides_fill_credentials() {
        let mut cfg = AppConfig::default();
        let env: HashMap<&str, &str> = [
            ("TWILIO_ACCOUNT_SID", "ACenv"),
            ("TWILIO_AUTH_TOKEN", "tok"),
            ("TWILIO_PHONE_NUMBER", "+15551112222"),
            ("SMS_ACCOUNT_ID", "sms-id"),
            ("SMS_AUTH_TOKEN", "sms-tok"),
            ("SLACK_WEBHOOK_URL", ""),
        ]
        .into_iter()
        .collect();

        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.telephony.credentials().unwrap().account_sid, "ACenv");
        assert!(cfg.notify.sms.is_configured());
        // Empty values never count as configured.
        assert!(!cfg.notify.chat.is_configured());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ivrcall.toml");
        std::fs::write(
            &path,
            r#"
[database]
path = "/tmp/ivr.db"
"#,
        )
        .unwrap();

        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.database.path, PathBuf::from("/tmp/ivr.db"));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = AppConfig::load(Path::new("/nonexistent/path/ivrcall.toml"));
        assert!(result.is_err());
    }
}
