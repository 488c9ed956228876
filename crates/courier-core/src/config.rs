//! Process-wide configuration: everything that is not per-channel. Per the
//! teacher's convention, secrets may be given either as a literal value or as
//! the name of an environment variable to read at resolve-time.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CourierError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub secrets: ProcessSecrets,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Domain name used when generating callback URLs handed back to
    /// providers (e.g. attachment proxy links).
    #[serde(default)]
    pub domain: Option<String>,

    /// Outbound dispatcher worker pool size.
    #[serde(default = "default_workers")]
    pub dispatch_workers: usize,

    /// Default timeout for outbound HTTP calls, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Dedupe window for inbound external-ids, in seconds.
    #[serde(default = "default_dedupe_window_secs")]
    pub dedupe_window_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    8
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_dedupe_window_secs() -> u64 {
    24 * 60 * 60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            domain: None,
            dispatch_workers: default_workers(),
            http_timeout_secs: default_http_timeout_secs(),
            dedupe_window_secs: default_dedupe_window_secs(),
        }
    }
}

/// Process-wide secrets, shared across every channel of a given type rather
/// than configured per-channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessSecrets {
    #[serde(default)]
    pub facebook_application_secret: Option<String>,
    #[serde(default)]
    pub facebook_application_secret_env: Option<String>,

    #[serde(default)]
    pub facebook_webhook_secret: Option<String>,
    #[serde(default)]
    pub facebook_webhook_secret_env: Option<String>,

    #[serde(default)]
    pub whatsapp_admin_system_user_token: Option<String>,
    #[serde(default)]
    pub whatsapp_admin_system_user_token_env: Option<String>,
}

impl ProcessSecrets {
    pub fn resolve_facebook_application_secret(&self) -> Option<String> {
        resolve_secret_field(
            &self.facebook_application_secret,
            &self.facebook_application_secret_env,
        )
    }

    pub fn resolve_facebook_webhook_secret(&self) -> Option<String> {
        resolve_secret_field(
            &self.facebook_webhook_secret,
            &self.facebook_webhook_secret_env,
        )
    }

    pub fn resolve_whatsapp_admin_system_user_token(&self) -> Option<String> {
        resolve_secret_field(
            &self.whatsapp_admin_system_user_token,
            &self.whatsapp_admin_system_user_token_env,
        )
    }

    /// All non-trivial (>= 6 char) process secrets, for log redaction.
    pub fn redaction_values(&self) -> Vec<String> {
        [
            self.resolve_facebook_application_secret(),
            self.resolve_facebook_webhook_secret(),
            self.resolve_whatsapp_admin_system_user_token(),
        ]
        .into_iter()
        .flatten()
        .filter(|v| v.len() >= 6)
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve a secret: check the direct value first, then the named
/// environment variable.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

impl Config {
    /// Load config from a TOML file; falls back to defaults if the file does
    /// not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(CourierError::Io)?;
        toml::from_str(&raw).map_err(|e| CourierError::Config(e.to_string()))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8080");
        assert_eq!(cfg.server.dispatch_workers, 8);
    }

    #[test]
    fn resolve_secret_prefers_direct_value() {
        let secrets = ProcessSecrets {
            facebook_application_secret: Some("direct-secret".into()),
            facebook_application_secret_env: Some("COURIER_TEST_FB_SECRET_UNSET".into()),
            ..Default::default()
        };
        assert_eq!(
            secrets.resolve_facebook_application_secret(),
            Some("direct-secret".into())
        );
    }

    #[test]
    fn redaction_values_filters_short_secrets() {
        let secrets = ProcessSecrets {
            whatsapp_admin_system_user_token: Some("abc".into()),
            facebook_webhook_secret: Some("a-real-secret-value".into()),
            ..Default::default()
        };
        let values = secrets.redaction_values();
        assert!(!values.iter().any(|v| v == "abc"));
        assert!(values.iter().any(|v| v == "a-real-secret-value"));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/path/courier.toml")).unwrap();
        assert_eq!(cfg.server.port, 8080);
    }
}
