//! Configuration loading and persistence.
//!
//! Reads `config.json` from the configuration directory and applies
//! `REPORTCAST_*` environment overrides on top. The bearer credential is not
//! part of the file; it lives in the credential store (see
//! [`crate::credentials`]).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::constants;

/// Name of the configuration file inside the config directory.
const CONFIG_FILE: &str = "config.json";

/// URL scheme the broker is reached with.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain `ws://` transport.
    Http,
    /// TLS `wss://` transport.
    Https,
}

impl Scheme {
    /// WebSocket scheme matching this HTTP scheme.
    #[must_use]
    pub fn ws(self) -> &'static str {
        match self {
            Self::Http => "ws",
            Self::Https => "wss",
        }
    }
}

/// Realtime broker connection parameters, consumed once per connect.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Transport scheme.
    pub scheme: Scheme,
    /// Public application key.
    pub app_key: String,
    /// Private-channel authorization endpoint. Either an absolute URL or a
    /// path resolved against [`Config::api_url`].
    pub auth_endpoint: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            scheme: Scheme::Http,
            app_key: String::new(),
            auth_endpoint: "/broadcasting/auth".to_string(),
        }
    }
}

/// Number formatting used when composing notification text.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LocaleConfig {
    /// Digit group separator (`1,500` vs `1.500`).
    pub thousands_separator: char,
    /// Appended to wallet amounts, separated by a space.
    pub currency_suffix: String,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            thousands_separator: ',',
            currency_suffix: "credits".to_string(),
        }
    }
}

/// Configuration for the reportcast client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the REST API.
    pub api_url: String,
    /// Broker parameters.
    pub broker: BrokerConfig,
    /// Feature flag gating the realtime connection.
    pub realtime_enabled: bool,
    /// Namespace for high-level event names.
    pub event_namespace: String,
    /// Identity of the signed-in user, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Number formatting for notification text.
    pub locale: LocaleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/api".to_string(),
            broker: BrokerConfig::default(),
            realtime_enabled: true,
            event_namespace: constants::DEFAULT_EVENT_NAMESPACE.to_string(),
            user_id: None,
            locale: LocaleConfig::default(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `REPORTCAST_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("REPORTCAST_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("reportcast")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from the default directory with env overrides.
    pub fn load() -> Result<Self> {
        Self::load_from_dir(&Self::config_dir()?)
    }

    /// Loads configuration from `dir`, falling back to defaults when the
    /// file is absent, then applies env overrides.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("invalid config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_url) = lookup("REPORTCAST_API_URL") {
            self.api_url = api_url;
        }
        if let Some(host) = lookup("REPORTCAST_BROKER_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = lookup("REPORTCAST_BROKER_PORT") {
            match port.parse() {
                Ok(port) => self.broker.port = port,
                Err(_) => log::warn!("Ignoring invalid REPORTCAST_BROKER_PORT={}", port),
            }
        }
        if let Some(scheme) = lookup("REPORTCAST_BROKER_SCHEME") {
            match scheme.as_str() {
                "http" | "ws" => self.broker.scheme = Scheme::Http,
                "https" | "wss" => self.broker.scheme = Scheme::Https,
                other => log::warn!("Ignoring invalid REPORTCAST_BROKER_SCHEME={}", other),
            }
        }
        if let Some(key) = lookup("REPORTCAST_APP_KEY") {
            self.broker.app_key = key;
        }
        if let Some(endpoint) = lookup("REPORTCAST_AUTH_ENDPOINT") {
            self.broker.auth_endpoint = endpoint;
        }
        if let Some(enabled) = lookup("REPORTCAST_REALTIME") {
            self.realtime_enabled = !matches!(enabled.as_str(), "0" | "false" | "off");
        }
        if let Some(user_id) = lookup("REPORTCAST_USER_ID") {
            self.user_id = Some(user_id).filter(|id| !id.is_empty());
        }
    }

    /// Persists the configuration to the default directory.
    pub fn save(&self) -> Result<()> {
        self.save_to_dir(&Self::config_dir()?)
    }

    /// Persists the configuration to `dir`.
    pub fn save_to_dir(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Absolute URL of the private-channel authorization endpoint.
    #[must_use]
    pub fn auth_url(&self) -> String {
        let endpoint = &self.broker.auth_endpoint;
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.clone()
        } else {
            format!(
                "{}/{}",
                self.api_url.trim_end_matches('/'),
                endpoint.trim_start_matches('/')
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.broker.auth_endpoint, "/broadcasting/auth");
        assert!(config.realtime_enabled);
    }

    #[test]
    fn test_save_then_load_preserves_broker() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.broker.host = "ws.example.com".to_string();
        config.broker.scheme = Scheme::Https;
        config.broker.port = 443;
        config.save_to_dir(dir.path()).unwrap();

        let loaded = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(loaded.broker, config.broker);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"broker": {"app_key": "abc"}}"#,
        )
        .unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.broker.app_key, "abc");
        assert_eq!(config.broker.port, 8080);
        assert_eq!(config.locale.thousands_separator, ',');
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("REPORTCAST_BROKER_PORT", "6001"),
            ("REPORTCAST_BROKER_SCHEME", "wss"),
            ("REPORTCAST_REALTIME", "off"),
            ("REPORTCAST_USER_ID", "17"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.broker.port, 6001);
        assert_eq!(config.broker.scheme, Scheme::Https);
        assert!(!config.realtime_enabled);
        assert_eq!(config.user_id.as_deref(), Some("17"));
    }

    #[test]
    fn test_invalid_port_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| {
            (key == "REPORTCAST_BROKER_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(config.broker.port, 8080);
    }

    #[test]
    fn test_auth_url_relative_and_absolute() {
        let mut config = Config::default();
        config.api_url = "https://api.example.com/api/".to_string();
        assert_eq!(
            config.auth_url(),
            "https://api.example.com/api/broadcasting/auth"
        );

        config.broker.auth_endpoint = "https://auth.example.com/pusher".to_string();
        assert_eq!(config.auth_url(), "https://auth.example.com/pusher");
    }
}
