//! Configuration management

use crate::obfuscation::{resolve_user_agent, BrowserProfile};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Fallback for any zero or missing HTTP period, in seconds
pub const DEFAULT_PERIOD_SECS: u64 = 30;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server base URL; request paths are replaced per exchange
    #[serde(default)]
    pub address: String,
    /// HTTP tunnel behaviour
    #[serde(default)]
    pub http: HttpConfig,
    /// User-Agent sent on every exchange (overrides `browser_profile`)
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Browser profile whose User-Agent is sent when `user_agent` is unset
    #[serde(default)]
    pub browser_profile: Option<String>,
    /// Auth frame key (base64, 32 bytes)
    #[serde(default)]
    pub auth_key: String,
    /// Transport client settings
    #[serde(default)]
    pub transport: TransportSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }

    /// User-Agent header value to present, if any
    pub fn effective_user_agent(&self) -> Result<Option<String>, crate::Error> {
        let profile = self
            .browser_profile
            .as_deref()
            .map(|p| p.parse::<BrowserProfile>())
            .transpose()
            .map_err(crate::Error::Config)?;
        Ok(resolve_user_agent(self.user_agent.as_deref(), profile))
    }
}

/// HTTP tunnel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Seconds a `read` waits for inbound data (0 = default)
    #[serde(default)]
    pub read_timeout: u64,
    /// Seconds an upload leg may live, also sent as the pull hold hint (0 = default)
    #[serde(default)]
    pub reconnect_period: u64,
    /// Stream writes through a long-lived upload leg instead of one POST per write
    #[serde(default)]
    pub chunk_push_enable: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_PERIOD_SECS,
            reconnect_period: DEFAULT_PERIOD_SECS,
            chunk_push_enable: false,
        }
    }
}

impl HttpConfig {
    /// Effective read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(or_default(self.read_timeout))
    }

    /// Effective upload leg lifetime
    pub fn reconnect_period(&self) -> Duration {
        Duration::from_secs(self.reconnect_period_secs())
    }

    /// Effective upload leg lifetime in whole seconds (pull hint header)
    pub fn reconnect_period_secs(&self) -> u64 {
        or_default(self.reconnect_period)
    }
}

fn or_default(secs: u64) -> u64 {
    if secs == 0 {
        DEFAULT_PERIOD_SECS
    } else {
        secs
    }
}

/// Settings for the shared HTTP client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// TCP keepalive interval in seconds (0 = disabled)
    pub keepalive_interval: u64,
    /// Idle pooled connections are dropped after this many seconds
    pub pool_idle_timeout: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            keepalive_interval: 30,
            pool_idle_timeout: 90,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        address: "http://127.0.0.1:8080".to_string(),
        http: HttpConfig {
            chunk_push_enable: true,
            ..HttpConfig::default()
        },
        browser_profile: Some("chrome".to_string()),
        ..Config::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_periods_fall_back_to_default() {
        let http = HttpConfig {
            read_timeout: 0,
            reconnect_period: 0,
            chunk_push_enable: false,
        };
        assert_eq!(http.read_timeout(), Duration::from_secs(30));
        assert_eq!(http.reconnect_period_secs(), 30);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            user_agent = "agent/1.0"

            [http]
            read_timeout = 5
            chunk_push_enable = true
            "#,
        )
        .unwrap();

        assert_eq!(config.http.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.http.reconnect_period(), Duration::from_secs(30));
        assert!(config.http.chunk_push_enable);
        assert_eq!(config.effective_user_agent().unwrap().as_deref(), Some("agent/1.0"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_example_config_roundtrips_through_toml() {
        let example = generate_example_config();
        let text = toml::to_string_pretty(&example).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert!(parsed.http.chunk_push_enable);
        assert_eq!(parsed.browser_profile.as_deref(), Some("chrome"));
        assert_eq!(parsed.address, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_bad_profile_is_config_error() {
        let config = Config {
            browser_profile: Some("lynx".to_string()),
            ..Config::default()
        };
        assert!(config.effective_user_agent().is_err());
    }
}
