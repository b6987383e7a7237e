//! Hub configuration
//!
//! Values come from the built-in defaults, optionally overridden by a JSON
//! file and then by `SOCKET_HUB_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{HubError, HubResult};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "SOCKET_HUB_";

/// Configuration for one hub instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Address of the WebSocket listener
    pub bind_addr: String,
    /// Address of the admin HTTP listener (disabled when unset)
    pub admin_addr: Option<String>,
    /// Largest frame or reassembled message accepted, in bytes
    pub max_message_size: usize,
    /// Connection cap enforced at upgrade time
    pub max_connections: usize,
    /// Largest upgrade request head accepted, in bytes
    pub max_header_size: usize,
    /// Outbound messages queued per connection before sends fail
    pub max_send_queue: usize,
    /// Upgrade requests must be resolved within this window
    pub handshake_timeout_ms: u64,
    /// Silence before a heartbeat PING is sent (0 disables heartbeats)
    pub idle_timeout_ms: u64,
    /// Silence tolerated after the heartbeat PING before closing with 1001
    pub ping_grace_ms: u64,
    /// Time the peer has to answer our CLOSE
    pub close_timeout_ms: u64,
    /// Sub-protocols the server speaks
    pub supported_protocols: Vec<String>,
    /// Origin allow-list; any origin is accepted when unset
    pub allowed_origins: Option<Vec<String>>,
    /// Close with 1011 when a handler fails
    pub close_on_handler_error: bool,
    /// Remove rooms once their last member leaves
    pub delete_empty_rooms: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9001".to_string(),
            admin_addr: None,
            max_message_size: 1024 * 1024,
            max_connections: 10_000,
            max_header_size: 8 * 1024,
            max_send_queue: 256,
            handshake_timeout_ms: 10_000,
            idle_timeout_ms: 30_000,
            ping_grace_ms: 10_000,
            close_timeout_ms: 5_000,
            supported_protocols: Vec::new(),
            allowed_origins: None,
            close_on_handler_error: true,
            delete_empty_rooms: true,
        }
    }
}

impl HubConfig {
    /// Load a JSON config file; missing fields keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> HubResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: HubConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SOCKET_HUB_*` overrides from the process environment
    pub fn apply_env(self) -> HubResult<Self> {
        self.apply_vars(std::env::vars())
    }

    /// Apply overrides from `(name, value)` pairs; unknown names are ignored
    pub fn apply_vars<I>(mut self, vars: I) -> HubResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match key {
                "BIND_ADDR" => self.bind_addr = value,
                "ADMIN_ADDR" => self.admin_addr = non_empty(&value),
                "MAX_MESSAGE_SIZE" => self.max_message_size = parse_num(&name, &value)?,
                "MAX_CONNECTIONS" => self.max_connections = parse_num(&name, &value)?,
                "MAX_HEADER_SIZE" => self.max_header_size = parse_num(&name, &value)?,
                "MAX_SEND_QUEUE" => self.max_send_queue = parse_num(&name, &value)?,
                "HANDSHAKE_TIMEOUT_MS" => self.handshake_timeout_ms = parse_num(&name, &value)?,
                "IDLE_TIMEOUT_MS" => self.idle_timeout_ms = parse_num(&name, &value)?,
                "PING_GRACE_MS" => self.ping_grace_ms = parse_num(&name, &value)?,
                "CLOSE_TIMEOUT_MS" => self.close_timeout_ms = parse_num(&name, &value)?,
                "SUPPORTED_PROTOCOLS" => self.supported_protocols = split_list(&value),
                "ALLOWED_ORIGINS" => {
                    let origins = split_list(&value);
                    self.allowed_origins = (!origins.is_empty()).then_some(origins);
                }
                "CLOSE_ON_HANDLER_ERROR" => self.close_on_handler_error = parse_bool(&name, &value)?,
                "DELETE_EMPTY_ROOMS" => self.delete_empty_rooms = parse_bool(&name, &value)?,
                _ => {}
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the hub cannot run with
    pub fn validate(&self) -> HubResult<()> {
        if self.max_message_size == 0 {
            return Err(HubError::Config("max_message_size must be positive".into()));
        }
        if self.max_connections == 0 {
            return Err(HubError::Config("max_connections must be positive".into()));
        }
        if self.max_send_queue == 0 {
            return Err(HubError::Config("max_send_queue must be positive".into()));
        }
        if self.max_header_size < 64 {
            return Err(HubError::Config("max_header_size must be at least 64".into()));
        }
        if self.handshake_timeout_ms == 0 || self.close_timeout_ms == 0 {
            return Err(HubError::Config("timeouts must be positive".into()));
        }
        if self.idle_timeout_ms > 0 && self.ping_grace_ms == 0 {
            return Err(HubError::Config(
                "ping_grace_ms must be positive when heartbeats are enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// `None` when heartbeats are disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    pub fn ping_grace(&self) -> Duration {
        Duration::from_millis(self.ping_grace_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> HubResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| HubError::Config(format!("{name}: expected a number, got {value:?}")))
}

fn parse_bool(name: &str, value: &str) -> HubResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(HubError::Config(format!("{name}: expected a boolean, got {value:?}"))),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_from_file_keeps_missing_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"max_message_size": 4096, "supported_protocols": ["chat.v1"]}}"#
        )
        .unwrap();

        let config = HubConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_message_size, 4096);
        assert_eq!(config.supported_protocols, vec!["chat.v1".to_string()]);
        assert_eq!(config.max_connections, HubConfig::default().max_connections);
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_connections": 0}}"#).unwrap();
        assert!(matches!(
            HubConfig::from_file(file.path()),
            Err(HubError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let config = HubConfig::default()
            .apply_vars(vars(&[
                ("SOCKET_HUB_BIND_ADDR", "0.0.0.0:8080"),
                ("SOCKET_HUB_IDLE_TIMEOUT_MS", "0"),
                ("SOCKET_HUB_ALLOWED_ORIGINS", "https://a.example, https://b.example"),
                ("SOCKET_HUB_DELETE_EMPTY_ROOMS", "false"),
                ("UNRELATED", "ignored"),
            ]))
            .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(
            config.allowed_origins,
            Some(vec!["https://a.example".to_string(), "https://b.example".to_string()])
        );
        assert!(!config.delete_empty_rooms);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let result = HubConfig::default()
            .apply_vars(vars(&[("SOCKET_HUB_MAX_SEND_QUEUE", "lots")]));
        assert!(matches!(result, Err(HubError::Config(_))));
    }
}
