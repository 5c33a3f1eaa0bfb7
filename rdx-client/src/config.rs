//! Client configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the headless client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address and security.
    pub server: ServerConfig,
    /// Credentials for network-level authentication.
    pub auth: AuthConfig,
    /// Requested desktop geometry.
    pub display: DisplayConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server hostname or IP.
    pub host: String,
    /// RDP port.
    pub port: u16,
}

/// Credentials. The password may also come from the CLI to keep it out
/// of config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub domain: String,
    pub username: String,
    pub password: String,
}

/// Display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Requested desktop width.
    pub width: u16,
    /// Requested desktop height.
    pub height: u16,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            display: DisplayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3389,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = ClientConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("host"));
        assert!(text.contains("width"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = ClientConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.port, 3389);
        assert_eq!(parsed.display.width, 1280);
    }
}
