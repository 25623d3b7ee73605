//! Server configuration.
//!
//! JSON file selected by the `HLS_SERVER_CONFIG` environment variable; if
//! unset, `hls-server.json` in the working directory is tried; if that is
//! also absent, compiled-in defaults apply. Mirrors the teacher's
//! struct-of-defaults `ServerConfig`, swapped from TOML to JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_ENV_VAR: &str = "HLS_SERVER_CONFIG";
const DEFAULT_CONFIG_FILENAME: &str = "hls-server.json";

/// On-disk HLS segment cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsCacheConfig {
    /// Cache root directory.
    pub path: PathBuf,

    /// Informational only; eviction is TTL-driven, not size-driven (§9).
    pub max_size_gb: Option<u64>,

    /// Segment TTL, in hours, consulted by the cleanup supervisor.
    pub segment_ttl_hours: u64,

    /// Target HLS segment duration in seconds.
    pub segment_duration: u64,
}

impl Default for HlsCacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/hls-cache"),
            max_size_gb: None,
            segment_ttl_hours: 24,
            segment_duration: 6,
        }
    }
}

/// Ambient bind-address settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// `FsCatalogue` media-root settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    pub root: PathBuf,
    pub thumbs_root: Option<PathBuf>,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/media"),
            thumbs_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Root configuration object, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub hls_cache: HlsCacheConfig,
    pub media: MediaSettings,
    pub logging: LoggingSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            hls_cache: HlsCacheConfig::default(),
            media: MediaSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Resolve configuration per §6: env var path, then default filename,
    /// then compiled-in defaults.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            tracing::info!(path = %path, "loading configuration from {}", CONFIG_ENV_VAR);
            return Self::from_file(&path);
        }
        if Path::new(DEFAULT_CONFIG_FILENAME).exists() {
            tracing::info!(path = DEFAULT_CONFIG_FILENAME, "loading default configuration file");
            return Self::from_file(DEFAULT_CONFIG_FILENAME);
        }
        tracing::info!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.hls_cache.segment_ttl_hours, 24);
        assert_eq!(config.hls_cache.segment_duration, 6);
    }

    #[test]
    fn socket_addr_formats_host_and_port() {
        let config = ServerConfig {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            ..Default::default()
        };
        assert_eq!(config.socket_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn round_trips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        let config = ServerConfig::default();
        config.to_file(path.to_str().unwrap()).unwrap();
        let loaded = ServerConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.server.port, config.server.port);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let json = r#"{"server": {"port": 9000}}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.hls_cache.segment_duration, 6);
    }
}
