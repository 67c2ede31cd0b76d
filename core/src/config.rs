//! Configuration module for CallWatch
//!
//! Handles loading, parsing, and saving of configuration files.
//! Default configuration path: `~/.callwatch/config.toml`

use crate::error::{ConfigError, CoreError};
use crate::server::ServerOptions;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Ports tried in order when no configuration overrides them
pub const DEFAULT_SERVER_PORTS: [u16; 3] = [59701, 59702, 59703];

/// Largest frame accepted by default (16 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const POLICY_FILE_NAME: &str = "api_policies.txt";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Monitor server settings
    pub server: ServerConfig,
    /// Policy engine settings
    pub policy: PolicyConfig,
    /// Diagnostic logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from default path (~/.callwatch/config.toml)
    pub fn load() -> Result<Self, CoreError> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        Ok(toml::from_str(content).map_err(ConfigError::ParseToml)?)
    }

    /// Get the base configuration directory path (~/.callwatch)
    fn config_base_dir() -> Result<PathBuf, CoreError> {
        dirs::home_dir()
            .ok_or(ConfigError::NoHomeDir)
            .map(|home| home.join(".callwatch"))
            .map_err(CoreError::Config)
    }

    /// Get default configuration file path
    pub fn default_path() -> Result<PathBuf, CoreError> {
        Self::config_base_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get default policy file path
    pub fn default_policy_path() -> Result<PathBuf, CoreError> {
        Self::config_base_dir().map(|dir| dir.join(POLICY_FILE_NAME))
    }

    /// Ensure configuration directory exists
    pub fn ensure_config_dir() -> Result<PathBuf, CoreError> {
        let config_dir = Self::config_base_dir()?;
        if !config_dir.exists() {
            std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::CreateDir {
                path: config_dir.clone(),
                source: e,
            })?;
        }
        Ok(config_dir)
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> Result<(), CoreError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::SerializeToml)?;
        std::fs::write(path, content).map_err(|e| ConfigError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

/// Monitor server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Candidate ports, tried strictly in order
    pub ports: Vec<u16>,
    /// Interface the listener binds to
    pub bind_address: IpAddr,
    /// Socket read timeout in milliseconds (unset = block forever)
    pub read_timeout_ms: Option<u64>,
    /// Largest accepted request frame
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ports: DEFAULT_SERVER_PORTS.to_vec(),
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            read_timeout_ms: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    /// Get read timeout duration, if one is configured
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Build the per-instance server options
    pub fn options(&self) -> ServerOptions {
        ServerOptions::default()
            .bind_address(self.bind_address)
            .read_timeout(self.read_timeout())
            .max_frame_bytes(self.max_frame_bytes)
    }
}

/// Policy engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Policy file path (default: ~/.callwatch/api_policies.txt)
    pub file: Option<PathBuf>,
}

impl PolicyConfig {
    /// Get effective policy file (custom or default)
    pub fn effective_file(&self) -> Result<PathBuf, CoreError> {
        match &self.file {
            Some(path) => Ok(path.clone()),
            None => Config::default_policy_path(),
        }
    }
}

/// Diagnostic logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter for the CLI logger (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.ports, vec![59701, 59702, 59703]);
        assert_eq!(config.server.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(config.server.read_timeout_ms.is_none());
        assert_eq!(config.server.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert!(config.policy.file.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_parse_toml() {
        let toml_content = r#"
[server]
ports = [40001, 40002]
bind_address = "0.0.0.0"
read_timeout_ms = 2500
max_frame_bytes = 4096

[policy]
file = "/data/local/tmp/api_policies.txt"

[logging]
level = "debug"
"#;

        let config = Config::from_toml(toml_content).unwrap();
        assert_eq!(config.server.ports, vec![40001, 40002]);
        assert_eq!(
            config.server.bind_address,
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
        assert_eq!(
            config.server.read_timeout(),
            Some(Duration::from_millis(2500))
        );
        assert_eq!(config.server.max_frame_bytes, 4096);
        assert_eq!(
            config.policy.file,
            Some(PathBuf::from("/data/local/tmp/api_policies.txt"))
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_config_partial_toml() {
        let toml_content = r#"
[server]
ports = [41000]
"#;

        let config = Config::from_toml(toml_content).unwrap();
        assert_eq!(config.server.ports, vec![41000]);
        // Other fields should have defaults
        assert_eq!(config.server.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_empty_toml() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.ports, DEFAULT_SERVER_PORTS.to_vec());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.server.ports = vec![45000, 45001];
        config.server.read_timeout_ms = Some(1000);
        config.policy.file = Some(temp_dir.path().join("policies.txt"));

        config.save(&config_path).unwrap();
        assert!(config_path.exists());

        let loaded = Config::load_from_path(&config_path).unwrap();
        assert_eq!(loaded.server.ports, vec![45000, 45001]);
        assert_eq!(loaded.server.read_timeout_ms, Some(1000));
        assert_eq!(loaded.policy.file, config.policy.file);
    }

    #[test]
    fn test_config_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = Config::load_from_path(&temp_dir.path().join("missing.toml"));
        assert!(matches!(
            result,
            Err(CoreError::Config(ConfigError::ReadFile { .. }))
        ));
    }

    #[test]
    fn test_server_options_from_config() {
        let config = ServerConfig {
            read_timeout_ms: Some(750),
            max_frame_bytes: 128,
            ..Default::default()
        };

        let options = config.options();
        assert_eq!(options.read_timeout, Some(Duration::from_millis(750)));
        assert_eq!(options.max_frame_bytes, 128);
        assert_eq!(options.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_policy_effective_file_custom() {
        let config = PolicyConfig {
            file: Some(PathBuf::from("/custom/policies.txt")),
        };
        assert_eq!(
            config.effective_file().unwrap(),
            PathBuf::from("/custom/policies.txt")
        );
    }

    #[test]
    fn test_policy_effective_file_default() {
        let config = PolicyConfig::default();
        let file = config.effective_file().unwrap();
        assert!(file.to_string_lossy().contains(".callwatch"));
        assert!(file.to_string_lossy().ends_with(POLICY_FILE_NAME));
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_toml("invalid { toml content");
        assert!(result.is_err());
    }
}
