//! Configuration module
//!
//! Handles loading domainwire node configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network;
use crate::protocol::{
    CodecConfig, TypeResolver, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_OBJECT_SIZE, DEFAULT_PORT,
    DEFAULT_STREAM_QUEUE_CAPACITY,
};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Listener and client connection settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Wire encoding limits
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Deployment content storage
    #[serde(default)]
    pub content: ContentConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Name this node registers its host controller under
    pub node_name: String,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            node_name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "localhost".to_string()),
            verbose: false,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind to (default: all)
    pub bind_address: Option<String>,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Keep one client connection open across requests
    #[serde(default)]
    pub reuse_connections: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: None,
            connect_timeout_ms: default_connect_timeout(),
            reuse_connections: false,
        }
    }
}

/// Protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Bytes per chunk when sending deployment content
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Streamed plan items buffered between executor and connection
    #[serde(default = "default_stream_queue_capacity")]
    pub stream_queue_capacity: usize,
    /// Largest encoded object accepted from a peer
    #[serde(default = "default_max_object_size")]
    pub max_object_size: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_stream_queue_capacity() -> usize {
    DEFAULT_STREAM_QUEUE_CAPACITY
}

fn default_max_object_size() -> usize {
    DEFAULT_MAX_OBJECT_SIZE
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            stream_queue_capacity: default_stream_queue_capacity(),
            max_object_size: default_max_object_size(),
        }
    }
}

/// Content repository configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Directory for stored deployment content (in memory if not set)
    pub repository_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("domainwire/config.toml")),
            Some(PathBuf::from("./domainwire.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Reject limits the protocol cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.protocol.chunk_size == 0 || self.protocol.chunk_size > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "chunk_size must be between 1 and {}",
                u32::MAX
            )));
        }
        if self.protocol.stream_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "stream_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.protocol.max_object_size == 0 {
            return Err(ConfigError::Invalid(
                "max_object_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Listener and client settings for the network layer
    pub fn network_config(&self) -> network::NetworkConfig {
        let mut config = network::NetworkConfig::new(self.network.port)
            .with_reuse(self.network.reuse_connections);
        if let Some(address) = &self.network.bind_address {
            config = config.with_bind_address(address.clone());
        }
        config.connect_timeout_ms = self.network.connect_timeout_ms;
        config
    }

    pub fn codec_config(&self) -> CodecConfig {
        CodecConfig::new(TypeResolver::protocol_types(), self.protocol.max_object_size)
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            node_name: "domain-controller".to_string(),
            verbose: false,
        },
        network: NetworkConfig {
            bind_address: Some("0.0.0.0".to_string()),
            ..Default::default()
        },
        content: ContentConfig {
            repository_dir: Some(PathBuf::from("/var/lib/domainwire/content")),
        },
        ..Default::default()
    };

    let body = toml::to_string_pretty(&config)?;
    Ok(format!(
        "# domainwire node configuration\n\
         # Search order: $CONFIG_DIR/domainwire/config.toml, ./domainwire.toml\n\
         # Omit [content].repository_dir to keep deployment content in memory.\n\n{}",
        body
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.protocol.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.content.repository_dir.is_none());
        assert!(!config.general.node_name.is_empty());
    }

    #[test]
    fn test_write_and_load() {
        let mut config = Config::default();
        config.network.reuse_connections = true;
        config.protocol.chunk_size = 4096;
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.network.port, config.network.port);
        assert!(loaded.network.reuse_connections);
        assert_eq!(loaded.protocol.chunk_size, 4096);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[network]\nport = 7777\n\n[protocol]\nchunk_size = 1024").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.network.port, 7777);
        assert_eq!(config.protocol.chunk_size, 1024);
        assert_eq!(config.protocol.max_object_size, DEFAULT_MAX_OBJECT_SIZE);

        let net = config.network_config();
        assert_eq!(net.port, 7777);
        assert_eq!(net.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[protocol]\nchunk_size = 0").unwrap();
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(Config::load(&path), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        assert!(sample.starts_with('#'));
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.general.node_name, "domain-controller");
        assert_eq!(
            parsed.content.repository_dir,
            Some(PathBuf::from("/var/lib/domainwire/content"))
        );
    }
}
