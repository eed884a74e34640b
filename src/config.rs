//! # Configuration Management
//!
//! Centralized configuration for servers, clients, and the per-connection
//! link options.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()`
//!
//! The process-wide default link configuration is an explicit, immutable
//! value: it may be set once before first use and is frozen afterwards, so
//! there is no mutable global to race on.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::frame::TextEncoding;
use crate::core::serialization::SerializationFormat;
use crate::error::{LinkError, Result};

/// Per-connection options shared by servers and clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Text codepage written into every non-empty frame.
    #[serde(with = "encoding_serde", default)]
    pub encoding: TextEncoding,

    /// Object payload format behind the type registry.
    #[serde(with = "format_serde", default)]
    pub format: SerializationFormat,

    /// Whether a server shutdown also closes every live peer connection.
    #[serde(default = "default_true")]
    pub disconnect_clients_on_dispose: bool,

    /// Whether background listening starts right after the handshake.
    #[serde(default)]
    pub listening: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            encoding: TextEncoding::Utf8,
            format: SerializationFormat::Json,
            disconnect_clients_on_dispose: true,
            listening: false,
        }
    }
}

static SHARED_DEFAULT: OnceLock<LinkConfig> = OnceLock::new();

impl LinkConfig {
    /// The process-wide default. Frozen on first access.
    pub fn shared_default() -> &'static LinkConfig {
        SHARED_DEFAULT.get_or_init(LinkConfig::default)
    }

    /// Replace the process-wide default before anything has used it.
    /// Fails once [`shared_default`] has been read or a value was already
    /// installed.
    ///
    /// [`shared_default`]: LinkConfig::shared_default
    pub fn set_shared_default(config: LinkConfig) -> Result<()> {
        SHARED_DEFAULT.set(config).map_err(|_| {
            LinkError::InvalidOperation("the shared default configuration is already frozen".into())
        })
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server listen address (e.g., "127.0.0.1:9900")
    pub address: String,

    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Per-connection link options
    #[serde(default)]
    pub link: LinkConfig,
}

fn default_max_connections() -> usize {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            address: String::from("127.0.0.1:9900"),
            max_connections: default_max_connections(),
            link: LinkConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml(&read_to_string(path)?)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| LinkError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(address) = std::env::var("OBJLINK_SERVER_ADDRESS") {
            config.address = address;
        }
        if let Ok(max) = std::env::var("OBJLINK_MAX_CONNECTIONS") {
            if let Ok(value) = max.parse::<usize>() {
                config.max_connections = value;
            }
        }
        Ok(config)
    }

    /// Validate the configuration for common issues and misconfigurations.
    ///
    /// Returns a list of validation errors. Empty list means the
    /// configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:9900')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        collect_strict(self.validate())
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Timeout for the TCP connection attempt. The message layer itself
    /// carries no timeouts; cancellation belongs to higher layers.
    #[serde(with = "duration_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Per-connection link options
    #[serde(default)]
    pub link: LinkConfig,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            address: String::from("127.0.0.1:9900"),
            connect_timeout: default_connect_timeout(),
            link: LinkConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml(&read_to_string(path)?)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| LinkError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(address) = std::env::var("OBJLINK_CLIENT_ADDRESS") {
            config.address = address;
        }
        if let Ok(timeout) = std::env::var("OBJLINK_CONNECT_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse::<u64>() {
                config.connect_timeout = Duration::from_millis(value);
            }
        }
        Ok(config)
    }

    /// Validate the configuration for common issues and misconfigurations.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: 'example.com:9900')",
                self.address
            ));
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        collect_strict(self.validate())
    }
}

fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| LinkError::Config(format!("Failed to open config file: {e}")))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| LinkError::Config(format!("Failed to read config file: {e}")))?;
    Ok(contents)
}

fn collect_strict(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(LinkError::Config(format!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

/// Helper module for Duration serialization/deserialization (milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for TextEncoding serialization as its wire codepage id
mod encoding_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::core::frame::TextEncoding;

    pub fn serialize<S>(encoding: &TextEncoding, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        encoding.code_page().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<TextEncoding, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code_page = i32::deserialize(deserializer)?;
        TextEncoding::from_code_page(code_page)
            .ok_or_else(|| serde::de::Error::custom(format!("Unsupported codepage: {code_page}")))
    }
}

/// Helper module for SerializationFormat serialization as a format name
mod format_serde {
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::core::serialization::SerializationFormat;

    pub fn serialize<S>(format: &SerializationFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let name = match format {
            SerializationFormat::Json => "json",
            SerializationFormat::Bincode => "bincode",
            SerializationFormat::MessagePack => "messagepack",
        };
        name.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SerializationFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        SerializationFormat::from_str(&name).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let link = LinkConfig::default();
        assert_eq!(link.encoding, TextEncoding::Utf8);
        assert_eq!(link.format, SerializationFormat::Json);
        assert!(link.disconnect_clients_on_dispose);
        assert!(!link.listening);
    }

    #[test]
    fn toml_roundtrip() {
        let config = ServerConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = ServerConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.address, config.address);
        assert_eq!(parsed.max_connections, config.max_connections);
        assert_eq!(parsed.link.encoding, config.link.encoding);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed = ClientConfig::from_toml("address = \"10.0.0.1:4444\"").unwrap();
        assert_eq!(parsed.address, "10.0.0.1:4444");
        assert_eq!(parsed.connect_timeout, default_connect_timeout());
        assert_eq!(parsed.link.format, SerializationFormat::Json);
    }

    #[test]
    fn encoding_is_configured_by_codepage() {
        let parsed = ClientConfig::from_toml(
            "address = \"10.0.0.1:4444\"\n[link]\nencoding = 1200\nformat = \"messagepack\"",
        )
        .unwrap();
        assert_eq!(parsed.link.encoding, TextEncoding::Utf16Le);
        assert_eq!(parsed.link.format, SerializationFormat::MessagePack);
        assert!(ClientConfig::from_toml("address = \"x:1\"\n[link]\nencoding = 12").is_err());
    }

    #[test]
    fn validation_flags_bad_addresses() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_empty());
        config.address = "not-an-address".into();
        assert!(!config.validate().is_empty());
        assert!(config.validate_strict().is_err());

        let mut client = ClientConfig::default();
        client.connect_timeout = Duration::from_millis(1);
        assert!(!client.validate().is_empty());
    }

    #[test]
    fn shared_default_is_frozen_after_first_use() {
        let _ = LinkConfig::shared_default();
        assert!(LinkConfig::set_shared_default(LinkConfig::default()).is_err());
    }
}
