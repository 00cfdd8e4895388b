use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Standard RADIUS authentication port
pub const DEFAULT_RADIUS_PORT: u16 = 1812;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What the engine does once a transaction has used up its attempts against
/// one server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Every attempt goes to the first server; exhaustion ends the
    /// transaction with a timeout
    #[default]
    SameServer,
    /// `attempts` go to each server in turn, round-robin from the first, and
    /// the transaction times out only after every server has been tried
    Failover,
}

/// RADIUS server configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server address (`host:port`, or `host` for port 1812)
    pub address: String,

    /// Shared secret for this server
    pub secret: String,

    /// Optional NAS-Identifier sent with every request
    #[serde(default)]
    pub nas_identifier: Option<String>,

    /// Optional server name/description
    #[serde(default)]
    pub name: Option<String>,
}

impl ServerConfig {
    pub fn new(address: impl Into<String>, secret: impl Into<String>) -> Self {
        ServerConfig {
            address: address.into(),
            secret: secret.into(),
            nas_identifier: None,
            name: None,
        }
    }

    /// Resolve the configured address, defaulting the port to 1812
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if let Ok(addr) = self.address.parse::<SocketAddr>() {
            return Ok(addr);
        }
        if let Ok(ip) = self.address.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, DEFAULT_RADIUS_PORT));
        }

        let resolved = if self.address.contains(':') {
            self.address.to_socket_addrs()
        } else {
            (self.address.as_str(), DEFAULT_RADIUS_PORT).to_socket_addrs()
        };

        resolved
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| {
                ConfigError::Invalid(format!("Invalid RADIUS server address: {}", self.address))
            })
    }

    /// Display name: the configured name, or the address
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        if self.secret.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Server {} has empty secret",
                self.address
            )));
        }

        if let Some(ref nas_identifier) = self.nas_identifier
            && (nas_identifier.is_empty() || nas_identifier.len() > 253)
        {
            return Err(ConfigError::Invalid(format!(
                "Server {} NAS-Identifier must be 1-253 bytes",
                self.address
            )));
        }

        Ok(())
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .field("nas_identifier", &self.nas_identifier)
            .field("name", &self.name)
            .finish()
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RADIUS servers, in selection order
    pub servers: Vec<ServerConfig>,

    /// Time to wait for a response before retrying, in milliseconds (default: 60000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Requests sent per server before giving up on it (default: 3)
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Retry policy once a server has used up its attempts
    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Delay before resubmitting when every request identifier is in flight,
    /// in milliseconds (default: 100)
    #[serde(default = "default_busy_retry_delay_ms")]
    pub busy_retry_delay_ms: u64,

    /// Log level: "trace", "debug", "info", "warn", "error" (default: "info")
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_attempts() -> u32 {
    3
}

fn default_busy_retry_delay_ms() -> u64 {
    100
}

impl Config {
    /// Configuration with one server and every other setting at its default
    pub fn new(server: ServerConfig) -> Self {
        Config {
            servers: vec![server],
            timeout_ms: default_timeout_ms(),
            attempts: default_attempts(),
            retry_policy: RetryPolicy::default(),
            busy_retry_delay_ms: default_busy_retry_delay_ms(),
            log_level: None,
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn busy_retry_delay(&self) -> Duration {
        Duration::from_millis(self.busy_retry_delay_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one RADIUS server is required".to_string(),
            ));
        }

        for server in &self.servers {
            server.validate()?;
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("Timeout cannot be 0".to_string()));
        }

        if !(1..=255).contains(&self.attempts) {
            return Err(ConfigError::Invalid(format!(
                "Attempts must be between 1 and 255, got {}",
                self.attempts
            )));
        }

        Ok(())
    }

    /// Create an example configuration file
    pub fn example() -> Self {
        Config {
            servers: vec![
                ServerConfig {
                    address: "127.0.0.1:1812".to_string(),
                    secret: "testing123".to_string(),
                    nas_identifier: Some("web-frontend".to_string()),
                    name: Some("Primary".to_string()),
                },
                ServerConfig {
                    address: "127.0.0.2".to_string(),
                    secret: "testing456".to_string(),
                    nas_identifier: None,
                    name: Some("Backup".to_string()),
                },
            ],
            timeout_ms: 5_000,
            attempts: 3,
            retry_policy: RetryPolicy::Failover,
            busy_retry_delay_ms: default_busy_retry_delay_ms(),
            log_level: Some("info".to_string()),
        }
    }
}
