//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default local bind address.
pub const DEFAULT_LOCAL_ADDR: &str = "127.0.0.1";

/// Default local SOCKS5 port.
pub const DEFAULT_LOCAL_PORT: u16 = 8388;

/// Default relay server port.
pub const DEFAULT_SERVER_PORT: u16 = 8499;

/// Default timeout for dialing the relay server.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime configuration of the local tunnel endpoint.
#[derive(Clone)]
pub struct ClientConfig {
    /// Relay server host name or address
    pub server_addr: String,
    /// Relay server port
    pub server_port: u16,
    /// Shared password both tunnel ends derive their keys from
    pub password: String,
    /// Local bind address
    pub local_addr: String,
    /// Local bind port
    pub local_port: u16,
    /// Forward IPv6 destinations instead of rejecting them
    pub allow_ipv6: bool,
    /// Upper bound on dialing the relay server
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration with default local settings.
    pub fn new(
        server_addr: impl Into<String>,
        server_port: u16,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server_addr: server_addr.into(),
            server_port,
            password: password.into(),
            local_addr: DEFAULT_LOCAL_ADDR.to_string(),
            local_port: DEFAULT_LOCAL_PORT,
            allow_ipv6: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the local bind address and port.
    pub fn with_local(mut self, local_addr: impl Into<String>, local_port: u16) -> Self {
        self.local_addr = local_addr.into();
        self.local_port = local_port;
        self
    }

    /// `host:port` of the relay server.
    pub fn server_endpoint(&self) -> String {
        join_host_port(&self.server_addr, self.server_port)
    }

    /// `host:port` the listener binds to.
    pub fn local_endpoint(&self) -> String {
        join_host_port(&self.local_addr, self.local_port)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server_addr.is_empty() {
            return Err(Error::config("server_addr cannot be empty"));
        }
        if self.server_port == 0 {
            return Err(Error::config("server_port cannot be 0"));
        }
        if self.password.is_empty() {
            return Err(Error::config("password cannot be empty"));
        }
        if self.local_addr.is_empty() {
            return Err(Error::config("local_addr cannot be empty"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect_timeout cannot be zero"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_addr", &self.server_addr)
            .field("server_port", &self.server_port)
            .field("password", &"<redacted>")
            .field("local_addr", &self.local_addr)
            .field("local_port", &self.local_port)
            .field("allow_ipv6", &self.allow_ipv6)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Bracket IPv6 literals so the result parses as a socket address.
fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Configuration file format for serialization.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientConfigFile {
    /// Relay server host name or address
    pub server_addr: String,
    /// Relay server port
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Shared password
    pub password: String,
    /// Local bind address
    #[serde(default = "default_local_addr")]
    pub local_addr: String,
    /// Local bind port
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    /// Forward IPv6 destinations
    #[serde(default = "default_allow_ipv6")]
    pub allow_ipv6: bool,
    /// Relay dial timeout (seconds)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_local_addr() -> String {
    DEFAULT_LOCAL_ADDR.to_string()
}

fn default_local_port() -> u16 {
    DEFAULT_LOCAL_PORT
}

fn default_allow_ipv6() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

impl ClientConfigFile {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("invalid config file: {}", e)))
    }

    /// Render as a TOML document.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("failed to serialize config: {}", e)))
    }

    /// Convert to runtime configuration.
    pub fn to_config(&self) -> Result<ClientConfig> {
        let config = ClientConfig {
            server_addr: self.server_addr.clone(),
            server_port: self.server_port,
            password: self.password.clone(),
            local_addr: self.local_addr.clone(),
            local_port: self.local_port,
            allow_ipv6: self.allow_ipv6,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Create from runtime configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            server_addr: config.server_addr.clone(),
            server_port: config.server_port,
            password: config.password.clone(),
            local_addr: config.local_addr.clone(),
            local_port: config.local_port,
            allow_ipv6: config.allow_ipv6,
            connect_timeout_secs: config.connect_timeout.as_secs(),
        }
    }
}
