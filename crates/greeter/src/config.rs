//! Greeter configuration

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use greeter_common::{GreeterError, Result};
use serde::{Deserialize, Serialize};

/// Greeter configuration shared by the server and client binaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreeterConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Client settings
    pub client: ClientSettings,
    /// CA bundle trusted by both sides
    pub ca_cert: PathBuf,
    /// Bound on a single TLS handshake
    pub handshake_timeout_secs: u64,
}

impl Default for GreeterConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            client: ClientSettings::default(),
            ca_cert: PathBuf::from("certs/ca.crt"),
            handshake_timeout_secs: 10,
        }
    }
}

impl GreeterConfig {
    /// Load configuration from `.env` and the environment
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source, over the defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        // Server settings
        if let Some(val) = lookup("GREETER_BIND_ADDRESS") {
            cfg.server.bind_address = val;
        }
        if let Some(val) = lookup("GREETER_SERVER_CERT") {
            cfg.server.cert = PathBuf::from(val);
        }
        if let Some(val) = lookup("GREETER_SERVER_KEY") {
            cfg.server.key = PathBuf::from(val);
        }

        // Client settings
        if let Some(val) = lookup("GREETER_ADDRESS") {
            cfg.client.address = val;
        }
        if let Some(val) = lookup("GREETER_SERVER_NAME") {
            cfg.client.server_name = val;
        }
        if let Some(val) = lookup("GREETER_CLIENT_CERT") {
            cfg.client.cert = PathBuf::from(val);
        }
        if let Some(val) = lookup("GREETER_CLIENT_KEY") {
            cfg.client.key = PathBuf::from(val);
        }
        if let Some(val) = lookup("GREETER_CALL_TIMEOUT_MS") {
            cfg.client.call_timeout_ms = parse("GREETER_CALL_TIMEOUT_MS", &val)?;
        }

        // Shared settings
        if let Some(val) = lookup("GREETER_CA_CERT") {
            cfg.ca_cert = PathBuf::from(val);
        }
        if let Some(val) = lookup("GREETER_HANDSHAKE_TIMEOUT_SECS") {
            cfg.handshake_timeout_secs = parse("GREETER_HANDSHAKE_TIMEOUT_SECS", &val)?;
        }

        if cfg.client.server_name.is_empty() {
            return Err(GreeterError::Config(
                "GREETER_SERVER_NAME must not be empty".to_string(),
            ));
        }

        Ok(cfg)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address to bind
    pub bind_address: String,
    /// Server certificate (PEM)
    pub cert: PathBuf,
    /// Server private key (PEM)
    pub key: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:50051".to_string(),
            cert: PathBuf::from("certs/server.crt"),
            key: PathBuf::from("certs/server.key"),
        }
    }
}

/// Client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Server address to dial
    pub address: String,
    /// Name the server certificate must be valid for
    pub server_name: String,
    /// Client certificate (PEM)
    pub cert: PathBuf,
    /// Client private key (PEM)
    pub key: PathBuf,
    /// Per-call timeout in milliseconds
    pub call_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            address: "localhost:50051".to_string(),
            server_name: "localhost".to_string(),
            cert: PathBuf::from("certs/client.crt"),
            key: PathBuf::from("certs/client.key"),
            call_timeout_ms: crate::DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl ClientSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| GreeterError::Config(format!("{key}={value:?}: {e}")))
}
