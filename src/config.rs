//! Application configuration.
//!
//! Loaded from a YAML file and `FLIPCASH_`-prefixed environment variables.

use std::time::Duration;

use serde::Deserialize;

/// Environment variable controlling the tracing filter.
pub const LOG_ENV_VAR: &str = "FLIPCASH_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server bind configuration.
    pub server: ServerConfig,
    /// Storage backend configuration.
    pub storage: StorageConfig,
    /// Event stream tuning.
    pub stream: StreamConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (later overrides earlier):
    /// 1. `config.yaml` in the current directory (if present)
    /// 2. File named by the `FLIPCASH_CONFIG` environment variable (if set)
    /// 3. Environment variables with `FLIPCASH_` prefix
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new("config", FileFormat::Yaml).required(false))
            .add_source(File::new("config.yaml", FileFormat::Yaml).required(false));

        if let Ok(config_path) = std::env::var("FLIPCASH_CONFIG") {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("FLIPCASH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }
}

/// Server bind configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port for the event streaming gRPC service.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
        }
    }
}

impl ServerConfig {
    /// Get the socket address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Storage backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// In-memory rendezvous table (single node, testing).
    #[default]
    Memory,
    /// PostgreSQL rendezvous table.
    Postgres,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// PostgreSQL configuration.
    pub postgres: PostgresConfig,
}

/// PostgreSQL connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Connection URI.
    pub uri: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            uri: "postgres://localhost:5432/flipcash".to_string(),
        }
    }
}

/// Event stream tuning.
///
/// Defaults match production; tests override the address and keys only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Externally reachable host:port advertised in rendezvous records.
    pub broadcast_address: String,
    /// API key stamped on outbound forwarding RPCs.
    pub current_internal_api_key: String,
    /// Additional accepted API keys on inbound forwards (key rotation).
    pub accepted_internal_api_keys: Vec<String>,
    /// Delay between server pings, in milliseconds.
    pub ping_delay_ms: u64,
    /// Rendezvous lease lifetime, in milliseconds.
    pub rendezvous_ttl_ms: u64,
    /// Lease refresh cadence, in milliseconds. Must be below the ttl.
    pub refresh_interval_ms: u64,
    /// Per-attempt deadline on forwarding RPCs, in milliseconds.
    pub forward_timeout_ms: u64,
    /// Budget for handing an event to a local stream, in milliseconds.
    pub notify_timeout_ms: u64,
    /// Buffered batches per stream.
    pub stream_buffer_size: usize,
    /// Largest event batch sent to a client.
    pub max_batch_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            broadcast_address: "localhost:8085".to_string(),
            current_internal_api_key: String::new(),
            accepted_internal_api_keys: Vec::new(),
            ping_delay_ms: 5_000,
            rendezvous_ttl_ms: 3_000,
            refresh_interval_ms: 2_000,
            forward_timeout_ms: 250,
            notify_timeout_ms: 1_000,
            stream_buffer_size: 64,
            max_batch_size: 1024,
        }
    }
}

impl StreamConfig {
    pub fn ping_delay(&self) -> Duration {
        Duration::from_millis(self.ping_delay_ms)
    }

    pub fn rendezvous_ttl(&self) -> Duration {
        Duration::from_millis(self.rendezvous_ttl_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}
