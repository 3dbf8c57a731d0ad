use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Empty URL selects the in-memory matching store (single-node dev/test).
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Empty URL disables the Redis delivery trigger.
    #[serde(default)]
    pub url: String,
    /// Pub/Sub channel producers publish delivery messages on.
    #[serde(default = "default_intent_channel")]
    pub intent_channel: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApiConfig {
    /// Optional API key required on the internal trigger endpoints.
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Keepalive probe period in seconds (must stay below the peer read timeout)
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
    /// Read deadline in seconds; reset by any inbound frame
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    /// Capacity of the per-connection outbound queue
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum delivery attempts before dead-lettering
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base retry delay in milliseconds (doubled per attempt)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the retry delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Lease duration for in-flight intents in seconds
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: u64,
    /// Interval for the lease sweeper task in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Maximum dead-letter entries retained for inspection
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_intent_channel() -> String {
    "ridehub:deliveries".to_string()
}

fn default_keepalive_interval() -> u64 {
    20
}

fn default_read_timeout() -> u64 {
    60
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_workers() -> usize {
    4
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_lease_seconds() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_dead_letter_capacity() -> usize {
    1024
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8082)?
            .set_default("websocket.keepalive_interval", 20)?
            .set_default("websocket.read_timeout", 60)?
            .set_default("websocket.outbound_buffer", 256)?
            .set_default("delivery.workers", 4)?
            .set_default("delivery.max_retries", 5)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_HOST, SERVER_PORT, JWT_SECRET, DATABASE_URL, REDIS_URL, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            intent_channel: default_intent_channel(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: default_keepalive_interval(),
            read_timeout: default_read_timeout(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            lease_seconds: default_lease_seconds(),
            sweep_interval_seconds: default_sweep_interval(),
            dead_letter_capacity: default_dead_letter_capacity(),
        }
    }
}
