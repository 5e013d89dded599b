//! Configuration for the ledger

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,

    /// Conversion configuration
    pub conversion: ConversionConfig,

    /// Retry/backoff configuration for transient storage errors
    pub retry: RetryConfig,

    /// Reconciliation configuration
    pub reconciliation: ReconciliationConfig,

    /// Webhook configuration
    pub webhook: WebhookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "northsend-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDbConfig::default(),
            conversion: ConversionConfig::default(),
            retry: RetryConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            target_file_size_mb: 64,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Conversion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Minimum convertible amount in source-currency units
    pub minimum_amount: Decimal,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            minimum_amount: Decimal::new(10, 0), // $10
        }
    }
}

/// Retry/backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum commit attempts per mutation
    pub max_attempts: u32,

    /// Base backoff delay (milliseconds), doubled per attempt
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
        }
    }
}

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Age (seconds) after which a PENDING transaction is considered stale
    /// and surfaced by `list_pending`
    pub pending_timeout_secs: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            pending_timeout_secs: 300, // 5 minutes
        }
    }
}

/// Webhook configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret for HMAC signature verification
    pub shared_secret: Option<String>,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(min) = std::env::var("LEDGER_CONVERSION_MINIMUM") {
            config.conversion.minimum_amount = min
                .parse()
                .map_err(|_| crate::Error::Config(format!("Invalid conversion minimum: {}", min)))?;
        }

        if let Ok(secret) = std::env::var("LEDGER_WEBHOOK_SECRET") {
            config.webhook.shared_secret = Some(secret);
        }

        Ok(config)
    }
}
