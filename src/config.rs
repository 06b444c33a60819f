use std::path::PathBuf;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub query: QueryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path of the externally-owned chat.db
    pub database_path: String,
    pub busy_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the derived prepared store
    pub database_path: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub batch_size: usize,
    /// Seconds between background refresh passes; zero disables the loop
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub chat_list_ttl_secs: u64,
    pub decode_cache_capacity: usize,
    pub stream_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

impl Default for AppConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self {
            source: SourceConfig {
                database_path: format!("{home}/Library/Messages/chat.db"),
                busy_timeout_secs: 5,
            },
            store: StoreConfig {
                database_path: format!("{home}/.chat-prep/prepared.db"),
                max_connections: 8,
            },
            ingest: IngestConfig {
                batch_size: 1000,
                refresh_interval_secs: 0,
            },
            query: QueryConfig {
                chat_list_ttl_secs: 30,
                decode_cache_capacity: 4096,
                stream_timeout_secs: 300,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence: defaults,
    /// then config files, then `CHAT_PREP_*` environment variables.
    pub fn load() -> Result<Self> {
        let defaults = AppConfig::default();
        let config = Config::builder()
            .set_default("source.database_path", defaults.source.database_path)?
            .set_default("source.busy_timeout_secs", defaults.source.busy_timeout_secs)?
            .set_default("store.database_path", defaults.store.database_path)?
            .set_default("store.max_connections", defaults.store.max_connections)?
            .set_default("ingest.batch_size", defaults.ingest.batch_size as u64)?
            .set_default(
                "ingest.refresh_interval_secs",
                defaults.ingest.refresh_interval_secs,
            )?
            .set_default("query.chat_list_ttl_secs", defaults.query.chat_list_ttl_secs)?
            .set_default(
                "query.decode_cache_capacity",
                defaults.query.decode_cache_capacity as u64,
            )?
            .set_default("query.stream_timeout_secs", defaults.query.stream_timeout_secs)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("CHAT_PREP").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {e}"))?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.source.database_path.trim().is_empty() {
            return Err(anyhow::anyhow!("source.database_path cannot be empty"));
        }
        if self.store.database_path.trim().is_empty() {
            return Err(anyhow::anyhow!("store.database_path cannot be empty"));
        }
        if self.store.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }

        if self.ingest.batch_size == 0 {
            return Err(anyhow::anyhow!("batch_size must be greater than 0"));
        }
        if self.query.stream_timeout_secs == 0 {
            return Err(anyhow::anyhow!("stream_timeout_secs must be greater than 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        Ok(())
    }

    /// Get the source chat.db path from environment or config
    #[must_use]
    pub fn source_db_path(&self) -> PathBuf {
        std::env::var("CHAT_DB_PATH")
            .unwrap_or_else(|_| self.source.database_path.clone())
            .into()
    }

    /// Get the prepared-store path from environment or config
    #[must_use]
    pub fn store_db_path(&self) -> PathBuf {
        std::env::var("PREPARED_DB_PATH")
            .unwrap_or_else(|_| self.store.database_path.clone())
            .into()
    }

    /// Get the log level from environment or config
    #[must_use]
    pub fn log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}
