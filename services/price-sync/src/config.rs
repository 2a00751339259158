//! Service configuration
//!
//! Built-in defaults overridden by environment variables (a `.env` file is
//! loaded first when present). Variable names are the upper-case field names,
//! e.g. `DATABASE_URL`, `STALE_AFTER_SECS`.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub coingecko_url: String,
    pub coingecko_key: Option<String>,
    pub database_url: String,
    pub redis_url: String,
    /// Shared secret for the on-demand refresh endpoint; unset disables it
    pub api_key: Option<String>,
    pub port: u16,
    pub currency: String,
    pub refresh_interval_secs: u64,
    pub stale_after_secs: u64,
    pub api_batch_size: usize,
    pub flush_batch_size: usize,
    pub init_lock_key: String,
    pub init_lock_ttl_secs: u64,
}

impl Settings {
    /// Load from `.env` and the process environment
    pub fn load() -> anyhow::Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e.into());
            }
        }

        let config = Self::defaults()?
            .add_source(Environment::default().try_parsing(true))
            .build()?;

        Self::from_config(config)
    }

    fn defaults() -> anyhow::Result<ConfigBuilder<DefaultState>> {
        Ok(Config::builder()
            .set_default("coingecko_url", crate::sources::coingecko::DEFAULT_BASE_URL)?
            .set_default("redis_url", "redis://localhost:6379/0")?
            .set_default("port", 8000)?
            .set_default("currency", "usd")?
            .set_default("refresh_interval_secs", 600)?
            .set_default("stale_after_secs", 7200)?
            .set_default("api_batch_size", 20)?
            .set_default("flush_batch_size", 20)?
            .set_default("init_lock_key", crate::initializer::DEFAULT_LOCK_KEY)?
            .set_default("init_lock_ttl_secs", 600)?)
    }

    fn from_config(config: Config) -> anyhow::Result<Self> {
        let mut settings: Settings = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

        settings.currency = settings.currency.to_lowercase();
        settings.coingecko_key = settings.coingecko_key.filter(|k| !k.is_empty());
        settings.api_key = settings.api_key.filter(|k| !k.is_empty());
        Ok(settings)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn init_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.init_lock_ttl_secs)
    }
}
