//! Handles settings for the application. Configuration is read from
//! `settings.toml` (optional) and overridden by `TREASURE__*` environment
//! variables, e.g. `TREASURE__DATABASE__URL`.
//!
//! See `settings.toml` for the configuration.
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct App {
    pub level: String,
}

#[derive(Debug, Deserialize)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct Ledger {
    pub max_aggregation_attempts: u32,
    pub feed_capacity: usize,
    pub page_size: u64,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub ledger: Ledger,
}

impl Settings {
    pub fn new(path: Option<&str>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("app.level", "info")?
            .set_default("database.url", "sqlite:./treasure.db?mode=rwc")?
            .set_default("database.max_connections", 1)?
            .set_default("ledger.max_aggregation_attempts", 5)?
            .set_default("ledger.feed_capacity", 256)?
            .set_default("ledger.page_size", 20)?
            .add_source(File::with_name(path.unwrap_or("settings")).required(path.is_some()))
            .add_source(Environment::with_prefix("TREASURE").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
