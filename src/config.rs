use crate::error::Error;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub struct ConfigManager {
    settings: Settings,
}

impl ConfigManager {
    pub fn new() -> Result<Self, Error> {
        let settings = Self::load_config()?;
        Ok(Self { settings })
    }

    fn find_config_file() -> Option<PathBuf> {
        let possible_paths = [
            std::env::var("XRELAY_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("conf.yaml")),
            Some(PathBuf::from("config/conf.yaml")),
            Some(PathBuf::from("/etc/xrelay/conf.yaml")),
        ];

        for path in possible_paths.iter().flatten() {
            if path.exists() {
                log::info!("Using config file: {}", path.display());
                return Some(path.clone());
            }
        }
        None
    }

    fn load_config() -> Result<Settings, Error> {
        let mut config = Config::builder();

        if let Some(config_path) = Self::find_config_file() {
            config = config.add_source(File::from(config_path.as_ref()));
        } else {
            log::warn!("No config file found, using defaults and environment variables only");
        }

        config = config.add_source(Self::environment());

        Ok(Self::with_defaults(config)?.build()?.try_deserialize()?)
    }

    /// `XRELAY_CACHE_SIZE` sets `cache.size`.
    fn environment() -> Environment {
        Environment::with_prefix("XRELAY").separator("_")
    }

    fn with_defaults(
        config: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, Error> {
        Ok(config
            .set_default("http.port", 8080)?
            .set_default("cache.size", 256)?
            .set_default("subscriber.interval", 500)?
            .set_default("publisher.linger", 3)?
            .set_default("relay.idle", 5)?
            .set_default("metrics.interval", 60)?
            .set_default("log.level", "info")?)
    }
}

pub fn get_setting() -> Settings {
    match ConfigManager::new() {
        Ok(manager) => manager.settings,
        Err(e) => {
            log::error!("Failed to load config: {}", e);
            Settings::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub http: Http,
    #[serde(default)]
    pub upstream: Option<String>,
    pub cache: Cache,
    pub subscriber: Subscriber,
    pub publisher: Publisher,
    pub relay: Relay,
    pub metrics: Metrics,
    pub log: Log,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http: Http::default(),
            upstream: None,
            cache: Cache::default(),
            subscriber: Subscriber::default(),
            publisher: Publisher::default(),
            relay: Relay::default(),
            metrics: Metrics::default(),
            log: Log::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Http {
    pub port: u16,
}

impl Default for Http {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Packet cache window, in media packets.
#[derive(Debug, Deserialize, Clone)]
pub struct Cache {
    pub size: usize,
}

impl Default for Cache {
    fn default() -> Self {
        Self { size: 256 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Subscriber {
    /// Milliseconds between two pulls of a subscriber.
    pub interval: u64,
}

impl Default for Subscriber {
    fn default() -> Self {
        Self { interval: 500 }
    }
}

impl Subscriber {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Publisher {
    /// Seconds a session lingers after its ingest closed.
    pub linger: u64,
}

impl Default for Publisher {
    fn default() -> Self {
        Self { linger: 3 }
    }
}

impl Publisher {
    pub fn linger(&self) -> Duration {
        Duration::from_secs(self.linger)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Relay {
    /// Seconds a relay without subscribers stays connected upstream.
    pub idle: u64,
}

impl Default for Relay {
    fn default() -> Self {
        Self { idle: 5 }
    }
}

impl Relay {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    /// Seconds between two metrics log lines, 0 disables them.
    pub interval: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self { interval: 60 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    /// `env_logger` filter, `RUST_LOG` wins over it.
    pub level: String,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
