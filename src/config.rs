//! Configuration parsing and validation.
//!
//! Scene Catalog is configured by a TOML file, usually
//! `config/catalog.toml`. Every section except `[server]` is optional and
//! falls back to defaults suitable for a single-process deployment.
//!
//! # Example
//!
//! ```toml
//! [catalog]
//! prefix = "catalog"
//!
//! [store]
//! backend = "sqlite"
//! path = "./data/catalog.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [discovery]
//! cache_ttl_secs = 86400
//! poll_interval_ms = 250
//!
//! [planet]
//! item_types = ["PSScene", "Landsat8L1G", "Sentinel2L1C"]
//! interval_secs = 3600
//!
//! [auth]
//! mode = "api_keys"
//!
//! [[auth.keys]]
//! key = "s3cret"
//! roles = ["admin", "harvest"]
//! ```
//!
//! After parsing, `PL_API_KEY` and `DOMAIN` from the environment override
//! `planet.api_key` and `events.domain`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::discover::MIN_POLL_INTERVAL;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub wfs: WfsConfig,
    #[serde(default)]
    pub planet: PlanetConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

fn default_prefix() -> String {
    "catalog".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/catalog.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    /// Lifetime of a ready discovery result.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Lifetime of a `building` marker; a crashed build is retried after it.
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_max_count")]
    pub max_count: usize,
    #[serde(default = "default_count")]
    pub default_count: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            build_timeout_secs: default_build_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            max_count: default_max_count(),
            default_count: default_count(),
        }
    }
}

impl DiscoveryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_build_timeout_secs() -> u64 {
    300
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_max_polls() -> u32 {
    120
}
fn default_max_count() -> usize {
    1000
}
fn default_count() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct WfsConfig {
    #[serde(default = "default_wfs_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_features")]
    pub max_features: u32,
}

impl Default for WfsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_wfs_timeout_secs(),
            max_features: default_max_features(),
        }
    }
}

fn default_wfs_timeout_secs() -> u64 {
    60
}
fn default_max_features() -> u32 {
    9999
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlanetConfig {
    #[serde(default = "default_planet_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_item_types")]
    pub item_types: Vec<String>,
    #[serde(default = "default_harvest_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_planet_timeout_secs")]
    pub timeout_secs: u64,
    /// Stop a harvest after this many pages.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for PlanetConfig {
    fn default() -> Self {
        Self {
            base_url: default_planet_url(),
            api_key: None,
            item_types: default_item_types(),
            interval_secs: default_harvest_interval_secs(),
            timeout_secs: default_planet_timeout_secs(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_planet_url() -> String {
    "https://api.planet.com/data/v1".to_string()
}
fn default_item_types() -> Vec<String> {
    vec![
        "PSScene".to_string(),
        "Landsat8L1G".to_string(),
        "Sentinel2L1C".to_string(),
    ]
}
fn default_harvest_interval_secs() -> u64 {
    3600
}
fn default_planet_timeout_secs() -> u64 {
    60
}
fn default_max_pages() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EventsConfig {
    /// Explicit event bus endpoint. Derived from `domain` when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub event_type_id: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

impl EventsConfig {
    /// Where harvest events are posted, if anywhere.
    pub fn resolved_endpoint(&self) -> Option<String> {
        self.endpoint.clone().or_else(|| {
            self.domain
                .as_ref()
                .map(|d| format!("https://pz-gateway.{}/event", d))
        })
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    Open,
    ApiKeys,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    #[serde(default)]
    pub keys: Vec<ApiKeyConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiKeyConfig {
    pub key: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl Config {
    /// In-memory store, open auth, every other setting at its default.
    pub fn minimal() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            store: StoreConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:8080".to_string(),
            },
            discovery: DiscoveryConfig::default(),
            wfs: WfsConfig::default(),
            planet: PlanetConfig::default(),
            events: EventsConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Apply `PL_API_KEY` and `DOMAIN` overrides.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("PL_API_KEY").filter(|k| !k.is_empty()) {
            self.planet.api_key = Some(key);
        }
        if let Some(domain) = lookup("DOMAIN").filter(|d| !d.is_empty()) {
            self.events.domain = Some(domain);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.catalog.prefix.is_empty() {
            bail!("catalog.prefix must not be empty");
        }
        if self.catalog.prefix.contains('&') {
            bail!("catalog.prefix must not contain '&'");
        }
        if self.discovery.poll_interval() < MIN_POLL_INTERVAL {
            bail!(
                "discovery.poll_interval_ms must be >= {}",
                MIN_POLL_INTERVAL.as_millis()
            );
        }
        if self.discovery.max_polls == 0 {
            bail!("discovery.max_polls must be >= 1");
        }
        if self.discovery.max_count == 0 {
            bail!("discovery.max_count must be >= 1");
        }
        if self.discovery.default_count == 0 || self.discovery.default_count > self.discovery.max_count {
            bail!(
                "discovery.default_count must be in [1, {}]",
                self.discovery.max_count
            );
        }
        if self.wfs.max_features == 0 {
            bail!("wfs.max_features must be >= 1");
        }
        if self.planet.interval_secs == 0 {
            bail!("planet.interval_secs must be > 0");
        }
        if self.auth.mode == AuthMode::ApiKeys && self.auth.keys.is_empty() {
            bail!("auth.mode = \"api_keys\" requires at least one [[auth.keys]] entry");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content, |k| std::env::var(k).ok())
}

/// Parse, apply environment overrides, and validate.
pub fn parse_config(content: &str, env: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.apply_env(env);
    config.validate()?;
    Ok(config)
}
