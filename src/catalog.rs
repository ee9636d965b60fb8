//! Wiring: one [`Catalog`] holds every service a request handler or CLI
//! command needs, all sharing a single store handle.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use scene_catalog_core::features::FeatureStore;
use scene_catalog_core::kv::memory::InMemoryKv;
use scene_catalog_core::kv::KvStore;
use scene_catalog_core::tiles::TileRegistry;

use crate::auth::{self, Authenticator};
use crate::config::{Config, StoreBackend};
use crate::discover::Discovery;
use crate::events::{EventSink, HttpEventSink, NoopEventSink};
use crate::harvest::{HarvestScheduler, Harvester};
use crate::sqlite_kv::SqliteKv;
use crate::subindex_builder::SubIndexBuilder;
use crate::{db, migrate};

#[derive(Clone)]
pub struct Catalog {
    pub config: Arc<Config>,
    pub store: FeatureStore,
    pub discovery: Discovery,
    pub subindexes: SubIndexBuilder,
    pub harvester: Harvester,
    pub scheduler: Arc<HarvestScheduler>,
    pub auth: Arc<dyn Authenticator>,
    pub events: Arc<dyn EventSink>,
}

/// Open the configured store backend, running migrations for SQLite.
pub async fn open_store(config: &Config) -> Result<Arc<dyn KvStore>> {
    Ok(match config.store.backend {
        StoreBackend::Memory => Arc::new(InMemoryKv::new()),
        StoreBackend::Sqlite => {
            let pool = db::connect(&config.store.path)
                .await
                .with_context(|| format!("Failed to open store at {}", config.store.path.display()))?;
            migrate::run_migrations(&pool).await?;
            Arc::new(SqliteKv::new(pool))
        }
    })
}

impl Catalog {
    pub async fn open(config: Config) -> Result<Self> {
        let kv = open_store(&config).await?;
        Self::with_store(config, kv)
    }

    /// Build every service over an existing store.
    pub fn with_store(config: Config, kv: Arc<dyn KvStore>) -> Result<Self> {
        let store = FeatureStore::new(kv, config.catalog.prefix.clone());
        let tiles = Arc::new(TileRegistry::new());
        let subindexes = SubIndexBuilder::new(store.clone(), tiles, &config.wfs)?;

        let events: Arc<dyn EventSink> = match (config.events.resolved_endpoint(), &config.events.event_type_id) {
            (Some(endpoint), Some(type_id)) => {
                info!(endpoint = %endpoint, "harvest events enabled");
                Arc::new(HttpEventSink::new(endpoint, type_id.clone())?)
            }
            (_, type_id) => Arc::new(NoopEventSink::new(type_id.clone())),
        };
        let harvester = Harvester::new(store.clone(), subindexes.clone(), events.clone());

        Ok(Self {
            discovery: Discovery::new(store.clone(), config.discovery.clone()),
            auth: Arc::from(auth::from_config(&config.auth)),
            scheduler: Arc::new(HarvestScheduler::new()),
            config: Arc::new(config),
            store,
            subindexes,
            harvester,
            events,
        })
    }

    /// Empty the global index and every cached discovery result.
    pub async fn drop_index(&self) -> Result<()> {
        self.store.drop_index().await?;
        let evicted = self.discovery.evict_all().await?;
        info!(evicted, "global index dropped");
        Ok(())
    }
}
