//! Harvest pipeline and scheduling.
//!
//! Each scene from a [`SceneSource`] is normalized, checked against the
//! optional whitelist and blacklist sub-indices, scored, stored, and
//! announced on the event sink. Failures are per scene: one bad record is
//! logged and counted, never fatal to the run.
//!
//! [`HarvestScheduler`] keeps recurring harvests as background tasks keyed
//! by an arbitrary string (the Planet API key for `/planet/{key}`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use scene_catalog_core::features::FeatureStore;
use scene_catalog_core::geometry;
use scene_catalog_core::models::{format_instant, props, Feature};
use scene_catalog_core::score;
use scene_catalog_core::subindex;
use scene_catalog_core::tiles::TileMap;
use scene_catalog_core::{CatalogError, Result};

use crate::events::{EventSink, SceneEvent};
use crate::subindex_builder::SubIndexBuilder;
use crate::traits::SceneSource;

/// Per-run harvest settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarvestOptions {
    /// Overwrite scenes that already exist.
    pub reharvest: bool,
    /// Keep only scenes intersecting this sub-index's tiles.
    pub whitelist: Option<String>,
    /// Drop scenes intersecting this sub-index's tiles.
    pub blacklist: Option<String>,
    /// Emit an event for each stored scene.
    pub emit_events: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestOutcome {
    Stored,
    Exists,
    Filtered,
}

/// Counts from one harvest run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    pub source: String,
    pub seen: usize,
    pub stored: usize,
    pub existing: usize,
    pub filtered: usize,
    pub failed: usize,
}

/// Canonicalize a vendor scene: id and geometry are required, the envelope
/// is derived from the geometry, and `acquiredDate` is rewritten as RFC3339
/// UTC.
pub fn normalize(mut feature: Feature) -> Result<Feature> {
    if feature.id.trim().is_empty() {
        return Err(CatalogError::invalid("scene has no id"));
    }
    let geom = feature
        .geometry
        .as_ref()
        .ok_or_else(|| CatalogError::invalid(format!("scene {} has no geometry", feature.id)))?;
    feature.bbox = geometry::envelope(geom)?;
    match feature.acquired_date() {
        Some(at) => feature.set_property(props::ACQUIRED_DATE, format_instant(&at)),
        None => {
            if let Some(raw) = feature.text(props::ACQUIRED_DATE) {
                warn!(id = %feature.id, acquired = raw, "unparseable acquiredDate; scene will be unscored");
            }
        }
    }
    Ok(feature)
}

#[derive(Clone)]
pub struct Harvester {
    store: FeatureStore,
    subindexes: SubIndexBuilder,
    events: Arc<dyn EventSink>,
}

impl Harvester {
    pub fn new(store: FeatureStore, subindexes: SubIndexBuilder, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            subindexes,
            events,
        }
    }

    async fn list_map(&self, name: &str) -> Result<Arc<TileMap>> {
        let sub = subindex::lookup(self.store.kv().as_ref(), self.store.keys(), name).await?;
        self.subindexes
            .tile_map(&sub.key)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("tile map for sub-index {}", name)))
    }

    /// Whether a normalized scene passes the whitelist and blacklist.
    pub async fn admits(&self, scene: &Feature, opts: &HarvestOptions) -> Result<bool> {
        if let Some(name) = &opts.whitelist {
            if !self.list_map(name).await?.matches(scene)? {
                return Ok(false);
            }
        }
        if let Some(name) = &opts.blacklist {
            if self.list_map(name).await?.matches(scene)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Harvest one scene.
    pub async fn harvest_one(&self, feature: Feature, opts: &HarvestOptions) -> Result<HarvestOutcome> {
        let scene = normalize(feature)?;
        if !self.admits(&scene, opts).await? {
            debug!(id = %scene.id, "scene filtered by sub-index list");
            return Ok(HarvestOutcome::Filtered);
        }
        let s = score::score(&scene);
        match self.store.put(&scene, s, opts.reharvest).await {
            Ok(_) => {}
            Err(CatalogError::AlreadyExists(_)) => return Ok(HarvestOutcome::Exists),
            Err(e) => return Err(e),
        }
        if opts.emit_events {
            let stored = self.store.get(&scene.id).await?;
            if let Err(e) = self.events.emit(&SceneEvent::from_feature(&stored)).await {
                warn!(id = %scene.id, error = %e, "failed to emit harvest event");
            }
        }
        Ok(HarvestOutcome::Stored)
    }

    /// Harvest a batch of scenes, counting outcomes.
    pub async fn harvest_all(&self, source: &str, features: Vec<Feature>, opts: &HarvestOptions) -> HarvestReport {
        let mut report = HarvestReport {
            source: source.to_string(),
            seen: features.len(),
            ..Default::default()
        };
        for feature in features {
            let id = feature.id.clone();
            match self.harvest_one(feature, opts).await {
                Ok(HarvestOutcome::Stored) => report.stored += 1,
                Ok(HarvestOutcome::Exists) => report.existing += 1,
                Ok(HarvestOutcome::Filtered) => report.filtered += 1,
                Err(e) => {
                    warn!(id = %id, error = %e, "harvest failed for scene");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Pull from a source and harvest everything acquired within `lookback`.
    pub async fn run(&self, source: &dyn SceneSource, lookback: Duration, opts: &HarvestOptions) -> Result<HarvestReport> {
        let lookback = chrono::Duration::from_std(lookback)
            .map_err(|e| CatalogError::invalid(format!("lookback out of range: {}", e)))?;
        let since = Utc::now() - lookback;
        let scenes = source.scan(since).await?;
        let report = self.harvest_all(source.name(), scenes, opts).await;
        info!(
            source = %report.source,
            seen = report.seen,
            stored = report.stored,
            existing = report.existing,
            filtered = report.filtered,
            failed = report.failed,
            "harvest complete"
        );
        Ok(report)
    }

    /// Remove a scene from every index and delete its blob.
    pub async fn unharvest(&self, id: &str) -> Result<Feature> {
        let removed = self.store.delete_by_id(id).await?;
        info!(id, "scene unharvested");
        Ok(removed)
    }
}

/// Recurring harvests running as background tasks.
#[derive(Default)]
pub struct HarvestScheduler {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl HarvestScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `harvester` against `source` every `interval`, replacing any
    /// schedule already registered under `key`.
    pub fn schedule(
        &self,
        key: &str,
        harvester: Harvester,
        source: Arc<dyn SceneSource>,
        interval: Duration,
        opts: HarvestOptions,
    ) -> Result<()> {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = harvester.run(source.as_ref(), interval * 2, &opts).await {
                    warn!(source = source.name(), error = %e, "scheduled harvest failed");
                }
            }
        });
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| CatalogError::internal("harvest scheduler lock poisoned"))?;
        if let Some(previous) = tasks.insert(key.to_string(), handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop a recurring harvest. Returns whether one was running.
    pub fn cancel(&self, key: &str) -> Result<bool> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| CatalogError::internal("harvest scheduler lock poisoned"))?;
        Ok(match tasks.remove(key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        })
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.tasks
            .lock()
            .map(|t| t.contains_key(key))
            .unwrap_or(false)
    }
}
