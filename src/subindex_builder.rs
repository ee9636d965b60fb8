//! Sub-index construction from a WFS polygon layer.
//!
//! # Pipeline
//!
//! ```text
//! WFS GetFeature ──▶ FeatureCollection ──▶ TileMap::build
//!                                                 │
//! global index ──▶ footprint ∩ tiles? ──▶ score > 0? ──▶ ZADD sub-index, ZREM stale
//!                                                 │
//!                                          persist + swap tiles
//! ```
//!
//! A failed fetch or parse aborts before anything is written, so the
//! previous tile map and sorted set stay in place. The sorted set is
//! updated in place: members of the previous build stay queryable until
//! the new ones are added, and the tile map is swapped only afterwards.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use scene_catalog_core::features::FeatureStore;
use scene_catalog_core::models::FeatureCollection;
use scene_catalog_core::scan::BATCH_SIZE;
use scene_catalog_core::score;
use scene_catalog_core::subindex::{self, SubIndex};
use scene_catalog_core::tiles::{TileMap, TileRegistry};
use scene_catalog_core::{member, CatalogError, Result};

use crate::config::WfsConfig;

/// Outcome of a sub-index build.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubIndexReport {
    #[serde(flatten)]
    pub sub_index: SubIndex,
    pub source_features: usize,
    pub tiles: usize,
    pub members: usize,
}

#[derive(Clone)]
pub struct SubIndexBuilder {
    store: FeatureStore,
    tiles: Arc<TileRegistry>,
    client: reqwest::Client,
    max_features: u32,
}

/// OGC GetFeature URL for a layer.
pub fn get_feature_url(wfs_url: &str, feature_type: &str, max_features: u32) -> Result<reqwest::Url> {
    reqwest::Url::parse_with_params(
        wfs_url,
        &[
            ("service", "WFS"),
            ("version", "2.0.0"),
            ("request", "GetFeature"),
            ("typeName", feature_type),
            ("outputFormat", "application/json"),
            ("maxFeatures", &max_features.to_string()),
        ],
    )
    .map_err(|e| CatalogError::invalid(format!("bad WFS URL {}: {}", wfs_url, e)))
}

impl SubIndexBuilder {
    pub fn new(store: FeatureStore, tiles: Arc<TileRegistry>, config: &WfsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CatalogError::internal(format!("http client: {}", e)))?;
        Ok(Self {
            store,
            tiles,
            client,
            max_features: config.max_features,
        })
    }

    /// Fetch a WFS layer as GeoJSON.
    pub async fn fetch_layer(&self, wfs_url: &str, feature_type: &str) -> Result<FeatureCollection> {
        let url = get_feature_url(wfs_url, feature_type, self.max_features)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::upstream(0, format!("WFS request failed: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CatalogError::upstream(
                status.as_u16(),
                format!("WFS returned {}: {}", status, body),
            ));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| CatalogError::upstream(status.as_u16(), format!("WFS body: {}", e)))?;
        serde_json::from_str(&body)
            .map_err(|e| CatalogError::upstream(status.as_u16(), format!("WFS response is not GeoJSON: {}", e)))
    }

    /// Build (or rebuild) a sub-index.
    pub async fn create(&self, name: &str, wfs_url: &str, feature_type: &str) -> Result<SubIndexReport> {
        for (field, value) in [("name", name), ("wfsurl", wfs_url), ("featureType", feature_type)] {
            if value.trim().is_empty() {
                return Err(CatalogError::invalid(format!("{} is required", field)));
            }
        }
        let sub = SubIndex::new(self.store.keys(), name, wfs_url, feature_type);
        let layer = match self.fetch_layer(wfs_url, feature_type).await {
            Ok(layer) => layer,
            Err(e) => {
                warn!(name, wfs_url, error = %e, "sub-index build aborted");
                return Err(e);
            }
        };

        let map = TileMap::build(&layer.features);
        let members = self.cache_subindex(&sub, &map).await?;

        let kv = self.store.kv().as_ref();
        subindex::save_tiles(kv, &sub.key, &map).await?;
        let map = self.tiles.replace(&sub.key, map);
        subindex::register(kv, self.store.keys(), &sub).await?;
        info!(
            name,
            key = %sub.key,
            source_features = layer.features.len(),
            tiles = map.len(),
            members,
            "sub-index built"
        );
        Ok(SubIndexReport {
            sub_index: sub,
            source_features: layer.features.len(),
            tiles: map.len(),
            members,
        })
    }

    /// Bring a sub-index's sorted set in line with `map`: add every
    /// rankable global scene inside it, then remove members that no longer
    /// qualify. Returns the member count.
    pub async fn cache_subindex(&self, sub: &SubIndex, map: &TileMap) -> Result<usize> {
        let kv = self.store.kv();
        let wanted = self.matching_members(map).await?;
        for (raw, s) in &wanted {
            kv.zadd(&sub.key, *s, raw).await?;
        }

        let keep: HashSet<&str> = wanted.iter().map(|(raw, _)| raw.as_str()).collect();
        let mut stale = Vec::new();
        let mut offset = 0;
        loop {
            let batch = kv.zrevrange(&sub.key, offset, BATCH_SIZE).await?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len();
            stale.extend(
                batch
                    .into_iter()
                    .map(|(raw, _)| raw)
                    .filter(|raw| !keep.contains(raw.as_str())),
            );
        }
        for raw in &stale {
            kv.zrem(&sub.key, raw).await?;
        }
        debug!(key = %sub.key, members = wanted.len(), removed = stale.len(), "sub-index members synced");
        Ok(wanted.len())
    }

    /// Global index members whose scene falls inside `map`, with their
    /// sub-index scores.
    async fn matching_members(&self, map: &TileMap) -> Result<Vec<(String, f64)>> {
        let kv = self.store.kv();
        let mut out = Vec::new();
        let mut offset = 0;
        loop {
            let batch = kv.zrevrange(self.store.keys().global(), offset, BATCH_SIZE).await?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len();
            for (raw, _) in batch {
                let key = match member::decode(&raw) {
                    Ok(m) => m.key,
                    Err(e) => {
                        warn!(member = %raw, error = %e, "skipping malformed index member");
                        continue;
                    }
                };
                let Some(scene) = self.store.fetch_key(&key).await.unwrap_or_else(|e| {
                    warn!(key = %key, error = %e, "skipping unreadable scene");
                    None
                }) else {
                    continue;
                };
                match map.matches(&scene) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(id = %scene.id, error = %e, "skipping scene with unusable footprint");
                        continue;
                    }
                }
                let s = score::score(&scene);
                if score::is_rankable(s) {
                    out.push((raw, s));
                }
            }
        }
        Ok(out)
    }

    /// Tile map of a sub-index, loading the persisted copy on first use.
    pub async fn tile_map(&self, subindex_key: &str) -> Result<Option<Arc<TileMap>>> {
        if let Some(map) = self.tiles.get(subindex_key) {
            return Ok(Some(map));
        }
        match subindex::load_tiles(self.store.kv().as_ref(), subindex_key).await? {
            Some(map) => Ok(Some(self.tiles.replace(subindex_key, map))),
            None => Ok(None),
        }
    }

    /// Remove a sub-index by name.
    pub async fn drop_subindex(&self, name: &str) -> Result<SubIndex> {
        let kv = self.store.kv().as_ref();
        let sub = subindex::lookup(kv, self.store.keys(), name).await?;
        subindex::unregister(kv, self.store.keys(), &sub).await?;
        self.tiles.remove(&sub.key);
        info!(name, key = %sub.key, "sub-index dropped");
        Ok(sub)
    }

    pub async fn list(&self) -> Result<Vec<SubIndex>> {
        subindex::list(self.store.kv().as_ref(), self.store.keys()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scene_catalog_core::kv::memory::InMemoryKv;
    use scene_catalog_core::models::{props, BBox, Feature, Geometry};

    fn builder() -> SubIndexBuilder {
        let store = FeatureStore::new(Arc::new(InMemoryKv::new()), "sub-test");
        SubIndexBuilder::new(store, Arc::new(TileRegistry::new()), &WfsConfig::default()).unwrap()
    }

    fn scene(id: &str, bbox: BBox, cloud: f64) -> Feature {
        Feature::new(id)
            .with_geometry(Geometry::from_bbox(&bbox))
            .with_property(props::CLOUD_COVER, cloud)
            .with_property(props::ACQUIRED_DATE, "2024-03-01T10:00:00Z")
    }

    async fn put(b: &SubIndexBuilder, f: &Feature) -> String {
        b.store.put(f, score::score(f), false).await.unwrap();
        member::encode(b.store.keys(), &b.store.get(&f.id).await.unwrap()).unwrap()
    }

    fn layer(bbox: BBox) -> TileMap {
        TileMap::build(&[Feature::new("area").with_geometry(Geometry::from_bbox(&bbox))])
    }

    #[tokio::test]
    async fn test_cache_subindex_replaces_stale_members() {
        let b = builder();
        let kv = b.store.kv();
        let inside = put(&b, &scene("inside", BBox::new(10.0, 10.0, 10.5, 10.5), 1.0)).await;
        let outside = put(&b, &scene("outside", BBox::new(-60.0, -30.0, -59.5, -29.5), 1.0)).await;
        put(&b, &scene("cloudy", BBox::new(10.0, 10.0, 10.5, 10.5), 100.0)).await;

        let sub = SubIndex::new(b.store.keys(), "area", "http://wfs", "area");
        kv.zadd(&sub.key, 0.9, &outside).await.unwrap();
        kv.zadd(&sub.key, 0.5, &inside).await.unwrap();

        let members = b
            .cache_subindex(&sub, &layer(BBox::new(9.0, 9.0, 12.0, 12.0)))
            .await
            .unwrap();
        assert_eq!(members, 1);
        let ranked = kv.zrevrange(&sub.key, 0, 10).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, inside);
        assert!(kv.zscore(&sub.key, &outside).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_subindex_empty_layer_clears_members() {
        let b = builder();
        let kv = b.store.kv();
        let inside = put(&b, &scene("inside", BBox::new(10.0, 10.0, 10.5, 10.5), 1.0)).await;
        let sub = SubIndex::new(b.store.keys(), "area", "http://wfs", "area");
        kv.zadd(&sub.key, 0.5, &inside).await.unwrap();

        assert_eq!(b.cache_subindex(&sub, &TileMap::build(&[])).await.unwrap(), 0);
        assert_eq!(kv.zcard(&sub.key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_state() {
        let b = builder();
        let kv = b.store.kv();
        let inside = put(&b, &scene("inside", BBox::new(10.0, 10.0, 10.5, 10.5), 1.0)).await;
        let sub = SubIndex::new(b.store.keys(), "area", "http://wfs", "area");
        let map = layer(BBox::new(9.0, 9.0, 12.0, 12.0));
        let tiles = map.len();
        b.cache_subindex(&sub, &map).await.unwrap();
        b.tiles.replace(&sub.key, map);

        assert!(b.create("area", "http://127.0.0.1:9/wfs", "area").await.is_err());
        assert!(kv.zscore(&sub.key, &inside).await.unwrap().is_some());
        assert_eq!(b.tiles.get(&sub.key).map(|m| m.len()), Some(tiles));
    }

    #[test]
    fn test_get_feature_url() {
        let url = get_feature_url("http://wfs.example/geoserver/ows", "beachfront:coast", 9999).unwrap();
        assert_eq!(
            url.as_str(),
            "http://wfs.example/geoserver/ows?service=WFS&version=2.0.0&request=GetFeature\
             &typeName=beachfront%3Acoast&outputFormat=application%2Fjson&maxFeatures=9999"
        );
        assert!(get_feature_url("not a url", "x", 1).is_err());
    }
}
