//! Sub-index registry.
//!
//! A sub-index is a sorted set holding the subset of the global index whose
//! footprints intersect a WFS layer. Its key is recorded in
//! `<prefix>-caches`, which is what delete paths walk to keep every index
//! consistent. Metadata and the persisted tile map live beside the set.

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};
use crate::keys::Keys;
use crate::kv::KvStore;
use crate::models::FeatureCollection;
use crate::tiles::TileMap;

/// Sub-index metadata, persisted as `<key>-meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubIndex {
    pub name: String,
    #[serde(rename = "wfsURL")]
    pub wfs_url: String,
    pub feature_type: String,
    pub key: String,
}

impl SubIndex {
    pub fn new(keys: &Keys, name: &str, wfs_url: &str, feature_type: &str) -> Self {
        Self {
            name: name.to_string(),
            wfs_url: wfs_url.to_string(),
            feature_type: feature_type.to_string(),
            key: keys.subindex(wfs_url, feature_type),
        }
    }
}

/// Record a sub-index and add it to `<prefix>-caches`.
pub async fn register(kv: &dyn KvStore, keys: &Keys, sub: &SubIndex) -> Result<()> {
    kv.set(
        &Keys::subindex_meta(&sub.key),
        &serde_json::to_string(sub)?,
        None,
    )
    .await?;
    kv.sadd(&keys.caches(), &sub.key).await?;
    Ok(())
}

/// Every registered sub-index with readable metadata, sorted by name.
pub async fn list(kv: &dyn KvStore, keys: &Keys) -> Result<Vec<SubIndex>> {
    let mut out = Vec::new();
    for key in kv.smembers(&keys.caches()).await? {
        if let Some(json) = kv.get(&Keys::subindex_meta(&key)).await? {
            match serde_json::from_str::<SubIndex>(&json) {
                Ok(sub) => out.push(sub),
                Err(e) => tracing::warn!(key = %key, error = %e, "unreadable sub-index metadata"),
            }
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Resolve a sub-index by name. A registered sorted-set key is accepted too.
pub async fn lookup(kv: &dyn KvStore, keys: &Keys, name: &str) -> Result<SubIndex> {
    list(kv, keys)
        .await?
        .into_iter()
        .find(|s| s.name == name || s.key == name)
        .ok_or_else(|| CatalogError::not_found(format!("sub-index {}", name)))
}

/// Remove a sub-index: set, metadata, tile map, and registration.
pub async fn unregister(kv: &dyn KvStore, keys: &Keys, sub: &SubIndex) -> Result<()> {
    kv.srem(&keys.caches(), &sub.key).await?;
    kv.del(&sub.key).await?;
    kv.del(&Keys::subindex_meta(&sub.key)).await?;
    kv.del(&Keys::subindex_tiles(&sub.key)).await?;
    Ok(())
}

pub async fn save_tiles(kv: &dyn KvStore, subindex_key: &str, map: &TileMap) -> Result<()> {
    let json = serde_json::to_string(&map.to_collection())?;
    kv.set(&Keys::subindex_tiles(subindex_key), &json, None).await
}

pub async fn load_tiles(kv: &dyn KvStore, subindex_key: &str) -> Result<Option<TileMap>> {
    let Some(json) = kv.get(&Keys::subindex_tiles(subindex_key)).await? else {
        return Ok(None);
    };
    let fc: FeatureCollection = serde_json::from_str(&json)
        .map_err(|e| CatalogError::internal(format!("corrupt tile map {}: {}", subindex_key, e)))?;
    Ok(Some(TileMap::from_collection(&fc)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::InMemoryKv;
    use crate::models::{BBox, Feature, Geometry};

    #[tokio::test]
    async fn test_register_lookup_unregister() {
        let kv = InMemoryKv::new();
        let keys = Keys::new("cat");
        let sub = SubIndex::new(&keys, "coast", "http://wfs/ows", "coastline");
        assert_eq!(sub.key, "cat:http://wfs/ows:coastline");

        register(&kv, &keys, &sub).await.unwrap();
        assert_eq!(lookup(&kv, &keys, "coast").await.unwrap(), sub);
        assert_eq!(lookup(&kv, &keys, &sub.key).await.unwrap(), sub);
        assert!(matches!(
            lookup(&kv, &keys, "nope").await,
            Err(CatalogError::NotFound(_))
        ));

        kv.zadd(&sub.key, 0.5, "m").await.unwrap();
        unregister(&kv, &keys, &sub).await.unwrap();
        assert!(list(&kv, &keys).await.unwrap().is_empty());
        assert_eq!(kv.zcard(&sub.key).await.unwrap(), 0);
    }

    #[test]
    fn test_metadata_json_shape() {
        let sub = SubIndex::new(&Keys::new("cat"), "coast", "http://wfs", "ft");
        let v = serde_json::to_value(&sub).unwrap();
        assert_eq!(v["wfsURL"], "http://wfs");
        assert_eq!(v["featureType"], "ft");
    }

    #[tokio::test]
    async fn test_tiles_persist() {
        let kv = InMemoryKv::new();
        assert!(load_tiles(&kv, "k").await.unwrap().is_none());
        let map = TileMap::build(&[Feature::new("t")
            .with_geometry(Geometry::from_bbox(&BBox::new(0.0, 0.0, 1.0, 1.0)))]);
        save_tiles(&kv, "k", &map).await.unwrap();
        assert_eq!(load_tiles(&kv, "k").await.unwrap().unwrap().len(), 1);
    }
}
