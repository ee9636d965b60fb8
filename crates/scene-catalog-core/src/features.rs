//! Feature store: scene blobs plus the global scored index.
//!
//! Write ordering is the consistency contract. A put writes the blob before
//! the index member, and a delete removes index members before the blob, so
//! the only transient inconsistency a reader can observe is a member whose
//! blob is already gone. Scans skip those.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{CatalogError, Result};
use crate::geometry;
use crate::keys::Keys;
use crate::kv::KvStore;
use crate::member;
use crate::models::{Feature, Properties};

/// Scenes stored as JSON blobs under `<prefix>:<id>`, ranked in the global
/// sorted set `<prefix>`.
#[derive(Clone)]
pub struct FeatureStore {
    kv: Arc<dyn KvStore>,
    keys: Keys,
}

impl FeatureStore {
    pub fn new(kv: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            keys: Keys::new(prefix),
        }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Fill in the envelope from the geometry when the scene lacks one.
    fn with_envelope(feature: &Feature) -> Result<Feature> {
        let mut f = feature.clone();
        if f.bbox.is_none() {
            if let Some(g) = &f.geometry {
                f.bbox = geometry::envelope(g)?;
            }
        }
        Ok(f)
    }

    /// Store a scene and rank it in the global index.
    ///
    /// A `NaN` score ranks the scene at `0` and records its id in
    /// `<prefix>-unscored`; scans skip it until it is re-put with a score.
    pub async fn put(&self, feature: &Feature, score: f64, overwrite: bool) -> Result<String> {
        if feature.id.is_empty() {
            return Err(CatalogError::invalid("feature id must not be empty"));
        }
        let feature = Self::with_envelope(feature)?;
        let blob_key = self.keys.scene(&feature.id);
        let blob = serde_json::to_string(&feature)?;
        let new_member = member::encode(&self.keys, &feature)?;

        if overwrite {
            if let Some(previous) = self.fetch(&feature.id).await? {
                let old_member = member::encode(&self.keys, &previous)?;
                if old_member != new_member {
                    self.unrank(&old_member).await?;
                }
            }
            self.kv.set(&blob_key, &blob, None).await?;
        } else if !self.kv.set_nx(&blob_key, &blob, None).await? {
            return Err(CatalogError::already_exists(feature.id.clone()));
        }

        let unscored = self.keys.unscored();
        if score.is_nan() {
            self.kv.zadd(self.keys.global(), 0.0, &new_member).await?;
            self.kv.sadd(&unscored, &feature.id).await?;
        } else {
            self.kv.zadd(self.keys.global(), score, &new_member).await?;
            self.kv.srem(&unscored, &feature.id).await?;
        }
        debug!(id = %feature.id, score, "stored scene");
        Ok(feature.id)
    }

    /// The stored scene, or `None`.
    pub async fn fetch(&self, id: &str) -> Result<Option<Feature>> {
        self.fetch_key(&self.keys.scene(id)).await
    }

    /// The scene stored under a `<prefix>:<id>` blob key, or `None`.
    pub async fn fetch_key(&self, blob_key: &str) -> Result<Option<Feature>> {
        match self.kv.get(blob_key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json).map_err(|e| {
                CatalogError::internal(format!("corrupt scene blob {}: {}", blob_key, e))
            })?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Feature> {
        self.fetch(id)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("scene {}", id)))
    }

    /// Overlay `patch` onto a scene's properties. A `null` value removes the
    /// key. Geometry and bbox never change on this path. When the encoded
    /// member changes, every index holding it is re-keyed at its old score.
    pub async fn update_properties(&self, id: &str, patch: &Properties) -> Result<Feature> {
        let mut feature = self.get(id).await?;
        let old_member = member::encode(&self.keys, &feature)?;
        for (k, v) in patch {
            match v {
                Value::Null => {
                    feature.properties.remove(k);
                }
                v => {
                    feature.properties.insert(k.clone(), v.clone());
                }
            }
        }
        let new_member = member::encode(&self.keys, &feature)?;
        self.kv
            .set(&self.keys.scene(id), &serde_json::to_string(&feature)?, None)
            .await?;

        if new_member != old_member {
            let mut indexes = vec![self.keys.global().to_string()];
            indexes.extend(self.kv.smembers(&self.keys.caches()).await?);
            for index in indexes {
                if let Some(score) = self.kv.zscore(&index, &old_member).await? {
                    self.kv.zrem(&index, &old_member).await?;
                    self.kv.zadd(&index, score, &new_member).await?;
                }
            }
        }
        Ok(feature)
    }

    /// Remove a member from the global index and every registered sub-index.
    async fn unrank(&self, member: &str) -> Result<()> {
        self.kv.zrem(self.keys.global(), member).await?;
        for subindex in self.kv.smembers(&self.keys.caches()).await? {
            self.kv.zrem(&subindex, member).await?;
        }
        Ok(())
    }

    /// Remove a scene: index memberships first, then the blob. Members that
    /// are already gone are not an error.
    pub async fn delete(&self, feature: &Feature) -> Result<()> {
        let feature = Self::with_envelope(feature)?;
        let member = member::encode(&self.keys, &feature)?;
        self.unrank(&member).await?;
        self.kv.srem(&self.keys.unscored(), &feature.id).await?;
        self.kv.del(&self.keys.scene(&feature.id)).await?;
        debug!(id = %feature.id, "deleted scene");
        Ok(())
    }

    /// Look up a scene by id and delete it.
    pub async fn delete_by_id(&self, id: &str) -> Result<Feature> {
        let feature = self.get(id).await?;
        self.delete(&feature).await?;
        Ok(feature)
    }

    /// Cardinality of the global index.
    pub async fn size(&self) -> Result<usize> {
        self.kv.zcard(self.keys.global()).await
    }

    /// Empty the global index. Blobs stay in place.
    pub async fn drop_index(&self) -> Result<()> {
        self.kv.del(self.keys.global()).await?;
        self.kv.del(&self.keys.unscored()).await?;
        Ok(())
    }

    /// Ids stored with a `NaN` score.
    pub async fn unscored(&self) -> Result<Vec<String>> {
        self.kv.smembers(&self.keys.unscored()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::InMemoryKv;
    use crate::models::{props, BBox, Geometry};
    use serde_json::json;

    fn store() -> FeatureStore {
        FeatureStore::new(Arc::new(InMemoryKv::new()), "catalog-test")
    }

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let fs = store();
        let f = Feature::new("12345").with_property("name", "Whatever");
        fs.put(&f, 1.0, false).await.unwrap();
        assert_eq!(fs.get("12345").await.unwrap(), f);
        assert_eq!(fs.size().await.unwrap(), 1);

        let err = fs.put(&f, 1.0, false).await.unwrap_err();
        assert!(matches!(err, CatalogError::AlreadyExists(_)));

        fs.put(&f, 1.0, true).await.unwrap();
        assert_eq!(fs.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_nan_score_is_recorded_unscored() {
        let fs = store();
        fs.put(&Feature::new("a"), f64::NAN, false).await.unwrap();
        assert_eq!(fs.unscored().await.unwrap(), vec!["a"]);
        assert_eq!(fs.size().await.unwrap(), 1);

        fs.put(&Feature::new("a"), 0.4, true).await.unwrap();
        assert!(fs.unscored().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_derives_bbox_from_geometry() {
        let fs = store();
        let bbox = BBox::new(1.0, 2.0, 3.0, 4.0);
        let f = Feature::new("g").with_geometry(Geometry::from_bbox(&bbox));
        fs.put(&f, 0.5, false).await.unwrap();
        assert_eq!(fs.get("g").await.unwrap().bbox, Some(bbox));
    }

    #[tokio::test]
    async fn test_update_properties_reencodes_member() {
        let fs = store();
        let f = Feature::new("u").with_property(props::CLOUD_COVER, 10.0);
        fs.put(&f, 0.7, false).await.unwrap();

        let mut patch = Properties::new();
        patch.insert(props::CLOUD_COVER.to_string(), json!(20.0));
        patch.insert("gone".to_string(), Value::Null);
        let updated = fs.update_properties("u", &patch).await.unwrap();
        assert_eq!(updated.cloud_cover(), Some(20.0));

        let members = fs.kv().zrevrange(fs.keys().global(), 0, 10).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0, "catalog-test:u&null,20");
        assert_eq!(members[0].1, 0.7);
    }

    #[tokio::test]
    async fn test_delete_removes_subindex_membership() {
        let fs = store();
        let f = Feature::new("d");
        fs.put(&f, 0.5, false).await.unwrap();
        let m = member::encode(fs.keys(), &f).unwrap();
        let sub = fs.keys().subindex("http://wfs", "coast");
        fs.kv().sadd(&fs.keys().caches(), &sub).await.unwrap();
        fs.kv().zadd(&sub, 0.5, &m).await.unwrap();

        fs.delete_by_id("d").await.unwrap();
        assert_eq!(fs.size().await.unwrap(), 0);
        assert_eq!(fs.kv().zcard(&sub).await.unwrap(), 0);
        assert!(matches!(
            fs.get("d").await.unwrap_err(),
            CatalogError::NotFound(_)
        ));
        // A second delete of the same feature is tolerated.
        fs.delete(&f).await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_index_keeps_blobs() {
        let fs = store();
        fs.put(&Feature::new("x"), 0.5, false).await.unwrap();
        fs.drop_index().await.unwrap();
        assert_eq!(fs.size().await.unwrap(), 0);
        assert!(fs.get("x").await.is_ok());
    }
}
