//! Discovery engine with result caching.
//!
//! A discovery request either scans immediately (`no_cache`) or goes
//! through a cache keyed by `<prefix><canonical query JSON>`. The cache
//! entry moves through three states, tracked by a marker at
//! `<cacheKey>-status`:
//!
//! ```text
//! absent ──set_nx("building")──▶ building ──producer writes──▶ ready
//!    ▲                               │                           │
//!    └──────── build failed / TTL ───┘◀───── TTL or eviction ─────┘
//! ```
//!
//! The caller that wins the `set_nx` spawns the producer, which scans the
//! whole sorted set, writes the rendered collection, and only then flips
//! the marker to `ready`. Every caller, winner included, polls the marker
//! and slices its page out of the finished collection.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use scene_catalog_core::features::FeatureStore;
use scene_catalog_core::filter::QueryFilter;
use scene_catalog_core::keys::Keys;
use scene_catalog_core::models::{props, Feature, ImageDescriptors};
use scene_catalog_core::scan::{self, Window};
use scene_catalog_core::subindex;
use scene_catalog_core::{CatalogError, Result};

use crate::config::DiscoveryConfig;

const BUILDING: &str = "building";
const READY: &str = "ready";

/// Per-request discovery options.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryOptions {
    /// First rank to return.
    pub minimum_index: usize,
    /// Last rank to return; negative means `minimum_index + count - 1`.
    pub maximum_index: i64,
    /// Page size. Capped at the configured maximum unless `no_cache`.
    pub count: usize,
    pub no_cache: bool,
    pub rigorous: bool,
    /// Sub-index name; scans the global index when `None`.
    pub sub_index: Option<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            minimum_index: 0,
            maximum_index: -1,
            count: 20,
            no_cache: false,
            rigorous: false,
            sub_index: None,
        }
    }
}

#[derive(Clone)]
pub struct Discovery {
    store: FeatureStore,
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(store: FeatureStore, config: DiscoveryConfig) -> Self {
        Self { store, config }
    }

    /// Inclusive rank range for a request.
    fn ranks(&self, opts: &DiscoveryOptions) -> (usize, usize) {
        let mut count = if opts.count == 0 {
            self.config.default_count
        } else {
            opts.count
        };
        if !opts.no_cache {
            count = count.min(self.config.max_count);
        }
        let min = opts.minimum_index;
        let last_in_page = min.saturating_add(count).saturating_sub(1);
        let max = if opts.maximum_index < 0 {
            last_in_page
        } else {
            (opts.maximum_index as usize).min(last_in_page)
        };
        (min, max)
    }

    /// The query as it is fingerprinted: options that change the result
    /// are folded into its properties.
    fn keyed_query(query: &Feature, opts: &DiscoveryOptions) -> Feature {
        let mut keyed = query.clone();
        if opts.rigorous {
            keyed.set_property(props::RIGOROUS, true);
        }
        if let Some(name) = &opts.sub_index {
            keyed.set_property(props::SUB_INDEX, name.as_str());
        }
        keyed
    }

    /// Parse the filter and pick the sorted set to scan.
    async fn plan(&self, query: &Feature) -> Result<(QueryFilter, String)> {
        let mut filter = QueryFilter::from_query(query, false)?;
        let index_key = match &filter.sub_index_name {
            Some(name) => {
                let sub = subindex::lookup(self.store.kv().as_ref(), self.store.keys(), name).await?;
                filter.sub_index_key = Some(sub.key.clone());
                sub.key
            }
            None => self.store.keys().global().to_string(),
        };
        Ok((filter, index_key))
    }

    pub fn cache_key(&self, query: &Feature, opts: &DiscoveryOptions) -> Result<String> {
        let canonical = Self::keyed_query(query, opts).canonical_json()?;
        Ok(self.store.keys().discovery(&canonical))
    }

    /// Run a discovery request. Returns the page and its rendered JSON.
    pub async fn get_scenes(
        &self,
        query: Option<&Feature>,
        opts: &DiscoveryOptions,
    ) -> Result<(ImageDescriptors, String)> {
        let query = query.ok_or_else(|| CatalogError::invalid("query feature is required"))?;
        let keyed = Self::keyed_query(query, opts);
        let (filter, index_key) = self.plan(&keyed).await?;
        let (min, max) = self.ranks(opts);

        if opts.no_cache {
            let features = scan::scan(&self.store, &index_key, &filter, Window::ranks(min, max)).await?;
            let page = ImageDescriptors::new(features, min, None);
            let rendered = page.render()?;
            return Ok((page, rendered));
        }

        let cache_key = self.store.keys().discovery(&keyed.canonical_json()?);
        let full = self.cached_collection(&cache_key, filter, index_key).await?;
        let page = full.page(min, max);
        let rendered = page.render()?;
        Ok((page, rendered))
    }

    /// Wait for (and if needed start) the build of a cache entry.
    async fn cached_collection(
        &self,
        cache_key: &str,
        filter: QueryFilter,
        index_key: String,
    ) -> Result<ImageDescriptors> {
        let kv = self.store.kv();
        let status_key = Keys::discovery_status(cache_key);

        for _ in 0..self.config.max_polls {
            match kv.get(&status_key).await?.as_deref() {
                Some(READY) => match kv.get(cache_key).await? {
                    Some(json) => {
                        return serde_json::from_str(&json).map_err(|e| {
                            CatalogError::internal(format!("corrupt discovery cache entry: {}", e))
                        });
                    }
                    None => {
                        debug!(key = %cache_key, "ready marker without collection; rebuilding");
                        kv.del(&status_key).await?;
                        continue;
                    }
                },
                Some(_) => {}
                None => {
                    if kv
                        .set_nx(&status_key, BUILDING, Some(self.config.build_timeout()))
                        .await?
                    {
                        self.spawn_build(cache_key.to_string(), filter.clone(), index_key.clone());
                    }
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
        Err(CatalogError::internal(format!(
            "discovery result not ready after {} polls",
            self.config.max_polls
        )))
    }

    fn spawn_build(&self, cache_key: String, filter: QueryFilter, index_key: String) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.build(&cache_key, &filter, &index_key).await {
                error!(key = %cache_key, error = %e, "discovery build failed");
                if let Err(e) = this.store.kv().del(&Keys::discovery_status(&cache_key)).await {
                    warn!(key = %cache_key, error = %e, "failed to clear discovery build marker");
                }
            }
        });
    }

    async fn build(&self, cache_key: &str, filter: &QueryFilter, index_key: &str) -> Result<()> {
        let started = std::time::Instant::now();
        let features = scan::scan(&self.store, index_key, filter, Window::all()).await?;
        let total = features.len();
        let collection = ImageDescriptors::new(features, 0, Some(total));
        let ttl = Some(self.config.cache_ttl());
        let kv = self.store.kv();

        kv.set(cache_key, &collection.render()?, ttl).await?;
        kv.sadd(&self.store.keys().discoveries(), cache_key).await?;
        kv.set(&Keys::discovery_status(cache_key), READY, ttl).await?;
        info!(
            index = %index_key,
            scenes = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "discovery result cached"
        );
        Ok(())
    }

    /// Drop every cached discovery result.
    pub async fn evict_all(&self) -> Result<usize> {
        let kv = self.store.kv();
        let registry = self.store.keys().discoveries();
        let keys = kv.smembers(&registry).await?;
        for key in &keys {
            kv.del(key).await?;
            kv.del(&Keys::discovery_status(key)).await?;
        }
        kv.del(&registry).await?;
        Ok(keys.len())
    }
}

/// Smallest poll interval the engine will use.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[cfg(test)]
mod tests {
    use super::*;
    use scene_catalog_core::kv::memory::InMemoryKv;
    use scene_catalog_core::kv::KvStore;
    use std::sync::Arc;

    fn engine() -> Discovery {
        let store = FeatureStore::new(Arc::new(InMemoryKv::new()), "catalog-test");
        let config = DiscoveryConfig {
            poll_interval_ms: MIN_POLL_INTERVAL.as_millis() as u64,
            max_polls: 50,
            ..DiscoveryConfig::default()
        };
        Discovery::new(store, config)
    }

    fn no_cache() -> DiscoveryOptions {
        DiscoveryOptions {
            no_cache: true,
            ..Default::default()
        }
    }

    async fn seed_one(d: &Discovery) {
        let f = Feature::new("12345").with_property("name", "Whatever");
        d.store.put(&f, 1.0, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_nil_query_is_invalid() {
        let d = engine();
        seed_one(&d).await;
        let err = d.get_scenes(None, &no_cache()).await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_no_cache_empty_query() {
        let d = engine();
        seed_one(&d).await;
        let (page, rendered) = d
            .get_scenes(Some(&Feature::default()), &no_cache())
            .await
            .unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.features[0].id, "12345");
        assert!(rendered.contains("\"12345\""));
        assert!(!d.store.kv().exists("catalog-test{\"type\":\"Feature\",\"geometry\":null}").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cached_query_converges_on_one_build() {
        let d = engine();
        seed_one(&d).await;
        let q = Feature::default();
        let opts = DiscoveryOptions::default();
        assert_eq!(
            d.cache_key(&q, &opts).unwrap(),
            r#"catalog-test{"type":"Feature","geometry":null}"#
        );

        let (a, b) = tokio::join!(d.get_scenes(Some(&q), &opts), d.get_scenes(Some(&q), &opts));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.1, b.1);
        assert_eq!(a.0.count, 1);

        let kv = d.store.kv();
        let key = r#"catalog-test{"type":"Feature","geometry":null}"#;
        assert!(kv.get(key).await.unwrap().is_some());
        assert_eq!(
            kv.get(&Keys::discovery_status(key)).await.unwrap().as_deref(),
            Some(READY)
        );
    }

    #[tokio::test]
    async fn test_cached_and_uncached_pages_agree() {
        let d = engine();
        for i in 0..8 {
            let f = Feature::new(format!("s{}", i)).with_property(props::CLOUD_COVER, (i * 10) as f64);
            d.store.put(&f, 1.0 - i as f64 / 10.0, false).await.unwrap();
        }
        let q = Feature::default().with_property(props::CLOUD_COVER, 50);
        let page = |no_cache| DiscoveryOptions {
            minimum_index: 2,
            maximum_index: 4,
            no_cache,
            ..Default::default()
        };
        let (uncached, _) = d.get_scenes(Some(&q), &page(true)).await.unwrap();
        let (cached, _) = d.get_scenes(Some(&q), &page(false)).await.unwrap();
        assert_eq!(uncached.features, cached.features);
        assert_eq!(cached.start_index, 2);
        assert_eq!(cached.total_count, Some(6));
    }

    #[tokio::test]
    async fn test_inverted_range_is_empty_on_both_paths() {
        let d = engine();
        for i in 0..8 {
            d.store.put(&Feature::new(format!("s{}", i)), 1.0 - i as f64 / 10.0, false).await.unwrap();
        }
        let q = Feature::default();
        let page = |no_cache| DiscoveryOptions {
            minimum_index: 5,
            maximum_index: 1,
            no_cache,
            ..Default::default()
        };
        assert_eq!(d.ranks(&page(true)), (5, 1));
        let (uncached, _) = d.get_scenes(Some(&q), &page(true)).await.unwrap();
        let (cached, _) = d.get_scenes(Some(&q), &page(false)).await.unwrap();
        assert!(uncached.features.is_empty());
        assert_eq!(uncached.features, cached.features);
    }

    #[tokio::test]
    async fn test_unscored_scene_is_not_discovered() {
        let d = engine();
        d.store.put(&Feature::new("scored"), 0.4, false).await.unwrap();
        d.store.put(&Feature::new("unscored"), f64::NAN, false).await.unwrap();
        let q = Feature::default();
        let (uncached, _) = d.get_scenes(Some(&q), &no_cache()).await.unwrap();
        let ids: Vec<&str> = uncached.features.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["scored"]);
        let (cached, _) = d.get_scenes(Some(&q), &DiscoveryOptions::default()).await.unwrap();
        assert_eq!(cached.features, uncached.features);
    }

    #[tokio::test]
    async fn test_failed_build_clears_marker() {
        let d = engine();
        let kv = d.store.kv();
        // A blob under the global index key makes the scan fail.
        kv.set("catalog-test", "not a sorted set", None).await.unwrap();
        let cache_key = "catalog-test{\"broken\":true}".to_string();
        let status = Keys::discovery_status(&cache_key);
        kv.set(&status, BUILDING, None).await.unwrap();

        d.spawn_build(cache_key.clone(), QueryFilter::default(), "catalog-test".to_string());
        for _ in 0..50 {
            if !kv.exists(&status).await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!kv.exists(&status).await.unwrap());
        assert!(kv.get(&cache_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_count_cap_and_open_maximum() {
        let d = engine();
        let opts = DiscoveryOptions {
            minimum_index: 10,
            count: 5000,
            ..Default::default()
        };
        assert_eq!(d.ranks(&opts), (10, 1009));
        let uncapped = DiscoveryOptions {
            no_cache: true,
            ..opts.clone()
        };
        assert_eq!(d.ranks(&uncapped), (10, 5009));
    }

    #[tokio::test]
    async fn test_evicted_ready_marker_rebuilds() {
        let d = engine();
        seed_one(&d).await;
        let q = Feature::default();
        let opts = DiscoveryOptions::default();
        d.get_scenes(Some(&q), &opts).await.unwrap();

        // Collection gone but marker still ready: the next call rebuilds.
        let key = d.cache_key(&q, &opts).unwrap();
        d.store.kv().del(&key).await.unwrap();
        let (page, _) = d.get_scenes(Some(&q), &opts).await.unwrap();
        assert_eq!(page.count, 1);

        assert_eq!(d.evict_all().await.unwrap(), 1);
        assert!(!d.store.kv().exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_sub_index_not_found() {
        let d = engine();
        let opts = DiscoveryOptions {
            sub_index: Some("missing".to_string()),
            ..no_cache()
        };
        let err = d.get_scenes(Some(&Feature::default()), &opts).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }
}
