//! Scored-range scans.
//!
//! Walks a sorted set from the highest score down, in batches, and yields
//! the scenes that pass a [`QueryFilter`]. Each member is first checked
//! against its encoded bbox and cloud cover; only survivors pay for a blob
//! fetch and the full filter.
//!
//! Bad members and unreadable blobs are logged and skipped. A member whose
//! blob is gone was deleted mid-scan and is skipped silently.

use tracing::{debug, warn};

use crate::error::Result;
use crate::features::FeatureStore;
use crate::filter::QueryFilter;
use crate::member;
use crate::models::Feature;

/// Members fetched per sorted-set range call.
pub const BATCH_SIZE: usize = 256;

/// Rank window over the *filtered* result: skip `skip` passing scenes, then
/// collect up to `take` (all remaining when `None`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub skip: usize,
    pub take: Option<usize>,
}

impl Window {
    pub fn all() -> Self {
        Self::default()
    }

    /// Inclusive rank range `[min, max]`. Empty when `max < min`.
    pub fn ranks(min: usize, max: usize) -> Self {
        Self {
            skip: min,
            take: Some(if max < min { 0 } else { max - min + 1 }),
        }
    }
}

/// Scan `index_key` and collect passing scenes in score order.
pub async fn scan(
    store: &FeatureStore,
    index_key: &str,
    filter: &QueryFilter,
    window: Window,
) -> Result<Vec<Feature>> {
    let kv = store.kv().as_ref();
    let mut out = Vec::new();
    let mut skipped = 0usize;
    let mut offset = 0usize;
    let unscored = store.keys().unscored();

    if window.take == Some(0) {
        return Ok(out);
    }

    loop {
        let batch = kv.zrevrange(index_key, offset, BATCH_SIZE).await?;
        if batch.is_empty() {
            break;
        }
        offset += batch.len();

        for (raw, score) in batch {
            let decoded = match member::decode(&raw) {
                Ok(m) => m,
                Err(e) => {
                    warn!(member = %raw, error = %e, "skipping malformed index member");
                    continue;
                }
            };
            // Unscored scenes sit at 0 in the global index but are never ranked.
            if score == 0.0 {
                let id = store.keys().scene_id(&decoded.key).unwrap_or_default();
                if kv.sismember(&unscored, id).await? {
                    continue;
                }
            }
            if !filter.prefilter(&decoded) {
                continue;
            }
            let scene = match store.fetch_key(&decoded.key).await {
                Ok(Some(scene)) => scene,
                Ok(None) => {
                    debug!(key = %decoded.key, "index member without blob");
                    continue;
                }
                Err(e) => {
                    warn!(key = %decoded.key, error = %e, "skipping unreadable scene");
                    continue;
                }
            };
            if !filter.passes(kv, &scene, &raw).await? {
                continue;
            }
            if skipped < window.skip {
                skipped += 1;
                continue;
            }
            out.push(scene);
            if window.take.is_some_and(|t| out.len() >= t) {
                return Ok(out);
            }
        }
    }
    Ok(out)
}
