//! Key-value and sorted-set storage abstraction.
//!
//! The [`KvStore`] trait is the only shared mutable state in the catalog.
//! Every critical section is a single atomic call on it (set-if-absent,
//! set-add, sorted-set-add), so callers never take in-process locks.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Abstract blob / set / sorted-set store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](KvStore::get) / [`set`](KvStore::set) | Blob by key, optional TTL |
/// | [`set_nx`](KvStore::set_nx) | Atomic set-if-absent |
/// | [`del`](KvStore::del) | Remove a key of any kind |
/// | [`sadd`](KvStore::sadd) / [`srem`](KvStore::srem) / [`smembers`](KvStore::smembers) / [`sismember`](KvStore::sismember) | String sets |
/// | [`zadd`](KvStore::zadd) / [`zrem`](KvStore::zrem) / [`zscore`](KvStore::zscore) | Sorted sets |
/// | [`zrevrange`](KvStore::zrevrange) | Rank range, highest score first |
///
/// Sorted sets order by score descending; equal scores keep first-insertion
/// order. Re-adding a member updates its score but not its insertion rank.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Set only if the key is absent (or expired). Returns whether it was set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove a key of any kind. Returns whether anything was removed.
    async fn del(&self, key: &str) -> Result<bool>;

    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;

    async fn srem(&self, key: &str, member: &str) -> Result<bool>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    /// Add or re-score a member. `score` must not be `NaN`.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()>;

    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;

    async fn zcard(&self, key: &str) -> Result<usize>;

    /// Up to `limit` members starting at rank `offset`, highest score first.
    async fn zrevrange(&self, key: &str, offset: usize, limit: usize) -> Result<Vec<(String, f64)>>;
}
