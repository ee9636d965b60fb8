//! In-memory [`KvStore`] implementation for tests and single-process runs.
//!
//! A single `HashMap` behind `std::sync::RwLock` holds every key. Expiry is
//! lazy: an expired key is treated as absent on read and dropped on the next
//! write that touches it.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{CatalogError, Result};

use super::KvStore;

#[derive(Debug, Clone)]
struct Ranked {
    score: f64,
    seq: u64,
    member: String,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    // Highest score first, then first-inserted first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then(self.seq.cmp(&other.seq))
            .then_with(|| self.member.cmp(&other.member))
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    by_member: HashMap<String, (f64, u64)>,
    order: BTreeSet<Ranked>,
    next_seq: u64,
}

impl SortedSet {
    fn add(&mut self, score: f64, member: &str) {
        let seq = match self.by_member.get(member) {
            Some(&(old_score, seq)) => {
                self.order.remove(&Ranked {
                    score: old_score,
                    seq,
                    member: member.to_string(),
                });
                seq
            }
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.by_member.insert(member.to_string(), (score, seq));
        self.order.insert(Ranked {
            score,
            seq,
            member: member.to_string(),
        });
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.by_member.remove(member) {
            Some((score, seq)) => {
                self.order.remove(&Ranked {
                    score,
                    seq,
                    member: member.to_string(),
                });
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
enum Value {
    Blob(String),
    Set(BTreeSet<String>),
    Sorted(SortedSet),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Blob(_) => "blob",
            Value::Set(_) => "set",
            Value::Sorted(_) => "sorted set",
        }
    }
}

#[derive(Debug)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

fn wrong_kind(key: &str, expected: &str, found: &Value) -> CatalogError {
    CatalogError::internal(format!(
        "key {} holds a {}, expected a {}",
        key,
        found.kind(),
        expected
    ))
}

/// In-memory key-value store.
#[derive(Default)]
pub struct InMemoryKv {
    slots: RwLock<HashMap<String, Slot>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, key: &str, f: impl FnOnce(Option<&Value>) -> Result<T>) -> Result<T> {
        let slots = self
            .slots
            .read()
            .map_err(|_| CatalogError::internal("memory store lock poisoned"))?;
        let now = Instant::now();
        f(slots.get(key).filter(|s| s.live(now)).map(|s| &s.value))
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<String, Slot>) -> Result<T>) -> Result<T> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| CatalogError::internal("memory store lock poisoned"))?;
        f(&mut slots)
    }
}

/// Drop `key` if it has expired, so the caller sees a clean slot.
fn purge_expired(slots: &mut HashMap<String, Slot>, key: &str) {
    let now = Instant::now();
    if slots.get(key).is_some_and(|s| !s.live(now)) {
        slots.remove(key);
    }
}

fn deadline(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|d| Instant::now() + d)
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.read(key, |v| match v {
            None => Ok(None),
            Some(Value::Blob(s)) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_kind(key, "blob", other)),
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.write(|slots| {
            slots.insert(
                key.to_string(),
                Slot {
                    value: Value::Blob(value.to_string()),
                    expires_at: deadline(ttl),
                },
            );
            Ok(())
        })
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        self.write(|slots| {
            purge_expired(slots, key);
            if slots.contains_key(key) {
                return Ok(false);
            }
            slots.insert(
                key.to_string(),
                Slot {
                    value: Value::Blob(value.to_string()),
                    expires_at: deadline(ttl),
                },
            );
            Ok(true)
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.read(key, |v| Ok(v.is_some()))
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.write(|slots| {
            let now = Instant::now();
            Ok(slots.remove(key).is_some_and(|s| s.live(now)))
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        self.write(|slots| {
            purge_expired(slots, key);
            let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
                value: Value::Set(BTreeSet::new()),
                expires_at: None,
            });
            match &mut slot.value {
                Value::Set(set) => Ok(set.insert(member.to_string())),
                other => Err(wrong_kind(key, "set", other)),
            }
        })
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        self.write(|slots| {
            purge_expired(slots, key);
            let removed = match slots.get_mut(key).map(|s| &mut s.value) {
                None => false,
                Some(Value::Set(set)) => set.remove(member),
                Some(other) => return Err(wrong_kind(key, "set", other)),
            };
            if matches!(slots.get(key).map(|s| &s.value), Some(Value::Set(set)) if set.is_empty()) {
                slots.remove(key);
            }
            Ok(removed)
        })
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.read(key, |v| match v {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(other) => Err(wrong_kind(key, "set", other)),
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.read(key, |v| match v {
            None => Ok(false),
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(other) => Err(wrong_kind(key, "set", other)),
        })
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        if score.is_nan() {
            return Err(CatalogError::invalid(format!(
                "cannot add {} to {} with a NaN score",
                member, key
            )));
        }
        self.write(|slots| {
            purge_expired(slots, key);
            let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
                value: Value::Sorted(SortedSet::default()),
                expires_at: None,
            });
            match &mut slot.value {
                Value::Sorted(z) => {
                    z.add(score, member);
                    Ok(())
                }
                other => Err(wrong_kind(key, "sorted set", other)),
            }
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        self.write(|slots| {
            purge_expired(slots, key);
            let removed = match slots.get_mut(key).map(|s| &mut s.value) {
                None => false,
                Some(Value::Sorted(z)) => z.remove(member),
                Some(other) => return Err(wrong_kind(key, "sorted set", other)),
            };
            if matches!(slots.get(key).map(|s| &s.value), Some(Value::Sorted(z)) if z.by_member.is_empty())
            {
                slots.remove(key);
            }
            Ok(removed)
        })
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        self.read(key, |v| match v {
            None => Ok(None),
            Some(Value::Sorted(z)) => Ok(z.by_member.get(member).map(|&(score, _)| score)),
            Some(other) => Err(wrong_kind(key, "sorted set", other)),
        })
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        self.read(key, |v| match v {
            None => Ok(0),
            Some(Value::Sorted(z)) => Ok(z.by_member.len()),
            Some(other) => Err(wrong_kind(key, "sorted set", other)),
        })
    }

    async fn zrevrange(&self, key: &str, offset: usize, limit: usize) -> Result<Vec<(String, f64)>> {
        self.read(key, |v| match v {
            None => Ok(Vec::new()),
            Some(Value::Sorted(z)) => Ok(z
                .order
                .iter()
                .skip(offset)
                .take(limit)
                .map(|r| (r.member.clone(), r.score))
                .collect()),
            Some(other) => Err(wrong_kind(key, "sorted set", other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blob_roundtrip_and_nx() {
        let kv = InMemoryKv::new();
        assert!(kv.set_nx("k", "a", None).await.unwrap());
        assert!(!kv.set_nx("k", "b", None).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("a"));
        assert!(kv.del("k").await.unwrap());
        assert!(!kv.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry_frees_set_nx() {
        let kv = InMemoryKv::new();
        assert!(kv
            .set_nx("k", "a", Some(Duration::from_millis(20)))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
        assert!(kv.set_nx("k", "b", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_sorted_set_orders_desc_with_insertion_ties() {
        let kv = InMemoryKv::new();
        kv.zadd("z", 0.5, "b").await.unwrap();
        kv.zadd("z", 0.9, "a").await.unwrap();
        kv.zadd("z", 0.5, "c").await.unwrap();
        kv.zadd("z", 0.5, "aa").await.unwrap();
        let all: Vec<String> = kv
            .zrevrange("z", 0, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(all, vec!["a", "b", "c", "aa"]);

        // Re-scoring keeps insertion rank among ties.
        kv.zadd("z", 0.9, "c").await.unwrap();
        let top: Vec<String> = kv
            .zrevrange("z", 0, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(top, vec!["a", "c"]);
        assert_eq!(kv.zcard("z").await.unwrap(), 4);
        assert_eq!(kv.zscore("z", "c").await.unwrap(), Some(0.9));
    }

    #[tokio::test]
    async fn test_zrem_tolerates_missing_member() {
        let kv = InMemoryKv::new();
        assert!(!kv.zrem("z", "nope").await.unwrap());
        kv.zadd("z", 1.0, "m").await.unwrap();
        assert!(kv.zrem("z", "m").await.unwrap());
        assert!(!kv.zrem("z", "m").await.unwrap());
        assert_eq!(kv.zcard("z").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nan_score_rejected() {
        let kv = InMemoryKv::new();
        assert!(kv.zadd("z", f64::NAN, "m").await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_kind_is_an_error() {
        let kv = InMemoryKv::new();
        kv.set("k", "blob", None).await.unwrap();
        assert!(kv.zadd("k", 1.0, "m").await.is_err());
        assert!(kv.smembers("k").await.is_err());
    }

    #[tokio::test]
    async fn test_sets() {
        let kv = InMemoryKv::new();
        assert!(kv.sadd("s", "x").await.unwrap());
        assert!(!kv.sadd("s", "x").await.unwrap());
        kv.sadd("s", "y").await.unwrap();
        assert_eq!(kv.smembers("s").await.unwrap(), vec!["x", "y"]);
        assert!(kv.srem("s", "x").await.unwrap());
        assert_eq!(kv.smembers("s").await.unwrap(), vec!["y"]);
        assert!(kv.sismember("s", "y").await.unwrap());
        assert!(!kv.sismember("s", "x").await.unwrap());
        assert!(!kv.sismember("missing", "y").await.unwrap());
    }
}
