//! SQLite-backed [`KvStore`] implementation.
//!
//! Blobs, sets, and sorted sets each live in their own table (see
//! [`migrate`](crate::migrate)). Expiry is stored as unix milliseconds and
//! checked on read; expired rows are purged by the next write to the key.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use scene_catalog_core::kv::KvStore;
use scene_catalog_core::{CatalogError, Result};

/// SQLite implementation of the [`KvStore`] trait.
pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn store_err(e: sqlx::Error) -> CatalogError {
    CatalogError::internal(format!("sqlite: {}", e))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn expiry(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|d| now_millis() + d.as_millis() as i64)
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT value FROM kv_blobs WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_blobs (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry(ttl))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query("DELETE FROM kv_blobs WHERE key = ? AND expires_at IS NOT NULL AND expires_at <= ?")
            .bind(key)
            .bind(now_millis())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        let inserted = sqlx::query(
            "INSERT INTO kv_blobs (key, value, expires_at) VALUES (?, ?, ?) ON CONFLICT(key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .bind(expiry(ttl))
        .execute(&mut *tx)
        .await
        .map_err(store_err)?
        .rows_affected();

        tx.commit().await.map_err(store_err)?;
        Ok(inserted == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let found: i64 = sqlx::query_scalar(
            r#"
            SELECT
                EXISTS(SELECT 1 FROM kv_blobs WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2))
                OR EXISTS(SELECT 1 FROM kv_sets WHERE key = ?1)
                OR EXISTS(SELECT 1 FROM kv_zsets WHERE key = ?1)
            "#,
        )
        .bind(key)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(found != 0)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let mut removed = 0;
        for sql in [
            "DELETE FROM kv_blobs WHERE key = ?",
            "DELETE FROM kv_sets WHERE key = ?",
            "DELETE FROM kv_zsets WHERE key = ?",
        ] {
            removed += sqlx::query(sql)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?
                .rows_affected();
        }
        tx.commit().await.map_err(store_err)?;
        Ok(removed > 0)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let added = sqlx::query(
            "INSERT INTO kv_sets (key, member) VALUES (?, ?) ON CONFLICT(key, member) DO NOTHING",
        )
        .bind(key)
        .bind(member)
        .execute(&self.pool)
        .await
        .map_err(store_err)?
        .rows_affected();
        Ok(added == 1)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM kv_sets WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await
            .map_err(store_err)?
            .rows_affected();
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT member FROM kv_sets WHERE key = ? ORDER BY member")
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.iter().map(|r| r.get::<String, _>("member")).collect())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let found: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM kv_sets WHERE key = ? AND member = ?)")
                .bind(key)
                .bind(member)
                .fetch_one(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(found != 0)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        if score.is_nan() {
            return Err(CatalogError::internal("sorted-set score must not be NaN"));
        }
        sqlx::query(
            r#"
            INSERT INTO kv_zsets (key, member, score, seq)
            VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(seq), 0) + 1 FROM kv_zsets WHERE key = ?1))
            ON CONFLICT(key, member) DO UPDATE SET score = excluded.score
            "#,
        )
        .bind(key)
        .bind(member)
        .bind(score)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM kv_zsets WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await
            .map_err(store_err)?
            .rows_affected();
        Ok(removed > 0)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let score: Option<f64> =
            sqlx::query_scalar("SELECT score FROM kv_zsets WHERE key = ? AND member = ?")
                .bind(key)
                .bind(member)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(score)
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_zsets WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(n as usize)
    }

    async fn zrevrange(&self, key: &str, offset: usize, limit: usize) -> Result<Vec<(String, f64)>> {
        let rows = sqlx::query(
            "SELECT member, score FROM kv_zsets WHERE key = ? ORDER BY score DESC, seq ASC LIMIT ? OFFSET ?",
        )
        .bind(key)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("member"), r.get::<f64, _>("score")))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn open() -> (tempfile::TempDir, SqliteKv) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("kv.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (dir, SqliteKv::new(pool))
    }

    #[tokio::test]
    async fn test_blob_set_nx_and_ttl() {
        let (_dir, kv) = open().await;
        assert!(kv.set_nx("a", "1", None).await.unwrap());
        assert!(!kv.set_nx("a", "2", None).await.unwrap());
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));

        kv.set("t", "x", Some(Duration::from_millis(50))).await.unwrap();
        assert!(kv.exists("t").await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(kv.get("t").await.unwrap(), None);
        assert!(kv.set_nx("t", "y", None).await.unwrap());

        assert!(kv.del("a").await.unwrap());
        assert!(!kv.del("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_sorted_set_order_and_ties() {
        let (_dir, kv) = open().await;
        kv.zadd("z", 0.5, "first").await.unwrap();
        kv.zadd("z", 0.9, "best").await.unwrap();
        kv.zadd("z", 0.5, "second").await.unwrap();
        // Re-scoring keeps the original insertion rank.
        kv.zadd("z", 0.5, "first").await.unwrap();

        let all = kv.zrevrange("z", 0, 10).await.unwrap();
        let members: Vec<&str> = all.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["best", "first", "second"]);
        assert_eq!(kv.zrevrange("z", 1, 1).await.unwrap()[0].0, "first");
        assert_eq!(kv.zcard("z").await.unwrap(), 3);
        assert_eq!(kv.zscore("z", "best").await.unwrap(), Some(0.9));
        assert!(kv.zadd("z", f64::NAN, "bad").await.is_err());

        assert!(kv.zrem("z", "best").await.unwrap());
        assert!(!kv.zrem("z", "best").await.unwrap());
    }

    #[tokio::test]
    async fn test_sets() {
        let (_dir, kv) = open().await;
        assert!(kv.sadd("s", "b").await.unwrap());
        assert!(kv.sadd("s", "a").await.unwrap());
        assert!(!kv.sadd("s", "a").await.unwrap());
        assert_eq!(kv.smembers("s").await.unwrap(), vec!["a", "b"]);
        assert!(kv.sismember("s", "a").await.unwrap());
        assert!(kv.srem("s", "a").await.unwrap());
        assert!(!kv.sismember("s", "a").await.unwrap());
        assert!(kv.sismember("s", "b").await.unwrap());
        assert!(kv.del("s").await.unwrap());
        assert!(kv.smembers("s").await.unwrap().is_empty());
    }
}
