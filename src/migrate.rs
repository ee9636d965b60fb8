use anyhow::Result;
use sqlx::SqlitePool;

/// Create the key-value tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Plain blobs, optionally expiring (unix millis)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_blobs (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // String sets
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_sets (
            key TEXT NOT NULL,
            member TEXT NOT NULL,
            PRIMARY KEY (key, member)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Sorted sets; seq is the first-insertion order used to break score ties
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_zsets (
            key TEXT NOT NULL,
            member TEXT NOT NULL,
            score REAL NOT NULL,
            seq INTEGER NOT NULL,
            PRIMARY KEY (key, member)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_kv_zsets_rank ON kv_zsets(key, score DESC, seq ASC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_blobs_expires ON kv_blobs(expires_at)")
        .execute(pool)
        .await?;

    Ok(())
}
