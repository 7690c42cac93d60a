//! Index schema.
//!
//! The index is rebuilt wholesale, so there is one schema version and
//! [`drop_all`] + [`run_migrations`] is the reset path.

use anyhow::Result;
use sqlx::SqliteConnection;

pub async fn run_migrations(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL,
            headers_json TEXT NOT NULL,
            count INTEGER NOT NULL,
            text TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id INTEGER PRIMARY KEY,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(&mut *conn)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path)")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn drop_all(conn: &mut SqliteConnection) -> Result<()> {
    for table in ["chunks_fts", "chunk_vectors", "index_meta", "chunks"] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
