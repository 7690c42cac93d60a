//! Index statistics and health overview.
//!
//! Used by `docs-chat stats` to show what is indexed, how much of it is
//! embedded, and whether the docs tree changed since the last build.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::ingest;
use crate::store::{corpus_hash, SqliteStore};

/// Number of largest documents listed in the breakdown.
const TOP_DOCUMENTS: i64 = 10;

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;

    let total_chunks = store.count_rows().await?;
    let total_embedded = store.count_vectors().await?;
    let total_docs = store.count_documents().await?;
    let meta = store.meta().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    let freshness = match (&meta.corpus_hash, ingest::build_rows(config)) {
        (None, _) => "not built".to_string(),
        (Some(stored), Ok(rows)) if *stored == corpus_hash(&rows) => "up to date".to_string(),
        (Some(_), Ok(_)) => "stale (run `docs-chat index --force`)".to_string(),
        (Some(_), Err(e)) => format!("unknown ({e})"),
    };

    println!("docs-chat index stats");
    println!("=====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Docs root:   {}", config.docs.root.display());
    println!();
    println!("  Documents:   {}", total_docs);
    println!("  Chunks:      {}", total_chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        total_embedded,
        total_chunks,
        if total_chunks > 0 {
            (total_embedded * 100) / total_chunks
        } else {
            0
        }
    );
    println!(
        "  Model:       {}",
        match (&meta.embedding_model, meta.embedding_dims) {
            (Some(model), Some(dims)) if dims > 0 => format!("{model} ({dims} dims)"),
            (Some(model), _) => model.clone(),
            (None, _) => "-".to_string(),
        }
    );
    println!(
        "  Built:       {}",
        meta.built_at
            .as_deref()
            .map(format_built_at)
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Corpus:      {}", freshness);

    let doc_rows = sqlx::query(
        r#"
        SELECT path, COUNT(*) AS chunk_count, MAX(length(text)) AS largest
        FROM chunks
        GROUP BY path
        ORDER BY chunk_count DESC, path ASC
        LIMIT ?
        "#,
    )
    .bind(TOP_DOCUMENTS)
    .fetch_all(store.pool())
    .await?;

    if !doc_rows.is_empty() {
        println!();
        println!("  Largest documents:");
        println!("  {:<48} {:>8} {:>10}", "PATH", "CHUNKS", "LARGEST");
        println!("  {}", "-".repeat(68));
        for row in &doc_rows {
            let path: String = row.get("path");
            let chunk_count: i64 = row.get("chunk_count");
            let largest: i64 = row.get("largest");
            println!(
                "  {:<48} {:>8} {:>10}",
                path,
                chunk_count,
                format_bytes(largest.max(0) as u64)
            );
        }
    }

    println!();

    store.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// RFC 3339 timestamp as a relative time string (e.g. "3 hours ago").
fn format_built_at(built_at: &str) -> String {
    let Ok(ts) = chrono::DateTime::parse_from_rfc3339(built_at) else {
        return built_at.to_string();
    };
    let delta = chrono::Utc::now().timestamp() - ts.timestamp();

    if delta < 0 {
        ts.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
