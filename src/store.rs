//! SQLite-backed chunk index.
//!
//! [`SqliteStore`] owns the connection pool and the embedding provider.
//! The index is only ever rebuilt from scratch: [`SqliteStore::rebuild`]
//! embeds every chunk first, then swaps the whole table set inside one
//! transaction, so a failed build leaves the previous index in place.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::embedding::{self, blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider};
use crate::migrate;
use crate::models::{ChunkRecord, SearchHit};
use crate::search::{fuse, Candidate, Fusion, SearchIndex};

/// Build metadata stored next to the chunks.
#[derive(Debug, Clone, Default)]
pub struct IndexMeta {
    pub embedding_model: Option<String>,
    pub embedding_dims: Option<usize>,
    pub built_at: Option<String>,
    pub corpus_hash: Option<String>,
}

pub struct SqliteStore {
    pool: SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    retrieval: RetrievalConfig,
    batch_size: usize,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db.path` with the
    /// configured embedding provider.
    pub async fn open(config: &Config) -> Result<Self> {
        let provider = embedding::create_provider(&config.embedding)?;
        Self::open_with_provider(config, provider).await
    }

    pub async fn open_with_provider(
        config: &Config,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let pool = db::connect(config).await?;
        let mut conn = pool.acquire().await?;
        migrate::run_migrations(&mut *conn).await?;
        drop(conn);

        Ok(Self {
            pool,
            provider,
            retrieval: config.retrieval.clone(),
            batch_size: config.embedding.batch_size.max(1),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    fn embeddings_enabled(&self) -> bool {
        self.provider.model_name() != "disabled"
    }

    pub async fn count_rows(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn count_vectors(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn count_documents(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(DISTINCT path) FROM chunks")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Replace the whole index with `rows`.
    pub async fn rebuild(&self, rows: &[ChunkRecord]) -> Result<()> {
        let vectors = if self.embeddings_enabled() {
            Some(self.embed_rows(rows).await?)
        } else {
            None
        };

        let mut tx = self.pool.begin().await?;
        migrate::drop_all(&mut *tx).await?;
        migrate::run_migrations(&mut *tx).await?;

        for (i, row) in rows.iter().enumerate() {
            let id = i as i64 + 1;
            let headers_json = serde_json::to_string(&row.headers)?;

            sqlx::query(
                "INSERT INTO chunks (id, path, headers_json, count, text) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&row.path)
            .bind(&headers_json)
            .bind(row.count)
            .bind(&row.text)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?, ?)")
                .bind(id)
                .bind(&row.text)
                .execute(&mut *tx)
                .await?;

            if let Some(vectors) = &vectors {
                sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)")
                    .bind(id)
                    .bind(vec_to_blob(&vectors[i]))
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let dims = vectors
            .as_ref()
            .and_then(|v| v.first())
            .map(|v| v.len())
            .unwrap_or(0);
        let meta = [
            ("embedding_model", self.provider.model_name().to_string()),
            ("embedding_dims", dims.to_string()),
            ("built_at", chrono::Utc::now().to_rfc3339()),
            ("corpus_hash", corpus_hash(rows)),
        ];
        for (key, value) in meta {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::info!(
            rows = rows.len(),
            embedded = vectors.as_ref().map(Vec::len).unwrap_or(0),
            "index rebuilt"
        );
        Ok(())
    }

    async fn embed_rows(&self, rows: &[ChunkRecord]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(rows.len());
        for batch in rows.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
            let embedded = self
                .provider
                .embed(&texts)
                .await
                .with_context(|| format!("Failed to embed batch at row {}", vectors.len()))?;
            if embedded.len() != texts.len() {
                anyhow::bail!(
                    "Embedding provider returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                );
            }
            vectors.extend(embedded);
            tracing::debug!(done = vectors.len(), total = rows.len(), "embedded");
        }
        Ok(vectors)
    }

    /// FTS5 matches, best first. Score is the negated bm25 rank.
    pub async fn keyword_candidates(&self, query: &str, k: i64) -> Result<Vec<Candidate>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, rank
            FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(k)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                Candidate {
                    chunk_id: row.get("chunk_id"),
                    raw_score: -rank, // negate so higher = better
                }
            })
            .collect())
    }

    /// Brute-force cosine similarity over every stored vector, best first.
    pub async fn vector_candidates(&self, query_vec: &[f32], k: i64) -> Result<Vec<Candidate>> {
        let rows = sqlx::query("SELECT chunk_id, embedding FROM chunk_vectors")
            .fetch_all(&self.pool)
            .await?;

        let mut candidates: Vec<Candidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                Candidate {
                    chunk_id: row.get("chunk_id"),
                    raw_score: cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(Ordering::Equal)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(k.max(0) as usize);
        Ok(candidates)
    }

    pub async fn chunk(&self, id: i64) -> Result<Option<ChunkRecord>> {
        let row = sqlx::query("SELECT path, headers_json, count, text FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let headers_json: String = row.get("headers_json");
            Ok(ChunkRecord {
                path: row.get("path"),
                headers: serde_json::from_str(&headers_json)
                    .with_context(|| format!("Corrupt headers_json for chunk {id}"))?,
                count: row.get("count"),
                text: row.get("text"),
            })
        })
        .transpose()
    }

    pub async fn meta(&self) -> Result<IndexMeta> {
        let rows = sqlx::query("SELECT key, value FROM index_meta")
            .fetch_all(&self.pool)
            .await?;

        let mut meta = IndexMeta::default();
        for row in rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                "embedding_model" => meta.embedding_model = Some(value),
                "embedding_dims" => meta.embedding_dims = value.parse().ok(),
                "built_at" => meta.built_at = Some(value),
                "corpus_hash" => meta.corpus_hash = Some(value),
                _ => {}
            }
        }
        Ok(meta)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SearchIndex for SqliteStore {
    async fn hybrid_query(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let mode = self.retrieval.mode.as_str();

        let keyword = if mode == "keyword" || mode == "hybrid" {
            self.keyword_candidates(query, self.retrieval.candidate_k_keyword)
                .await?
        } else {
            Vec::new()
        };

        let vector = if mode == "semantic" || mode == "hybrid" {
            let query_vec = embedding::embed_query(self.provider.as_ref(), query).await?;
            self.vector_candidates(&query_vec, self.retrieval.candidate_k_vector)
                .await?
        } else {
            Vec::new()
        };

        let fused = fuse(&keyword, &vector, Fusion::from_config(&self.retrieval));

        let mut hits = Vec::with_capacity(limit.min(fused.len()));
        for (chunk_id, score) in fused.into_iter().take(limit) {
            if let Some(chunk) = self.chunk(chunk_id).await? {
                hits.push(SearchHit {
                    chunk_id,
                    chunk,
                    score,
                });
            }
        }
        Ok(hits)
    }
}

/// FTS5 expression matching any alphanumeric term of `query`.
///
/// Terms are quoted so FTS5 operators in user input are inert. Returns
/// `None` when the query has no terms.
pub fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// SHA-256 over every row's path and text, in order.
pub fn corpus_hash(rows: &[ChunkRecord]) -> String {
    let mut hasher = Sha256::new();
    for row in rows {
        hasher.update(row.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(row.text.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
