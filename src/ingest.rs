//! Indexing pipeline orchestration.
//!
//! Loader → chunker → deduplicator → store. Every build is a full
//! rebuild; there is no incremental path.

use anyhow::Result;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::docs;
use crate::embedding::EmbeddingProvider;
use crate::models::ChunkRecord;
use crate::store::{corpus_hash, IndexMeta, SqliteStore};

/// Every surviving chunk of every indexable document, documents in sorted
/// path order, chunks in sorted `(headers, text)` order.
pub fn build_rows(config: &Config) -> Result<Vec<ChunkRecord>> {
    let mut rows = Vec::new();
    for doc in docs::load_documents(config)? {
        let chunks = chunk_document(&doc.relative_path, &doc.markdown, &config.chunking);
        tracing::debug!(path = %doc.relative_path, chunks = chunks.len(), "chunked");
        rows.extend(chunks);
    }
    Ok(rows)
}

/// Rebuild the store from the docs tree. Returns the row count.
pub async fn rebuild_index(config: &Config, store: &SqliteStore) -> Result<usize> {
    let rows = build_rows(config)?;
    tracing::info!(rows = rows.len(), "rebuilding index");
    store.rebuild(&rows).await?;
    Ok(rows.len())
}

/// Open the store, building it first when it is empty or was embedded with
/// a different model than the configured one.
///
/// A populated index whose corpus hash no longer matches the docs tree is
/// used as is; a warning suggests `index --force`.
pub async fn open_populated_index(config: &Config) -> Result<SqliteStore> {
    let store = SqliteStore::open(config).await?;
    ensure_populated(config, &store).await?;
    Ok(store)
}

/// Returns `true` when the index was (re)built.
pub async fn ensure_populated(config: &Config, store: &SqliteStore) -> Result<bool> {
    if store.count_rows().await? == 0 {
        rebuild_index(config, store).await?;
        return Ok(true);
    }

    let meta = store.meta().await?;
    if let Some(reason) = embedding_mismatch(&meta, store.provider()) {
        tracing::warn!(%reason, "index embeddings do not match the configured provider; rebuilding");
        rebuild_index(config, store).await?;
        return Ok(true);
    }

    match build_rows(config) {
        Ok(rows) => {
            if meta.corpus_hash.as_deref() != Some(corpus_hash(&rows).as_str()) {
                tracing::warn!("docs changed since the index was built; run `docs-chat index --force`");
            }
        }
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "cannot read docs tree to check index staleness");
        }
    }
    Ok(false)
}

/// Why the stored vectors cannot serve `provider`'s query embeddings.
fn embedding_mismatch(meta: &IndexMeta, provider: &dyn EmbeddingProvider) -> Option<String> {
    let stored = meta.embedding_model.as_deref().unwrap_or("disabled");
    if stored != provider.model_name() {
        return Some(format!(
            "built with `{}`, configured `{}`",
            stored,
            provider.model_name()
        ));
    }
    let dims = provider.dims();
    match meta.embedding_dims {
        Some(stored_dims) if dims > 0 && stored_dims != dims => Some(format!(
            "stored {} dimensions, configured {}",
            stored_dims, dims
        )),
        _ => None,
    }
}

/// `docs-chat chunks`: run the pipeline without touching the database.
pub fn run_chunks(config: &Config, verbose: bool) -> Result<()> {
    let rows = build_rows(config)?;

    if verbose {
        let mut current: Option<&str> = None;
        let mut count = 0usize;
        for row in &rows {
            if current != Some(row.path.as_str()) {
                if let Some(path) = current {
                    println!("  {path}: {count}");
                }
                current = Some(row.path.as_str());
                count = 0;
            }
            count += 1;
        }
        if let Some(path) = current {
            println!("  {path}: {count}");
        }
    }

    println!("Generated {} rows", rows.len());
    Ok(())
}

/// `docs-chat index [--force]`.
pub async fn run_index(config: &Config, force: bool) -> Result<()> {
    let store = SqliteStore::open(config).await?;

    let existing = store.count_rows().await?;
    if existing > 0 && !force && !ensure_populated(config, &store).await? {
        println!(
            "Index already populated ({} rows). Use --force to rebuild.",
            existing
        );
        store.close().await;
        return Ok(());
    }

    let rows = if force || existing == 0 {
        rebuild_index(config, &store).await?
    } else {
        store.count_rows().await? as usize
    };
    let embedded = store.count_vectors().await?;
    println!("Indexed {} rows ({} embedded)", rows, embedded);
    println!("  db: {}", config.db.path.display());

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn corpus() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("docs");
        fs::create_dir_all(root.join("guides")).unwrap();
        fs::write(root.join("a.md"), "# Title\n\nIntro text.\n\n## Sub\n\nBody.").unwrap();
        fs::write(
            root.join("guides/setup.md"),
            "---\ntitle: Setup\n---\n# Setup\n\nInstall with pip.\n",
        )
        .unwrap();
        fs::write(root.join("release-notes.md"), "# v1\n\nReleased.").unwrap();

        let mut config = Config::minimal(&root);
        config.db.path = dir.path().join("data/index.sqlite");
        (dir, config)
    }

    #[test]
    fn rows_skip_ignored_files_and_front_matter() {
        let (_dir, config) = corpus();
        let rows = build_rows(&config).unwrap();

        assert!(rows.iter().all(|r| r.path != "release-notes.md"));
        assert!(rows.iter().all(|r| !r.text.contains("title: Setup")));
        assert!(rows.iter().any(|r| r.path == "guides/setup.md"));

        let paths: Vec<&str> = rows.iter().map(|r| r.path.as_str()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn build_is_deterministic() {
        let (_dir, config) = corpus();
        assert_eq!(build_rows(&config).unwrap(), build_rows(&config).unwrap());
    }

    #[tokio::test]
    async fn empty_index_is_built_on_open() {
        let (_dir, config) = corpus();
        let store = open_populated_index(&config).await.unwrap();
        let expected = build_rows(&config).unwrap().len() as i64;
        assert_eq!(store.count_rows().await.unwrap(), expected);

        // Reopening does not rebuild.
        let built_at = store.meta().await.unwrap().built_at;
        let again = open_populated_index(&config).await.unwrap();
        assert_eq!(again.meta().await.unwrap().built_at, built_at);
    }

    struct Fixed(&'static str, usize);

    #[async_trait::async_trait]
    impl EmbeddingProvider for Fixed {
        fn model_name(&self) -> &str {
            self.0
        }
        fn dims(&self) -> usize {
            self.1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0; self.1]).collect())
        }
    }

    fn meta(model: &str, dims: usize) -> IndexMeta {
        IndexMeta {
            embedding_model: Some(model.to_string()),
            embedding_dims: Some(dims),
            ..Default::default()
        }
    }

    #[test]
    fn embedding_mismatch_checks_model_and_dims() {
        assert!(embedding_mismatch(&meta("m", 8), &Fixed("m", 8)).is_none());
        assert!(embedding_mismatch(&meta("disabled", 0), &crate::embedding::DisabledProvider).is_none());

        let reason = embedding_mismatch(&meta("disabled", 0), &Fixed("m", 8)).unwrap();
        assert!(reason.contains("`disabled`"), "{reason}");
        assert!(embedding_mismatch(&meta("m", 8), &crate::embedding::DisabledProvider).is_some());
        assert!(embedding_mismatch(&meta("m", 4), &Fixed("m", 8)).is_some());
        assert!(embedding_mismatch(&IndexMeta::default(), &Fixed("m", 8)).is_some());
    }

    #[tokio::test]
    async fn unreadable_docs_tree_does_not_fail_open() {
        let (dir, config) = corpus();
        open_populated_index(&config).await.unwrap().close().await;

        fs::remove_dir_all(dir.path().join("docs")).unwrap();
        let store = SqliteStore::open(&config).await.unwrap();
        assert!(!ensure_populated(&config, &store).await.unwrap());
        assert!(store.count_rows().await.unwrap() > 0);
    }
}
