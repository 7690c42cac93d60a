//! Hybrid scoring and the `search_docs` retrieval tool.
//!
//! Candidates come from two channels, FTS5 keyword matches and cosine
//! similarity over stored vectors. [`fuse`] merges them either by
//! min-max normalized weighted sum or by reciprocal-rank fusion.
//!
//! [`search_docs`] runs a query through a [`SearchIndex`], then removes
//! hits nested under another hit from the same file, so the agent never
//! sees the same section at two granularities.

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::models::SearchHit;

/// Separator between chunk texts in `search_docs` output.
pub const RESULT_SEPARATOR: &str = "\n\n---------\n\n";

/// Output of `search_docs` when nothing matched.
pub const NO_RESULTS: &str = "No results.";

/// A chunk id with its raw channel score; higher is better.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk_id: i64,
    pub raw_score: f64,
}

/// How keyword and vector candidates are combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fusion {
    /// `(1 - alpha) * keyword + alpha * semantic` over normalized scores.
    Weighted { alpha: f64 },
    /// `Σ 1 / (k + rank)` over each list the chunk appears in.
    Rrf { k: f64 },
}

impl Fusion {
    /// Fusion for the configured retrieval mode. Single-channel modes pin
    /// the weighted alpha to that channel.
    pub fn from_config(config: &RetrievalConfig) -> Self {
        match config.mode.as_str() {
            "keyword" => Fusion::Weighted { alpha: 0.0 },
            "semantic" => Fusion::Weighted { alpha: 1.0 },
            _ => match config.fusion.as_str() {
                "weighted" => Fusion::Weighted {
                    alpha: config.hybrid_alpha,
                },
                _ => Fusion::Rrf { k: config.rrf_k },
            },
        }
    }
}

/// Min-max normalize scores to `[0, 1]`. All-equal scores become `1.0`.
pub fn normalize_scores(candidates: &[Candidate]) -> Vec<(i64, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c.chunk_id, norm)
        })
        .collect()
}

/// Merge both channels into `(chunk_id, score)` sorted by score descending,
/// then chunk id ascending.
///
/// Candidate lists must already be in rank order (best first).
pub fn fuse(keyword: &[Candidate], vector: &[Candidate], fusion: Fusion) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();

    match fusion {
        Fusion::Weighted { alpha } => {
            let kw_map: HashMap<i64, f64> = normalize_scores(keyword).into_iter().collect();
            let vec_map: HashMap<i64, f64> = normalize_scores(vector).into_iter().collect();
            for id in kw_map.keys().chain(vec_map.keys()) {
                let k = kw_map.get(id).copied().unwrap_or(0.0);
                let v = vec_map.get(id).copied().unwrap_or(0.0);
                scores.insert(*id, (1.0 - alpha) * k + alpha * v);
            }
        }
        Fusion::Rrf { k } => {
            for list in [keyword, vector] {
                for (rank, c) in list.iter().enumerate() {
                    *scores.entry(c.chunk_id).or_insert(0.0) += 1.0 / (k + (rank + 1) as f64);
                }
            }
        }
    }

    let mut fused: Vec<(i64, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    fused
}

/// Anything that can answer a hybrid query with ranked chunks.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn hybrid_query(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Drop every hit that sits under another hit from the same file.
///
/// A hit is dropped when another hit has the same path and a header path
/// that is a prefix of its own. Of two hits with identical header paths,
/// the higher-ranked one stays.
pub fn filter_nested(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let keep: Vec<bool> = hits
        .iter()
        .enumerate()
        .map(|(i, r)| {
            !hits.iter().enumerate().any(|(j, r2)| {
                if i == j || r.chunk.path != r2.chunk.path {
                    return false;
                }
                let outer = &r2.chunk.headers;
                let inner = &r.chunk.headers;
                if !inner.starts_with(outer) {
                    return false;
                }
                outer.len() < inner.len() || j < i
            })
        })
        .collect();

    hits.into_iter()
        .zip(keep)
        .filter_map(|(hit, keep)| keep.then_some(hit))
        .collect()
}

/// The `search_docs` tool: ranked chunk texts joined by [`RESULT_SEPARATOR`].
///
/// A blank query or an empty result set returns `"No results."`, never an
/// empty string.
pub async fn search_docs(index: &dyn SearchIndex, query: &str, limit: usize) -> Result<String> {
    if query.trim().is_empty() {
        return Ok(NO_RESULTS.to_string());
    }

    let hits = index.hybrid_query(query, limit).await?;
    let total = hits.len();
    let hits = filter_nested(hits);
    tracing::debug!(query, total, kept = hits.len(), "search_docs");

    if hits.is_empty() {
        return Ok(NO_RESULTS.to_string());
    }

    Ok(hits
        .iter()
        .map(|h| h.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(RESULT_SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkRecord;

    fn cand(chunk_id: i64, score: f64) -> Candidate {
        Candidate {
            chunk_id,
            raw_score: score,
        }
    }

    fn hit(chunk_id: i64, path: &str, headers: &[&str]) -> SearchHit {
        SearchHit {
            chunk_id,
            chunk: ChunkRecord {
                path: path.to_string(),
                headers: headers.iter().map(|s| s.to_string()).collect(),
                text: format!("{path}:{}", headers.join("/")),
                count: 1,
            },
            score: 1.0,
        }
    }

    struct FixedIndex(Vec<SearchHit>);

    #[async_trait]
    impl SearchIndex for FixedIndex {
        async fn hybrid_query(&self, _query: &str, limit: usize) -> Result<Vec<SearchHit>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    #[test]
    fn normalize_range_and_equal() {
        assert!(normalize_scores(&[]).is_empty());

        let result = normalize_scores(&[cand(1, 10.0), cand(2, 5.0), cand(3, 0.0)]);
        assert_eq!(result, vec![(1, 1.0), (2, 0.5), (3, 0.0)]);

        let equal = normalize_scores(&[cand(1, 3.0), cand(2, 3.0)]);
        assert!(equal.iter().all(|(_, s)| (*s - 1.0).abs() < 1e-9));
    }

    #[test]
    fn alpha_zero_follows_keyword_order() {
        let kw = vec![cand(1, 10.0), cand(2, 5.0), cand(3, 1.0)];
        let vec = vec![cand(1, 0.1), cand(2, 0.9), cand(4, 0.5)];
        let ids: Vec<i64> = fuse(&kw, &vec, Fusion::Weighted { alpha: 0.0 })
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        // Vector-only chunk 4 scores 0 and ties with chunk 3, broken by id.
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn alpha_one_follows_vector_order() {
        let kw = vec![cand(1, 10.0), cand(2, 5.0)];
        let vec = vec![cand(2, 0.9), cand(3, 0.5), cand(1, 0.1)];
        let ids: Vec<i64> = fuse(&kw, &vec, Fusion::Weighted { alpha: 1.0 })
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn rrf_rewards_agreement() {
        let kw = vec![cand(1, 9.0), cand(2, 8.0), cand(3, 7.0)];
        let vec = vec![cand(2, 0.9), cand(4, 0.8), cand(1, 0.1)];
        let fused = fuse(&kw, &vec, Fusion::Rrf { k: 60.0 });
        let ids: Vec<i64> = fused.iter().map(|(id, _)| *id).collect();
        // 2: 1/62 + 1/61, 1: 1/61 + 1/63, then single-list hits by rank.
        assert_eq!(ids, vec![2, 1, 4, 3]);
        assert!((fused[0].1 - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
    }

    #[test]
    fn fusion_from_mode() {
        let mut cfg = RetrievalConfig::default();
        assert_eq!(Fusion::from_config(&cfg), Fusion::Rrf { k: 60.0 });
        cfg.fusion = "weighted".to_string();
        assert_eq!(Fusion::from_config(&cfg), Fusion::Weighted { alpha: 0.6 });
        cfg.mode = "keyword".to_string();
        assert_eq!(Fusion::from_config(&cfg), Fusion::Weighted { alpha: 0.0 });
        cfg.mode = "semantic".to_string();
        assert_eq!(Fusion::from_config(&cfg), Fusion::Weighted { alpha: 1.0 });
    }

    #[test]
    fn nested_hit_is_dropped() {
        let hits = vec![hit(1, "x.md", &["# A"]), hit(2, "x.md", &["# A", "## B"])];
        let kept = filter_nested(hits);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk.headers, vec!["# A"]);
    }

    #[test]
    fn ancestor_wins_regardless_of_rank() {
        let hits = vec![hit(2, "x.md", &["# A", "## B"]), hit(1, "x.md", &["# A"])];
        let kept = filter_nested(hits);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].chunk_id, 1);
    }

    #[test]
    fn whole_document_hit_hides_everything_in_that_file() {
        let hits = vec![
            hit(1, "x.md", &["# A", "## B"]),
            hit(2, "x.md", &[]),
            hit(3, "y.md", &["# A", "## B"]),
        ];
        let ids: Vec<i64> = filter_nested(hits).iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn identical_headers_keep_first() {
        let hits = vec![
            hit(7, "x.md", &["# A"]),
            hit(3, "x.md", &["# A"]),
            hit(9, "x.md", &["# B"]),
        ];
        let ids: Vec<i64> = filter_nested(hits).iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids, vec![7, 9]);
    }

    #[test]
    fn siblings_and_other_files_survive() {
        let hits = vec![
            hit(1, "x.md", &["# A", "## B"]),
            hit(2, "x.md", &["# A", "## C"]),
            hit(3, "y.md", &["# A"]),
        ];
        assert_eq!(filter_nested(hits).len(), 3);
    }

    #[tokio::test]
    async fn search_docs_joins_with_separator() {
        let index = FixedIndex(vec![
            hit(1, "a.md", &["# A"]),
            hit(2, "a.md", &["# A", "## Deep"]),
            hit(3, "b.md", &["# B"]),
        ]);
        let out = search_docs(&index, "anything", 10).await.unwrap();
        assert_eq!(out, format!("a.md:# A{RESULT_SEPARATOR}b.md:# B"));
    }

    #[tokio::test]
    async fn search_docs_empty_cases() {
        let index = FixedIndex(vec![hit(1, "a.md", &["# A"])]);
        assert_eq!(search_docs(&index, "   ", 10).await.unwrap(), NO_RESULTS);

        let empty = FixedIndex(Vec::new());
        assert_eq!(search_docs(&empty, "query", 10).await.unwrap(), NO_RESULTS);
    }
}
