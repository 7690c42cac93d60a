//! Core data models used throughout docs-chat.
//!
//! These types represent the documents, chunks, and search hits that flow
//! through the indexing and retrieval pipeline.

use serde::Serialize;

/// A markdown file read from the docs tree, front matter removed.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    /// Path relative to the docs root, `/`-separated.
    pub relative_path: String,
    pub markdown: String,
}

/// One H1–H4 heading in a document outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

impl Heading {
    /// `"## Install"` for a level-2 heading titled `Install`.
    pub fn formatted(&self) -> String {
        format_header(self.level, &self.text)
    }
}

pub fn format_header(level: u8, text: &str) -> String {
    format!("{} {}", "#".repeat(level as usize), text)
}

/// A header-scoped slice of a document, the unit stored in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRecord {
    pub path: String,
    /// Header path, e.g. `["# Guide", "## Install"]`. Empty for whole-document chunks.
    pub headers: Vec<String>,
    /// `path`, each header and the body joined with blank lines.
    pub text: String,
    /// 1-based occurrence index among chunks of `path` sharing `headers`.
    pub count: i64,
}

/// A chunk returned by a query, with its fused relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: i64,
    #[serde(flatten)]
    pub chunk: ChunkRecord,
    pub score: f64,
}
