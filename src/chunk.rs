//! Header-aware markdown chunker.
//!
//! A document is split once per granularity: level 0 keeps the whole
//! document in one section, level `n` starts a new section at every
//! heading of level `1..=n`. Each section becomes a `(headers, text)` pair
//! where `text` joins the file path, the header path and the body with
//! blank lines, so the chunk reads standalone when handed to the agent.
//!
//! Pairs from all granularities are unioned into a sorted set, which drops
//! exact duplicates, and then numbered per header path.

use std::collections::{BTreeSet, HashMap};

use crate::config::ChunkingConfig;
use crate::models::{format_header, ChunkRecord};

/// A run of body text under a fixed set of active headings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// `(level, text)` of the active headings, shallowest first.
    pub headers: Vec<(u8, String)>,
    pub content: String,
}

/// Split `markdown` on headings of level `1..=max_level`.
///
/// Heading lines are removed from the body. Headings deeper than
/// `max_level`, and anything inside fenced code, stay in the body.
pub fn split_sections(markdown: &str, max_level: u8) -> Vec<Section> {
    let mut flushed: Vec<Section> = Vec::new();
    let mut stack: Vec<(u8, String)> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut fence: Option<&'static str> = None;

    for raw in markdown.split('\n') {
        let line = printable(raw.trim());

        match fence {
            None => {
                if line.starts_with("```") && line.matches("```").count() == 1 {
                    fence = Some("```");
                } else if line.starts_with("~~~") {
                    fence = Some("~~~");
                }
            }
            Some(open) => {
                if line.starts_with(open) {
                    fence = None;
                }
            }
        }
        if fence.is_some() {
            current.push(line);
            continue;
        }

        if let Some((level, text)) = split_heading(&line, max_level) {
            flush(&mut current, &stack, &mut flushed);
            while stack.last().is_some_and(|(l, _)| *l >= level) {
                stack.pop();
            }
            stack.push((level, text));
        } else if !line.is_empty() {
            current.push(line);
        } else {
            flush(&mut current, &stack, &mut flushed);
        }
    }
    flush(&mut current, &stack, &mut flushed);

    // Paragraphs under the same headings form one section.
    let mut sections: Vec<Section> = Vec::new();
    for section in flushed {
        match sections.last_mut() {
            Some(last) if last.headers == section.headers => {
                last.content.push_str("  \n");
                last.content.push_str(&section.content);
            }
            _ => sections.push(section),
        }
    }
    sections
}

fn flush(current: &mut Vec<String>, stack: &[(u8, String)], out: &mut Vec<Section>) {
    if !current.is_empty() {
        out.push(Section {
            headers: stack.to_vec(),
            content: current.join("\n"),
        });
        current.clear();
    }
}

/// `(level, text)` when `line` is a heading at a level we split on.
fn split_heading(line: &str, max_level: u8) -> Option<(u8, String)> {
    // Longest prefix first, so `##` is never read as `#`.
    for level in (1..=max_level).rev() {
        let prefix = "#".repeat(level as usize);
        if let Some(rest) = line.strip_prefix(prefix.as_str()) {
            if rest.is_empty() || rest.starts_with(' ') {
                return Some((level, rest.trim().to_string()));
            }
        }
    }
    None
}

fn printable(line: &str) -> String {
    line.chars()
        .filter(|&c| {
            c == ' '
                || !(c.is_control()
                    || c.is_whitespace()
                    || matches!(c, '\u{00AD}' | '\u{200B}'..='\u{200F}' | '\u{2060}'..='\u{2064}' | '\u{FEFF}'))
        })
        .collect()
}

/// Header paths and chunk texts of `path` at one granularity.
///
/// Chunks whose text exceeds `max_bytes` are dropped.
pub fn chunks_at(path: &str, markdown: &str, level: u8, max_bytes: usize) -> Vec<(Vec<String>, String)> {
    split_sections(markdown, level)
        .into_iter()
        .filter_map(|section| {
            let headers: Vec<String> = section
                .headers
                .iter()
                .map(|(level, text)| format_header(*level, text))
                .collect();

            let mut parts: Vec<&str> = Vec::with_capacity(headers.len() + 2);
            parts.push(path);
            parts.extend(headers.iter().map(String::as_str));
            parts.push(&section.content);
            let text = parts.join("\n\n");

            if text.len() > max_bytes {
                tracing::debug!(path, bytes = text.len(), level, "dropping oversized chunk");
                return None;
            }
            Some((headers, text))
        })
        .collect()
}

/// Every distinct chunk of one document across granularities `0..=max_split_level`.
pub fn chunk_document(path: &str, markdown: &str, config: &ChunkingConfig) -> Vec<ChunkRecord> {
    let mut unique: BTreeSet<(Vec<String>, String)> = BTreeSet::new();
    for level in 0..=config.max_split_level {
        unique.extend(chunks_at(path, markdown, level, config.max_chunk_bytes));
    }
    number_chunks(path, unique)
}

/// Stamp 1-based occurrence counts per header path, in sorted pair order.
pub fn number_chunks(
    path: &str,
    pairs: impl IntoIterator<Item = (Vec<String>, String)>,
) -> Vec<ChunkRecord> {
    let mut counts: HashMap<Vec<String>, i64> = HashMap::new();
    pairs
        .into_iter()
        .map(|(headers, text)| {
            let count = counts.entry(headers.clone()).or_insert(0);
            *count += 1;
            ChunkRecord {
                path: path.to_string(),
                headers,
                text,
                count: *count,
            }
        })
        .collect()
}
