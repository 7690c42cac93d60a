//! Table of contents over the docs tree.
//!
//! One block per file: the relative path, then every H1–H4 heading as
//! `## Text`, then a blank line. The agent instructions embed the whole
//! outline so the model can pick files to open with `get_docs_file`.

use anyhow::Result;
use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use regex::Regex;
use std::sync::LazyLock;

use crate::config::Config;
use crate::docs;
use crate::models::Heading;

static FENCE_INFO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^```\w+ [^\n]+$").expect("fence regex"));

/// Replace fence lines carrying attributes (```` ```py title="x" ````) with a bare fence.
pub fn normalize_fences(markdown: &str) -> String {
    FENCE_INFO.replace_all(markdown, "```").into_owned()
}

/// Plain text of every H1–H4 heading, in document order.
pub fn extract_headings(markdown: &str) -> Vec<Heading> {
    let mut headings = Vec::new();
    let mut current: Option<(u8, String)> = None;

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { level, .. }) if (level as u8) <= 4 => {
                current = Some((level as u8, String::new()));
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, buf)) = current.as_mut() {
                    buf.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some((_, buf)) = current.as_mut() {
                    buf.push(' ');
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, text)) = current.take() {
                    headings.push(Heading {
                        level,
                        text: text.trim().to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    headings
}

/// Outline block for one file.
pub fn file_toc(path: &str, markdown: &str) -> String {
    let headings = extract_headings(&normalize_fences(markdown));
    let lines: Vec<String> = headings.iter().map(Heading::formatted).collect();
    format!("{}\n{}\n\n", path, lines.join("\n"))
}

/// Outline of the whole docs tree, in sorted path order.
pub fn build_toc(config: &Config) -> Result<String> {
    let mut toc = String::new();
    for doc in docs::load_documents(config)? {
        toc.push_str(&file_toc(&doc.relative_path, &doc.markdown));
    }
    Ok(toc)
}
