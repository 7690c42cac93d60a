//! Documentation tree loader.
//!
//! Walks `docs.root` for markdown files, skips ignored paths, strips front
//! matter and maps files to their public URLs. Also implements the
//! `get_docs_file` tool, which never fails: problems become a message
//! the agent can read.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::DocumentRecord;

/// Relative paths of every indexable markdown file, sorted.
pub fn list_docs(config: &Config) -> Result<Vec<String>> {
    let root = &config.docs.root;
    if !root.exists() {
        bail!("Docs root does not exist: {}", root.display());
    }

    let include_set = build_globset(&["**/*.md".to_string()])?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if !include_set.is_match(&rel_str) {
            continue;
        }
        if is_ignored(&path.to_string_lossy(), &config.docs.ignored) {
            tracing::debug!(path = %rel_str, "ignored");
            continue;
        }

        paths.push(rel_str);
    }

    paths.sort();
    Ok(paths)
}

/// True when `path` contains any of the `ignored` substrings.
pub fn is_ignored(path: &str, ignored: &[String]) -> bool {
    ignored.iter().any(|pattern| path.contains(pattern.as_str()))
}

/// Remove a leading `---` (YAML) or `+++` (TOML) preamble and trim.
///
/// A preamble that is unclosed or does not parse leaves the whole trimmed
/// input as the body.
pub fn strip_front_matter(raw: &str) -> String {
    let content = raw.trim();

    let (fence, is_toml) = if starts_with_fence(content, "---") {
        ("---", false)
    } else if starts_with_fence(content, "+++") {
        ("+++", true)
    } else {
        return content.to_string();
    };

    let mut lines = content.split_inclusive('\n');
    let mut offset = lines.next().map(str::len).unwrap_or(content.len());
    let preamble_start = offset;
    let mut preamble_end = None;
    for line in lines {
        if line.trim_end() == fence {
            preamble_end = Some(offset);
            offset += line.len();
            break;
        }
        offset += line.len();
    }

    let Some(end) = preamble_end else {
        return content.to_string();
    };
    let preamble = &content[preamble_start..end];

    let valid = if is_toml {
        preamble.parse::<toml::Table>().is_ok()
    } else {
        looks_like_yaml(preamble)
    };
    if !valid {
        tracing::debug!("front matter did not parse; keeping whole file as body");
        return content.to_string();
    }

    content[offset..].trim().to_string()
}

fn starts_with_fence(content: &str, fence: &str) -> bool {
    content
        .lines()
        .next()
        .is_some_and(|first| first.trim_end() == fence)
}

// Mappings, sequences, comments and indented continuations only.
fn looks_like_yaml(preamble: &str) -> bool {
    preamble.lines().all(|line| {
        let trimmed = line.trim();
        trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with("- ")
            || trimmed == "-"
            || line.starts_with(' ')
            || line.starts_with('\t')
            || trimmed
                .split_once(':')
                .is_some_and(|(key, _)| !key.trim().is_empty())
    })
}

/// Read a markdown file and return its body without front matter.
pub fn get_markdown(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read docs file: {}", path.display()))?;
    Ok(strip_front_matter(&raw))
}

pub fn load_document(config: &Config, relative_path: &str) -> Result<DocumentRecord> {
    let markdown = get_markdown(&config.docs.root.join(relative_path))?;
    Ok(DocumentRecord {
        relative_path: relative_path.to_string(),
        markdown,
    })
}

/// Load every listed document in sorted order.
pub fn load_documents(config: &Config) -> Result<Vec<DocumentRecord>> {
    list_docs(config)?
        .iter()
        .map(|rel| load_document(config, rel))
        .collect()
}

/// Contents of a docs file, for the `get_docs_file` tool.
///
/// `.md` is appended when missing. Names that escape the docs root or do
/// not exist yield a `File <name> does not exist` message.
pub fn read_docs_file(config: &Config, filename: &str) -> String {
    let name = if filename.ends_with(".md") {
        filename.to_string()
    } else {
        format!("{filename}.md")
    };
    let missing = || format!("File {name} does not exist");

    let rel = Path::new(&name);
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if name.trim().is_empty() || escapes {
        return missing();
    }

    let path = config.docs.root.join(rel);
    if !path.is_file() {
        return missing();
    }
    match get_markdown(&path) {
        Ok(markdown) => markdown,
        Err(e) => {
            tracing::debug!(file = %name, error = %e, "unreadable docs file");
            missing()
        }
    }
}

/// Public URL of a docs file: `guides/setup.md` → `<base>/guides/setup/`.
///
/// Applies to every `.md` path, `index.md` included.
pub fn docs_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let stem = path.strip_suffix(".md").unwrap_or(path);
    format!("{base}/{stem}/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
