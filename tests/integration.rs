use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docs_chat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docs-chat");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(docs_dir.join("guides")).unwrap();
    fs::create_dir_all(docs_dir.join("reference/api")).unwrap();

    fs::write(
        docs_dir.join("index.md"),
        "# Welcome\n\nLogfire is an observability platform.\n\n## Features\n\nTracing, metrics and logs.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("guides/manual-tracing.md"),
        "---\ntitle: Manual tracing\n---\n# Manual Tracing\n\nCreate spans with `logfire.span`.\n\n## Attributes\n\nSpans carry attributes.\n\n```py\nwith logfire.span('hello'):\n    # not a heading\n    pass\n```",
    )
    .unwrap();
    fs::write(
        docs_dir.join("reference/api/logfire.md"),
        "# API\n\nGenerated reference.",
    )
    .unwrap();
    fs::write(docs_dir.join("release-notes.md"), "# Releases\n\nv1").unwrap();

    let config_content = format!(
        r#"[docs]
root = "{root}/docs"

[db]
path = "{root}/data/docs-chat.sqlite"

[retrieval]
mode = "keyword"

[embedding]
provider = "disabled"

[agent]
provider = "disabled"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docs-chat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docs_chat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docs_chat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docs-chat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_toc_lists_files_and_headings() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docs_chat(&config_path, &["toc"]);
    assert!(success, "toc failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("guides/manual-tracing.md\n# Manual Tracing\n## Attributes\n"));
    assert!(stdout.contains("index.md\n# Welcome\n## Features\n"));
    assert!(!stdout.contains("not a heading"));
    assert!(!stdout.contains("release-notes.md"));
    assert!(!stdout.contains("reference/api"));
}

#[test]
fn test_chunks_reports_rows_without_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docs_chat(&config_path, &["chunks", "--verbose"]);
    assert!(success, "chunks failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Generated "));
    assert!(stdout.contains("  index.md: "));
    assert!(!tmp.path().join("data/docs-chat.sqlite").exists());
}

#[test]
fn test_index_then_already_populated() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docs_chat(&config_path, &["index"]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Indexed "));
    assert!(stdout.contains("(0 embedded)"));
    assert!(tmp.path().join("data/docs-chat.sqlite").exists());

    let (stdout, _, success) = run_docs_chat(&config_path, &["index"]);
    assert!(success);
    assert!(stdout.contains("Index already populated"));

    let (stdout, _, success) = run_docs_chat(&config_path, &["index", "--force"]);
    assert!(success);
    assert!(stdout.contains("Indexed "));
}

#[test]
fn test_index_row_count_matches_chunks() {
    let (_tmp, config_path) = setup_test_env();

    let (chunks_out, _, _) = run_docs_chat(&config_path, &["chunks"]);
    let generated = chunks_out
        .lines()
        .find_map(|l| l.strip_prefix("Generated "))
        .and_then(|l| l.strip_suffix(" rows"))
        .unwrap()
        .to_string();

    let (index_out, _, _) = run_docs_chat(&config_path, &["index"]);
    assert!(
        index_out.contains(&format!("Indexed {} rows", generated)),
        "expected {} rows, got: {}",
        generated,
        index_out
    );
}

#[test]
fn test_search_keyword() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docs_chat(&config_path, &["search", "spans attributes"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("guides/manual-tracing.md"),
        "Expected manual-tracing.md in results, got: {}",
        stdout
    );
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();

    run_docs_chat(&config_path, &["index"]);
    let (stdout1, _, _) = run_docs_chat(&config_path, &["search", "logfire"]);
    let (stdout2, _, _) = run_docs_chat(&config_path, &["search", "logfire"]);
    assert_eq!(stdout1, stdout2);
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docs_chat(&config_path, &["search", "kubernetes"]);
    assert!(success);
    assert_eq!(stdout.trim(), "No results.");
}

#[test]
fn test_get_file() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_docs_chat(&config_path, &["get", "guides/manual-tracing"]);
    assert!(success);
    assert!(stdout.starts_with("# Manual Tracing"));
    assert!(!stdout.contains("title: Manual tracing"));

    let (stdout, _, success) = run_docs_chat(&config_path, &["get", "missing.md"]);
    assert!(success);
    assert_eq!(stdout.trim(), "File missing.md does not exist");
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();

    run_docs_chat(&config_path, &["index"]);
    let (stdout, stderr, success) = run_docs_chat(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Documents:   2"));
    assert!(stdout.contains("Corpus:      up to date"));
}

#[test]
fn test_ask_with_disabled_agent_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_docs_chat(&config_path, &["ask", "what is logfire?"]);
    assert!(!success);
    assert!(stderr.contains("Agent is disabled"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_docs_chat(&tmp.path().join("nope.toml"), &["toc"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_completions_need_no_config() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, success) =
        run_docs_chat(&tmp.path().join("nope.toml"), &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("docs-chat"));
}
