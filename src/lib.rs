//! # docs-chat
//!
//! A documentation question-answering agent over hybrid search.
//!
//! docs-chat splits a markdown documentation tree into header-scoped chunks,
//! indexes them in SQLite (FTS5 for keywords, BLOB vectors for semantics),
//! and gives an LLM agent two tools over that index: `search_docs` and
//! `get_docs_file`. The agent is served from the CLI and over a web chat API.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Docs tree │──▶│ Chunk+Dedup  │──▶│  SQLite   │
//! │  (*.md)    │   │    +Embed    │   │ FTS5+Vec  │
//! └────────────┘   └──────────────┘   └─────┬─────┘
//!                                           │ search_docs / get_docs_file
//!                       ┌───────────────────┤
//!                       ▼                   ▼
//!                 ┌──────────┐        ┌───────────┐
//!                 │  Agent   │◀──────▶│  HTTP/MCP │
//!                 │ (LLM)    │        │  + web UI │
//!                 └──────────┘        └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docs-chat index                   # build the index
//! docs-chat search "manual tracing"
//! docs-chat ask "How do I send logs from Python?"
//! docs-chat serve                   # web chat on 127.0.0.1:38001
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`docs`] | Docs tree loading and file access |
//! | [`toc`] | Table of contents for the agent |
//! | [`chunk`] | Header-scoped chunking and de-duplication |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema |
//! | [`store`] | SQLite index: rebuild and candidate retrieval |
//! | [`search`] | Score fusion, nested-result filter, `search_docs` |
//! | [`ingest`] | Index build pipeline |
//! | [`stats`] | Index statistics |
//! | [`tools`] | Agent tools and registry |
//! | [`agent`] | Tool-calling agent and model backends |
//! | [`ui_stream`] | Chat UI message stream protocol |
//! | [`mcp`] | MCP bridge |
//! | [`server`] | Web chat service |

pub mod agent;
pub mod chunk;
pub mod config;
pub mod db;
pub mod docs;
pub mod embedding;
pub mod ingest;
pub mod mcp;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
pub mod toc;
pub mod tools;
pub mod ui_stream;
