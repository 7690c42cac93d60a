//! # docs-chat CLI
//!
//! Builds the docs index, queries it, and runs the chat agent from the
//! terminal or behind the web service.
//!
//! ## Usage
//!
//! ```bash
//! docs-chat --config ./config/docs-chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docs-chat toc` | Print the table of contents given to the agent |
//! | `docs-chat chunks` | Chunk the docs without writing the database |
//! | `docs-chat index` | Build the search index (`--force` to rebuild) |
//! | `docs-chat stats` | Show index statistics |
//! | `docs-chat search "<query>"` | Run `search_docs` |
//! | `docs-chat get <file>` | Run `get_docs_file` |
//! | `docs-chat ask "<question>"` | One-shot agent answer |
//! | `docs-chat chat` | Interactive chat session |
//! | `docs-chat serve` | Start the web chat service |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use docs_chat::agent::{self, Agent, AgentEvent, Message};
use docs_chat::config::{self, Config};
use docs_chat::tools::{ToolContext, ToolRegistry};
use docs_chat::{docs, ingest, search, server, stats, toc};

/// docs-chat: ask questions about a markdown documentation tree.
///
/// All commands except `completions` read a TOML configuration file. See
/// `config/docs-chat.example.toml` for every option.
#[derive(Parser)]
#[command(
    name = "docs-chat",
    about = "docs-chat: a documentation Q&A agent over hybrid search",
    version,
    long_about = "docs-chat indexes a markdown documentation tree into a hybrid \
    (keyword + semantic) SQLite index and answers questions about it with a \
    tool-calling LLM agent, from the terminal or a web chat UI."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docs-chat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the table of contents: every docs file with its headings.
    Toc,

    /// Chunk every docs file and report the row count.
    ///
    /// Runs the loader, chunker and de-duplication without touching the
    /// database.
    Chunks {
        /// Also print the row count of each file.
        #[arg(long)]
        verbose: bool,
    },

    /// Build the search index.
    ///
    /// Does nothing when the index is already populated, unless `--force`.
    Index {
        /// Drop and rebuild the index.
        #[arg(long)]
        force: bool,
    },

    /// Show index statistics.
    Stats,

    /// Search the docs, as the agent's `search_docs` tool does.
    Search {
        query: String,

        /// Maximum number of results (overrides `retrieval.limit`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a docs file, as the agent's `get_docs_file` tool does.
    Get {
        /// Path relative to the docs root; `.md` is optional.
        filename: String,
    },

    /// Ask one question and print the answer.
    Ask { question: String },

    /// Interactive chat. Type `exit` or press Ctrl-D to quit.
    Chat,

    /// Start the web chat service on `[server].bind`.
    Serve,

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,docs_chat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "docs-chat", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Toc => {
            print!("{}", toc::build_toc(&cfg)?);
        }
        Commands::Chunks { verbose } => {
            ingest::run_chunks(&cfg, verbose)?;
        }
        Commands::Index { force } => {
            ingest::run_index(&cfg, force).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Search { query, limit } => {
            let store = ingest::open_populated_index(&cfg).await?;
            let limit = limit.unwrap_or(cfg.retrieval.limit);
            println!("{}", search::search_docs(&store, &query, limit).await?);
            store.close().await;
        }
        Commands::Get { filename } => {
            println!("{}", docs::read_docs_file(&cfg, &filename));
        }
        Commands::Ask { question } => {
            let agent = build_agent(cfg).await?;
            let answer = run_turn(&agent, vec![Message::user(question)]).await?;
            println!("{}", answer);
        }
        Commands::Chat => {
            let agent = build_agent(cfg).await?;
            run_chat(&agent).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}

async fn build_agent(cfg: Config) -> Result<Agent> {
    let model = agent::create_model(&cfg.agent)?;
    let store = ingest::open_populated_index(&cfg).await?;
    let system = agent::instructions(&cfg, &toc::build_toc(&cfg)?);
    let ctx = ToolContext::new(Arc::new(cfg), Arc::new(store));
    Ok(Agent::new(
        model,
        Arc::new(ToolRegistry::with_builtins()),
        ctx,
        system,
    ))
}

/// Run one agent turn, echoing tool calls to stderr as they happen.
async fn run_turn(agent: &Agent, history: Vec<Message>) -> Result<String> {
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(32);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let AgentEvent::ToolCall { name, input, .. } = event {
                eprintln!("  [{}] {}", name, input);
            }
        }
    });

    let result = agent.run(history, Some(&tx)).await;
    drop(tx);
    let _ = printer.await;
    result
}

async fn run_chat(agent: &Agent) -> Result<()> {
    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        history.push(Message::user(line));
        match run_turn(agent, history.clone()).await {
            Ok(answer) => {
                println!("\n{}\n", answer);
                history.push(Message::assistant(answer));
            }
            Err(e) => {
                eprintln!("Error: {:#}", e);
                history.pop();
            }
        }
    }
    Ok(())
}
