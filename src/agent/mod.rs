//! Tool-calling agent over a hosted chat model.
//!
//! [`Agent::run`] drives one user turn: it calls the model with the
//! conversation and the tool specs, executes any tool calls through the
//! [`ToolRegistry`], feeds the results back, and stops when the model
//! answers with plain text. Progress is reported as [`AgentEvent`]s so the
//! web layer can stream tool activity before the answer arrives.

mod anthropic;
mod openai;

pub use anthropic::AnthropicModel;
pub use openai::OpenAiModel;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::{AgentConfig, Config};
use crate::docs::docs_url;
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessagePart {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<MessagePart>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A tool as advertised to the model.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// One model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    Text(String),
    ToolUse {
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
}

/// A chat completion backend that supports tool use.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// `"<provider>:<model>"`, for logs.
    fn name(&self) -> String;

    /// Complete the conversation. An empty `tools` slice disables tool use.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelTurn>;
}

/// Progress of a run, in order of occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ToolCall {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        id: String,
        name: String,
        output: String,
    },
    Text(String),
}

/// Build the model named by `agent.provider`.
pub fn create_model(config: &AgentConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicModel::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiModel::new(config)?)),
        "disabled" => bail!("Agent is disabled. Set [agent] provider in config."),
        other => bail!("Unknown agent provider: {}", other),
    }
}

/// System prompt: how to use the tools, how to cite pages, and the full
/// table of contents.
pub fn instructions(config: &Config, toc: &str) -> String {
    let example_url = docs_url(&config.docs.base_url, "foo/bar.md");
    format!(
        "Help the user answer questions about {product}. \
Start by using the `search_docs` tool to search the documentation and answer the question based on the search results. \
It uses a hybrid of semantic and keyword search, so writing either keywords or sentences may work. \
It's not a web search, and the query doesn't need to name the product. \
Each search result starts with the path to a .md file. \
The file `foo/bar.md` corresponds to the URL `{example_url}`. Include the URLs in your answer. \
The search results may not contain complete files, or may miss the files you need. \
If they don't have what you need, use the `get_docs_file` tool. \
You probably only need to search once or twice, definitely not more than 3 times. \
The user doesn't see the search results, so answer with a summary of the relevant information. \
For reference, here are the files available to `get_docs_file`, with the sections within each:\n\n{toc}",
        product = config.agent.product,
    )
}

pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    system: String,
    max_tool_rounds: usize,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        ctx: ToolContext,
        system: String,
    ) -> Self {
        let max_tool_rounds = ctx.config.agent.max_tool_rounds;
        Self {
            model,
            tools,
            ctx,
            system,
            max_tool_rounds,
        }
    }

    fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools
            .tools()
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Answer the last user message in `history`.
    ///
    /// Tool failures are reported to the model as `Error: ...` results.
    /// A failing model call aborts the run. After `max_tool_rounds` rounds
    /// of tool use the model is asked once more without tools.
    pub async fn run(
        &self,
        history: Vec<Message>,
        sink: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<String> {
        let specs = self.tool_specs();
        let mut messages = history;

        for round in 0..=self.max_tool_rounds {
            let tools: &[ToolSpec] = if round < self.max_tool_rounds {
                &specs
            } else {
                &[]
            };
            let turn = self.model.complete(&self.system, &messages, tools).await?;

            let (text, calls) = match turn {
                ModelTurn::Text(text) => {
                    emit(sink, AgentEvent::Text(text.clone())).await;
                    return Ok(text);
                }
                ModelTurn::ToolUse { text, calls } => (text, calls),
            };
            tracing::debug!(model = %self.model.name(), round, calls = calls.len(), "tool round");

            let mut assistant_parts = Vec::with_capacity(calls.len() + 1);
            if let Some(text) = text.filter(|t| !t.is_empty()) {
                assistant_parts.push(MessagePart::Text { text });
            }
            let mut result_parts = Vec::with_capacity(calls.len());

            for call in calls {
                emit(
                    sink,
                    AgentEvent::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.input.clone(),
                    },
                )
                .await;

                let (content, is_error) = match self
                    .tools
                    .call(&call.name, call.input.clone(), &self.ctx)
                    .await
                {
                    Ok(output) => (output, false),
                    Err(e) => {
                        tracing::debug!(tool = %call.name, error = %e, "tool failed");
                        (format!("Error: {e:#}"), true)
                    }
                };

                emit(
                    sink,
                    AgentEvent::ToolResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        output: content.clone(),
                    },
                )
                .await;

                assistant_parts.push(MessagePart::ToolUse {
                    id: call.id.clone(),
                    name: call.name,
                    input: call.input,
                });
                result_parts.push(MessagePart::ToolResult {
                    tool_use_id: call.id,
                    content,
                    is_error,
                });
            }

            messages.push(Message {
                role: Role::Assistant,
                parts: assistant_parts,
            });
            messages.push(Message {
                role: Role::User,
                parts: result_parts,
            });
        }

        Err(anyhow!(
            "Model kept requesting tools after {} rounds",
            self.max_tool_rounds
        ))
    }
}

async fn emit(sink: Option<&mpsc::Sender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = sink {
        // A closed receiver only means nobody is listening any more.
        let _ = tx.send(event).await;
    }
}

/// Send a request built by `build`, retrying 429 and 5xx responses and
/// network errors with exponential backoff. A `retry-after` header in
/// seconds overrides the backoff.
pub(crate) async fn send_with_retry<F>(
    build: F,
    max_retries: u32,
    label: &str,
) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;
    let mut delay = Duration::ZERO;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tracing::info!(attempt, ?delay, "{label} request retry");
            tokio::time::sleep(delay).await;
        }
        let backoff = Duration::from_secs(1 << attempt.min(5));

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    delay = retry_after(&response).unwrap_or(backoff);
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                delay = backoff;
                last_err = Some(anyhow!("{} connection error: {}", label, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", label)))
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let secs = response
        .headers()
        .get("retry-after")?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()?;
    Some(Duration::from_secs(secs.min(60)))
}

pub(crate) fn api_key(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| anyhow!("{} environment variable not set", var))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::SearchHit;
    use crate::search::SearchIndex;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned turns and records what it was sent.
    pub(crate) struct ScriptedModel {
        turns: Mutex<VecDeque<ModelTurn>>,
        pub seen: Mutex<Vec<(Vec<Message>, usize)>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(turns: Vec<ModelTurn>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> String {
            "scripted:test".to_string()
        }

        async fn complete(
            &self,
            _system: &str,
            messages: &[Message],
            tools: &[ToolSpec],
        ) -> Result<ModelTurn> {
            self.seen
                .lock()
                .unwrap()
                .push((messages.to_vec(), tools.len()));
            self.turns
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("script exhausted"))
        }
    }

    struct NoIndex;

    #[async_trait]
    impl SearchIndex for NoIndex {
        async fn hybrid_query(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
            Ok(Vec::new())
        }
    }

    fn agent(model: Arc<ScriptedModel>, root: &std::path::Path, rounds: usize) -> Agent {
        let mut config = Config::minimal(root);
        config.agent.max_tool_rounds = rounds;
        let ctx = ToolContext::new(Arc::new(config), Arc::new(NoIndex));
        Agent::new(
            model,
            Arc::new(ToolRegistry::with_builtins()),
            ctx,
            "system".to_string(),
        )
    }

    fn call(id: &str, name: &str, input: Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    #[tokio::test]
    async fn tool_call_then_answer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("setup.md"), "# Setup\n\npip install it").unwrap();
        let model = Arc::new(ScriptedModel::new(vec![
            ModelTurn::ToolUse {
                text: Some("Let me look.".to_string()),
                calls: vec![call("t1", "get_docs_file", serde_json::json!({ "filename": "setup" }))],
            },
            ModelTurn::Text("Run pip install.".to_string()),
        ]));
        let agent = agent(model.clone(), dir.path(), 8);

        let (tx, mut rx) = mpsc::channel(16);
        let answer = agent
            .run(vec![Message::user("how do I install?")], Some(&tx))
            .await
            .unwrap();
        drop(tx);
        assert_eq!(answer, "Run pip install.");

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], AgentEvent::ToolCall { name, .. } if name == "get_docs_file"));
        assert_eq!(
            events[1],
            AgentEvent::ToolResult {
                id: "t1".to_string(),
                name: "get_docs_file".to_string(),
                output: "# Setup\n\npip install it".to_string(),
            }
        );
        assert_eq!(events[2], AgentEvent::Text("Run pip install.".to_string()));

        let seen = model.seen.lock().unwrap();
        let (second_call, _) = &seen[1];
        assert_eq!(second_call.len(), 3);
        assert_eq!(second_call[1].role, Role::Assistant);
        assert!(matches!(
            &second_call[2].parts[0],
            MessagePart::ToolResult { tool_use_id, is_error: false, .. } if tool_use_id == "t1"
        ));
    }

    #[tokio::test]
    async fn failing_tool_becomes_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new(vec![
            ModelTurn::ToolUse {
                text: None,
                calls: vec![call("t1", "search_docs", serde_json::json!({}))],
            },
            ModelTurn::Text("Sorry.".to_string()),
        ]));
        let agent = agent(model.clone(), dir.path(), 8);

        assert_eq!(agent.run(vec![Message::user("q")], None).await.unwrap(), "Sorry.");

        let seen = model.seen.lock().unwrap();
        match &seen[1].0[2].parts[0] {
            MessagePart::ToolResult { content, is_error, .. } => {
                assert!(*is_error);
                assert!(content.starts_with("Error: missing required parameter"));
            }
            other => panic!("unexpected part {other:?}"),
        }
    }

    #[tokio::test]
    async fn round_limit_forces_final_answer_without_tools() {
        let dir = tempfile::tempdir().unwrap();
        let search = || ModelTurn::ToolUse {
            text: None,
            calls: vec![call("t", "search_docs", serde_json::json!({ "query": "x" }))],
        };
        let model = Arc::new(ScriptedModel::new(vec![
            search(),
            search(),
            ModelTurn::Text("Best effort.".to_string()),
        ]));
        let agent = agent(model.clone(), dir.path(), 2);

        assert_eq!(
            agent.run(vec![Message::user("q")], None).await.unwrap(),
            "Best effort."
        );
        let tool_counts: Vec<usize> = model.seen.lock().unwrap().iter().map(|(_, n)| *n).collect();
        assert_eq!(tool_counts, vec![2, 2, 0]);
    }

    #[tokio::test]
    async fn model_failure_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new(Vec::new()));
        assert!(agent(model, dir.path(), 8)
            .run(vec![Message::user("q")], None)
            .await
            .is_err());
    }

    #[test]
    fn instructions_carry_url_rule_and_toc() {
        let config = Config::minimal("/docs");
        let prompt = instructions(&config, "a.md\n# A\n\n");
        assert!(prompt.contains("https://logfire.pydantic.dev/docs/foo/bar/"));
        assert!(prompt.contains("Pydantic Logfire"));
        assert!(prompt.ends_with("a.md\n# A\n\n"));
    }

    #[test]
    fn disabled_agent_cannot_build_a_model() {
        let config = Config::minimal("/docs");
        assert!(create_model(&config.agent).is_err());
    }
}
