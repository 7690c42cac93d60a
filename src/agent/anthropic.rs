//! Anthropic Messages API backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{api_key, send_with_retry, ChatModel, Message, MessagePart, ModelTurn, Role, ToolCall, ToolSpec};
use crate::config::AgentConfig;

const DEFAULT_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

impl AnthropicModel {
    /// Requires `ANTHROPIC_API_KEY` in the environment.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key("ANTHROPIC_API_KEY")?,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ApiMessage],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [AnthropicTool<'a>],
}

#[derive(Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Serialize, Debug)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|msg| ApiMessage {
            role: match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: msg
                .parts
                .iter()
                .filter_map(|part| match part {
                    MessagePart::Text { text } if text.is_empty() => None,
                    MessagePart::Text { text } => Some(ContentBlock::Text { text: text.clone() }),
                    MessagePart::ToolUse { id, name, input } => Some(ContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    MessagePart::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => Some(ContentBlock::ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        content: content.clone(),
                        is_error: *is_error,
                    }),
                })
                .collect(),
        })
        .filter(|m| !m.content.is_empty())
        .collect()
}

fn parse_response(resp: ApiResponse) -> ModelTurn {
    let mut text_parts = Vec::new();
    let mut calls = Vec::new();

    for block in resp.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => calls.push(ToolCall { id, name, input }),
            ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
        }
    }

    if calls.is_empty() {
        ModelTurn::Text(text_parts.join(""))
    } else {
        let text = if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join(""))
        };
        ModelTurn::ToolUse { text, calls }
    }
}

#[async_trait]
impl ChatModel for AnthropicModel {
    fn name(&self) -> String {
        format!("anthropic:{}", self.model)
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelTurn> {
        let api_messages = to_api_messages(messages);
        let api_tools: Vec<AnthropicTool> = tools
            .iter()
            .map(|t| AnthropicTool {
                name: &t.name,
                description: &t.description,
                input_schema: &t.parameters,
            })
            .collect();
        let body = RequestBody {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: &api_messages,
            tools: &api_tools,
        };
        let url = format!("{}/v1/messages", self.base_url);

        let response = send_with_retry(
            || {
                self.client
                    .post(&url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body)
            },
            self.max_retries,
            "Anthropic",
        )
        .await?;

        let resp: ApiResponse = response
            .json()
            .await
            .context("Invalid Anthropic response")?;
        if let Some(usage) = &resp.usage {
            tracing::debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Anthropic API usage"
            );
        }
        Ok(parse_response(resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_use_response_is_parsed() {
        let resp: ApiResponse = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "Searching." },
                { "type": "tool_use", "id": "toolu_1", "name": "search_docs", "input": { "query": "spans" } }
            ],
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        }))
        .unwrap();

        assert_eq!(
            parse_response(resp),
            ModelTurn::ToolUse {
                text: Some("Searching.".to_string()),
                calls: vec![ToolCall {
                    id: "toolu_1".to_string(),
                    name: "search_docs".to_string(),
                    input: json!({ "query": "spans" }),
                }],
            }
        );
    }

    #[test]
    fn text_response_ignores_unknown_blocks() {
        let resp: ApiResponse = serde_json::from_value(json!({
            "content": [
                { "type": "thinking", "thinking": "hmm", "signature": "x" },
                { "type": "text", "text": "Hello" }
            ]
        }))
        .unwrap();
        assert_eq!(parse_response(resp), ModelTurn::Text("Hello".to_string()));
    }

    #[test]
    fn messages_serialize_as_blocks() {
        let messages = vec![
            Message::user("hi"),
            Message {
                role: Role::Assistant,
                parts: vec![MessagePart::ToolUse {
                    id: "t1".to_string(),
                    name: "get_docs_file".to_string(),
                    input: json!({ "filename": "a.md" }),
                }],
            },
            Message {
                role: Role::User,
                parts: vec![MessagePart::ToolResult {
                    tool_use_id: "t1".to_string(),
                    content: "body".to_string(),
                    is_error: false,
                }],
            },
            Message::assistant(""),
        ];
        let api = to_api_messages(&messages);
        assert_eq!(api.len(), 3);

        let value = serde_json::to_value(&api).unwrap();
        assert_eq!(value[1]["content"][0]["type"], "tool_use");
        assert_eq!(value[2]["content"][0]["type"], "tool_result");
        assert!(value[2]["content"][0].get("is_error").is_none());
    }
}
