//! OpenAI-compatible chat completions backend.
//!
//! Works against any server speaking `/v1/chat/completions` with tool calls
//! (OpenAI, vLLM, llama.cpp server, Ollama's compatibility endpoint).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{api_key, send_with_retry, ChatModel, Message, MessagePart, ModelTurn, Role, ToolCall, ToolSpec};
use crate::config::AgentConfig;

const DEFAULT_API_URL: &str = "https://api.openai.com";

pub struct OpenAiModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAiModel {
    /// Requires `OPENAI_API_KEY` in the environment.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key("OPENAI_API_KEY")?,
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
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [ApiMessage],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [OpenAiTool<'a>],
}

#[derive(Serialize)]
struct OpenAiTool<'a> {
    r#type: &'static str,
    function: OpenAiFunction<'a>,
}

#[derive(Serialize)]
struct OpenAiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Serialize, Debug)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCallOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Debug)]
struct ToolCallOut {
    id: String,
    r#type: &'static str,
    function: FunctionCallOut,
}

#[derive(Serialize, Debug)]
struct FunctionCallOut {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

/// Flatten the conversation into chat messages. Tool results become one
/// `tool` message each, following the assistant message that requested them.
fn to_api_messages(system: &str, messages: &[Message]) -> Vec<ApiMessage> {
    let mut out = vec![ApiMessage {
        role: "system",
        content: Some(system.to_string()),
        tool_calls: Vec::new(),
        tool_call_id: None,
    }];

    for msg in messages {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut results = Vec::new();

        for part in &msg.parts {
            match part {
                MessagePart::Text { text: t } => text.push_str(t),
                MessagePart::ToolUse { id, name, input } => tool_calls.push(ToolCallOut {
                    id: id.clone(),
                    r#type: "function",
                    function: FunctionCallOut {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                }),
                MessagePart::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => results.push(ApiMessage {
                    role: "tool",
                    content: Some(content.clone()),
                    tool_calls: Vec::new(),
                    tool_call_id: Some(tool_use_id.clone()),
                }),
            }
        }

        if !text.is_empty() || !tool_calls.is_empty() {
            out.push(ApiMessage {
                role: match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls,
                tool_call_id: None,
            });
        }
        out.extend(results);
    }
    out
}

fn parse_response(resp: ChatResponse) -> Result<ModelTurn> {
    let message = resp
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| anyhow!("OpenAI response has no choices"))?;

    if message.tool_calls.is_empty() {
        return Ok(ModelTurn::Text(message.content.unwrap_or_default()));
    }

    let calls = message
        .tool_calls
        .into_iter()
        .map(|tc| {
            // Arguments arrive as a JSON string; malformed ones are passed on
            // as a bare string so the tool reports the validation error.
            let input = serde_json::from_str(&tc.function.arguments)
                .unwrap_or(serde_json::Value::String(tc.function.arguments));
            ToolCall {
                id: tc.id,
                name: tc.function.name,
                input,
            }
        })
        .collect();

    Ok(ModelTurn::ToolUse {
        text: message.content.filter(|t| !t.is_empty()),
        calls,
    })
}

#[async_trait]
impl ChatModel for OpenAiModel {
    fn name(&self) -> String {
        format!("openai:{}", self.model)
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelTurn> {
        let api_messages = to_api_messages(system, messages);
        let api_tools: Vec<OpenAiTool> = tools
            .iter()
            .map(|t| OpenAiTool {
                r#type: "function",
                function: OpenAiFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect();
        let body = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: &api_messages,
            tools: &api_tools,
        };
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = send_with_retry(
            || {
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
            self.max_retries,
            "OpenAI",
        )
        .await?;

        let resp: ChatResponse = response.json().await.context("Invalid OpenAI response")?;
        parse_response(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_calls_are_parsed_from_argument_strings() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "search_docs", "arguments": "{\"query\":\"traces\"}" }
                    }]
                }
            }]
        }))
        .unwrap();

        assert_eq!(
            parse_response(resp).unwrap(),
            ModelTurn::ToolUse {
                text: None,
                calls: vec![ToolCall {
                    id: "call_1".to_string(),
                    name: "search_docs".to_string(),
                    input: json!({ "query": "traces" }),
                }],
            }
        );
    }

    #[test]
    fn plain_answer_and_empty_choices() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Done." } }]
        }))
        .unwrap();
        assert_eq!(parse_response(resp).unwrap(), ModelTurn::Text("Done.".to_string()));

        let empty: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(parse_response(empty).is_err());
    }

    #[test]
    fn tool_results_become_tool_messages() {
        let messages = vec![
            Message::user("q"),
            Message {
                role: Role::Assistant,
                parts: vec![MessagePart::ToolUse {
                    id: "c1".to_string(),
                    name: "search_docs".to_string(),
                    input: json!({ "query": "q" }),
                }],
            },
            Message {
                role: Role::User,
                parts: vec![MessagePart::ToolResult {
                    tool_use_id: "c1".to_string(),
                    content: "hits".to_string(),
                    is_error: false,
                }],
            },
        ];

        let value = serde_json::to_value(to_api_messages("sys", &messages)).unwrap();
        let roles: Vec<&str> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(value[2]["tool_calls"][0]["function"]["arguments"], "{\"query\":\"q\"}");
        assert!(value[2].get("content").is_none());
        assert_eq!(value[3]["tool_call_id"], "c1");
    }
}
