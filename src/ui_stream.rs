//! Chat UI message protocol.
//!
//! The bundled front end posts its whole conversation as UI messages and
//! reads the reply as a server-sent event stream of JSON chunks, one
//! `type` per chunk, terminated by `data: [DONE]`.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::{AgentEvent, Message};

/// Response header announcing the stream protocol version.
pub const STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const STREAM_VERSION: &str = "v1";
pub const DONE: &str = "[DONE]";

/// Body of `POST /api/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<UiMessage>,
    /// `"<provider>:<model>"` picked in the UI; the configured model otherwise.
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UiMessage {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<UiPart>,
}

#[derive(Debug, Deserialize)]
pub struct UiPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Agent history from UI messages: user and assistant text parts only.
/// Tool parts and empty messages are dropped.
pub fn history_from_ui_messages(messages: &[UiMessage]) -> Vec<Message> {
    messages
        .iter()
        .filter_map(|m| {
            let text: String = m
                .parts
                .iter()
                .filter(|p| p.kind == "text")
                .filter_map(|p| p.text.as_deref())
                .collect();
            if text.is_empty() {
                return None;
            }
            match m.role.as_str() {
                "user" => Some(Message::user(text)),
                "assistant" => Some(Message::assistant(text)),
                _ => None,
            }
        })
        .collect()
}

/// Builds the chunks of one assistant message.
pub struct UiStream {
    message_id: String,
    text_id: String,
}

impl UiStream {
    pub fn new() -> Self {
        Self {
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            text_id: format!("txt_{}", uuid::Uuid::new_v4().simple()),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn start(&self) -> Vec<Value> {
        vec![
            json!({ "type": "start", "messageId": self.message_id }),
            json!({ "type": "start-step" }),
        ]
    }

    /// Chunks for one agent event.
    pub fn event(&self, event: &AgentEvent) -> Vec<Value> {
        match event {
            AgentEvent::ToolCall { id, name, input } => vec![json!({
                "type": "tool-input-available",
                "toolCallId": id,
                "toolName": name,
                "input": input,
            })],
            AgentEvent::ToolResult { id, output, .. } => vec![json!({
                "type": "tool-output-available",
                "toolCallId": id,
                "output": output,
            })],
            AgentEvent::Text(text) => vec![
                json!({ "type": "text-start", "id": self.text_id }),
                json!({ "type": "text-delta", "id": self.text_id, "delta": text }),
                json!({ "type": "text-end", "id": self.text_id }),
            ],
        }
    }

    pub fn finish(&self) -> Vec<Value> {
        vec![
            json!({ "type": "finish-step" }),
            json!({ "type": "finish" }),
        ]
    }

    pub fn error(&self, message: &str) -> Value {
        json!({ "type": "error", "errorText": message })
    }
}

impl Default for UiStream {
    fn default() -> Self {
        Self::new()
    }
}
