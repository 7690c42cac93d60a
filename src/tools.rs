//! Agent-callable tools.
//!
//! The agent, the `/tools/*` HTTP routes and the MCP bridge all dispatch
//! through the same [`ToolRegistry`], so a tool behaves identically
//! wherever it is invoked.
//!
//! | Tool | Parameters | Result |
//! |------|------------|--------|
//! | `search_docs` | `query: string` | matching chunks joined by a separator line |
//! | `get_docs_file` | `filename: string` | the file's markdown, or a "does not exist" message |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::Config;
use crate::docs;
use crate::search::{self, SearchIndex};

/// A tool the agent can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores, e.g. `"search_docs"`.
    ///
    /// Also used as the route path (`POST /tools/{name}`).
    fn name(&self) -> &str;

    /// Description shown to the model; it decides when to call the tool from this.
    fn description(&self) -> &str;

    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. `params` has already passed [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String>;
}

/// What tools can reach: configuration and the search index.
#[derive(Clone)]
pub struct ToolContext {
    pub config: Arc<Config>,
    pub index: Arc<dyn SearchIndex>,
}

impl ToolContext {
    pub fn new(config: Arc<Config>, index: Arc<dyn SearchIndex>) -> Self {
        Self { config, index }
    }
}

/// `search_docs(query)`: hybrid search over the docs index.
pub struct SearchDocsTool;

#[async_trait]
impl Tool for SearchDocsTool {
    fn name(&self) -> &str {
        "search_docs"
    }

    fn description(&self) -> &str {
        "Search the documentation. The search is hybrid: it matches both keywords and \
         meaning, so the query can be a few keywords or a full sentence. Returns the \
         matching sections, each starting with its file path and headings."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Keywords or a natural-language question"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let query = params["query"].as_str().unwrap_or_default();
        search::search_docs(ctx.index.as_ref(), query, ctx.config.retrieval.limit).await
    }
}

/// `get_docs_file(filename)`: full markdown of one docs file.
pub struct GetDocsFileTool;

#[async_trait]
impl Tool for GetDocsFileTool {
    fn name(&self) -> &str {
        "get_docs_file"
    }

    fn description(&self) -> &str {
        "Get the full markdown of a documentation file, by its path relative to the docs \
         root as listed in the table of contents (e.g. `guides/setup.md`)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Path relative to the docs root; `.md` is optional"
                }
            },
            "required": ["filename"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let filename = params["filename"].as_str().unwrap_or_default();
        Ok(docs::read_docs_file(&ctx.config, filename))
    }
}

/// Check `params` against a tool schema: an object carrying every required
/// field, with declared `string` properties holding strings.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let Some(params_obj) = params.as_object() else {
        bail!("parameters must be a JSON object");
    };

    let required = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
        .unwrap_or_default();

    for field in required {
        if !params_obj.contains_key(field) {
            bail!("missing required parameter: {}", field);
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, prop_schema) in properties {
            let Some(value) = params_obj.get(name) else {
                continue;
            };
            if prop_schema.get("type").and_then(|t| t.as_str()) == Some("string")
                && !value.is_string()
            {
                bail!("parameter '{}' must be of type 'string'", name);
            }
        }
    }

    Ok(params.clone())
}

/// Registry of the tools offered to agents.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry holding `search_docs` and `get_docs_file`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchDocsTool));
        registry.register(Box::new(GetDocsFileTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Validate and run the tool called `name`.
    pub async fn call(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<String> {
        let Some(tool) = self.find(name) else {
            bail!("unknown tool: {}", name);
        };
        let params = validate_params(&tool.parameters_schema(), &params)?;
        tracing::debug!(tool = name, %params, "tool call");
        tool.execute(params, ctx).await
    }
}
