//! MCP JSON-RPC protocol bridge.
//!
//! Exposes the [`ToolRegistry`] as MCP tools over Streamable HTTP, mounted
//! by the server at `/mcp`, so editors and other MCP clients can search the
//! docs without going through the chat agent.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::{ErrorData as McpError, ServerHandler};

use crate::tools::{ToolContext, ToolRegistry};

/// Each MCP session receives a clone; everything is behind `Arc`.
#[derive(Clone)]
pub struct McpBridge {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl McpBridge {
    pub fn new(tools: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self { tools, ctx }
    }

    /// The tower service to mount on the HTTP router.
    pub fn into_service(self) -> StreamableHttpService<McpBridge, LocalSessionManager> {
        StreamableHttpService::new(
            move || Ok(self.clone()),
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig::default(),
        )
    }

    fn to_mcp_tool(tool: &dyn crate::tools::Tool) -> Tool {
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> =
            match tool.parameters_schema() {
                serde_json::Value::Object(map) => Arc::new(map),
                _ => Arc::new(serde_json::Map::new()),
            };

        Tool {
            name: Cow::Owned(tool.name().to_string()),
            title: None,
            description: Some(Cow::Owned(tool.description().to_string())),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "docs-chat".to_string(),
                title: Some("Docs Chat".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Documentation search for {}. Use search_docs to find relevant sections, \
                 then get_docs_file to read a whole page.",
                self.ctx.config.agent.product
            )),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .tools
            .tools()
            .iter()
            .map(|t| Self::to_mcp_tool(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.find(name).map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if self.tools.find(&request.name).is_none() {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            ));
        }

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match self.tools.call(&request.name, params, &self.ctx).await {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tools::SearchDocsTool;
    use crate::tools::Tool as _;

    #[test]
    fn tool_descriptors_carry_schema() {
        let tool = McpBridge::to_mcp_tool(&SearchDocsTool);
        assert_eq!(tool.name, "search_docs");
        assert_eq!(tool.input_schema["required"][0], "query");
        assert_eq!(
            tool.description.as_deref(),
            Some(SearchDocsTool.description())
        );
    }

    #[test]
    fn server_info_names_the_product() {
        struct Empty;
        #[async_trait::async_trait]
        impl crate::search::SearchIndex for Empty {
            async fn hybrid_query(
                &self,
                _query: &str,
                _limit: usize,
            ) -> anyhow::Result<Vec<crate::models::SearchHit>> {
                Ok(Vec::new())
            }
        }

        let ctx = ToolContext::new(Arc::new(Config::minimal("/docs")), Arc::new(Empty));
        let bridge = McpBridge::new(Arc::new(ToolRegistry::with_builtins()), ctx);
        let info = bridge.get_info();
        assert_eq!(info.server_info.name, "docs-chat");
        assert!(info.instructions.unwrap().contains("Pydantic Logfire"));
    }
}
