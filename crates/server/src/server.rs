//! MCP server handler backed by the Xray `OpenAPI` tool source.

use crate::client::build_xray_client;
use crate::error::Result;
use crate::mcp_config;
use crate::settings::AppSettings;
use mcp_xray_openapi::document::document_client;
use mcp_xray_openapi::{OpenApiToolSource, OpenApiToolsError, ToolSourceConfig};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData, Implementation, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{RoleServer, ServerHandler};
use serde_json::Value;
use std::sync::Arc;

/// Name of the tool source (shows up in logs and errors).
pub const SOURCE_NAME: &str = "Xray MCP";
/// Server name reported in `initialize`.
pub const SERVER_NAME: &str = "mcp-xray";

const INSTRUCTIONS: &str = "Tools for the Jira Xray Server/Data Center REST API. \
Each tool maps to one Xray REST endpoint; arguments are the endpoint's path, query and body \
parameters.";

#[derive(Clone)]
pub struct XrayMcpServer {
    source: Arc<OpenApiToolSource>,
}

impl XrayMcpServer {
    #[must_use]
    pub fn new(source: OpenApiToolSource) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// Forward a call to the tool source and map failures onto MCP results/errors.
    async fn dispatch(
        &self,
        name: &str,
        arguments: Value,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        self.source
            .call_tool(name, arguments)
            .await
            .or_else(|e| tool_error(name, e))
    }
}

fn tool_error(name: &str, e: OpenApiToolsError) -> std::result::Result<CallToolResult, ErrorData> {
    if e.is_invalid_call() {
        tracing::debug!(tool = %name, "Rejected tool call: {e}");
        return Err(ErrorData::invalid_params(e.to_string(), None));
    }
    if e.is_upstream() {
        tracing::warn!(tool = %name, "Tool call failed: {e}");
        return Ok(CallToolResult::error(vec![Content::text(e.to_string())]));
    }
    tracing::error!(tool = %name, "Tool call failed unexpectedly: {e}");
    Err(ErrorData::internal_error(e.to_string(), None))
}

/// Build the server: HTTP client, route maps/names, and tool discovery.
///
/// # Errors
///
/// Returns an error if the client cannot be built, a config file fails to load, or the `OpenAPI`
/// spec cannot be loaded or turned into tools.
pub async fn create_server(settings: &AppSettings) -> Result<XrayMcpServer> {
    let client = build_xray_client(settings)?;
    let mcp = mcp_config::resolve(settings, &document_client()).await?;

    let mut config = ToolSourceConfig::new(settings.openapi_spec.clone(), settings.url.clone());
    config.route_maps = mcp.route_maps;
    config.mcp_names = mcp.mcp_names;
    config.read_only = settings.read_only;

    let source = OpenApiToolSource::build(SOURCE_NAME, config, client).await?;
    tracing::info!(
        tools = source.tool_count(),
        read_only = settings.read_only,
        "Xray MCP server ready"
    );
    if settings.read_only {
        tracing::info!("Read-only mode: POST, PUT, DELETE and PATCH operations are not exposed");
    }

    Ok(XrayMcpServer::new(source))
}

impl ServerHandler for XrayMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Implementation::default()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: self.source.list_tools(),
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        let arguments = Value::Object(request.arguments.unwrap_or_default());
        self.dispatch(&request.name, arguments).await
    }
}
