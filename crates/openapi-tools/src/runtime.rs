//! `OpenAPI` tool source runtime.
//!
//! Converts `OpenAPI` operations into MCP tools (filtered by route maps, renamed through the
//! `mcp_names` table) and executes the outbound HTTP request for each `tools/call`.

use crate::config::ToolSourceConfig;
use crate::document::{self, document_client};
use crate::error::{OpenApiToolsError, Result};
use crate::query::{self, QueryPair, QuerySerialization, value_to_string};
use crate::redact::sanitize_reqwest_error;
use crate::resolver::{DocId, OpenApiResolver};
use crate::route_map::{HttpMethod, McpType, RouteMatcher};
use crate::semantics::annotations_for_method;
use crate::upgrade::normalize_document;
use base64::Engine as _;
use mime::Mime;
use openapiv3::{
    MediaType, OpenAPI, Operation, Parameter, ParameterSchemaOrContent, PathItem, ReferenceOr,
    RequestBody, Response, Schema, StatusCode,
};
use parking_lot::RwLock;
use reqwest::Client;
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

/// `OpenAPI` tool source that exposes HTTP API endpoints as MCP tools.
#[derive(Clone)]
pub struct OpenApiToolSource {
    /// Source name (used for logs and error context).
    name: String,
    config: ToolSourceConfig,
    /// Client for API calls; carries auth headers and the call timeout.
    client: Client,
    /// Client for spec and `$ref` fetches.
    spec_client: Client,
    spec_title: Arc<RwLock<Option<String>>>,
    tools: Arc<RwLock<Vec<GeneratedTool>>>,
}

/// A tool generated from an `OpenAPI` operation.
#[derive(Debug, Clone)]
struct GeneratedTool {
    /// Exposed tool name
    name: String,
    operation_id: Option<String>,
    /// Operation summary, surfaced as the annotation title
    title: Option<String>,
    description: Option<String>,
    method: HttpMethod,
    /// Path template (e.g., /rest/raven/1.0/api/test/{testKey}/testruns)
    path: String,
    parameters: Vec<ToolParameter>,
    input_schema: Value,
    /// Optional output schema for MCP `Tool.output_schema` (must be a JSON Schema object).
    output_schema: Option<Arc<JsonObject>>,
}

struct OperationRef<'a> {
    current_doc: &'a DocId,
    path_item_params: &'a [ReferenceOr<Parameter>],
    path: &'a str,
    method: HttpMethod,
    operation: &'a Operation,
}

/// Parameter information for a tool.
#[derive(Debug, Clone)]
struct ToolParameter {
    /// Argument name in the tool schema
    tool_name: String,
    /// Name on the wire
    original_name: String,
    location: ParamLocation,
    required: bool,
    schema: Value,
    /// Query serialization settings, for query parameters only
    query: Option<QuerySerialization>,
}

struct RequestParts {
    path: String,
    query_params: Vec<QueryPair>,
    headers: Vec<(String, String)>,
    body_fields: serde_json::Map<String, Value>,
    body_payload: Option<Value>,
}

enum ToolResponse {
    Value(Value),
    Image { bytes: Vec<u8>, mime_type: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamLocation {
    Path,
    Query,
    Header,
    /// One property of a flattened object body.
    Body,
    /// The entire request body, passed as the `body` argument.
    WholeBody,
}

/// Argument name used when a request body is not a flattenable object.
const BODY_ARG: &str = "body";

/// Nesting limit when inlining `$ref`d schemas.
const MAX_INLINE_DEPTH: usize = 32;

impl OpenApiToolSource {
    /// Create a new `OpenAPI` tool source.
    ///
    /// `client` is used for every API call and is expected to carry authentication. The spec is
    /// not fetched until [`Self::start`] (or [`Self::build`]).
    #[must_use]
    pub fn new(name: impl Into<String>, config: ToolSourceConfig, client: Client) -> Self {
        Self {
            name: name.into(),
            config,
            client,
            spec_client: document_client(),
            spec_title: Arc::new(RwLock::new(None)),
            tools: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create and start a tool source in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if spec loading, parsing, or tool discovery fails.
    pub async fn build(
        name: impl Into<String>,
        config: ToolSourceConfig,
        client: Client,
    ) -> Result<Self> {
        let src = Self::new(name, config, client);
        src.start().await?;
        Ok(src)
    }

    /// Load the spec and return both its (upgraded) JSON form and the parsed model.
    async fn load_spec(&self) -> Result<(Value, OpenAPI)> {
        tracing::info!(source = %self.name, "Loading OpenAPI spec from {}", self.config.spec);
        let raw = document::load_document(&self.config.spec, &self.spec_client).await?;
        normalize_document(raw, &self.config.spec)
    }

    /// Discover tools from the `OpenAPI` spec.
    async fn discover_tools(&self, spec: &OpenAPI, root: Value) -> Result<Vec<GeneratedTool>> {
        let root_doc = DocId::parse(&self.config.spec)?;
        let resolver = OpenApiResolver::new(root_doc, root, &self.spec_client);
        let matcher = RouteMatcher::new(&self.config.effective_route_maps())?;

        let mut tools = Vec::new();
        let mut tool_names: HashSet<String> = HashSet::new();
        let mut operation_ids: HashSet<String> = HashSet::new();

        for (path, path_item) in &spec.paths.paths {
            let (path_doc, path_item) = match resolver
                .resolve(resolver.root_doc(), path_item)
                .await
            {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("Skipping path '{}' in '{}': {}", path, self.name, e);
                    continue;
                }
            };

            for (method, op) in path_operations(&path_item) {
                if let Some(id) = &op.operation_id {
                    operation_ids.insert(id.clone());
                }

                if matcher.decide(method, path, &op.tags) == McpType::Exclude {
                    tracing::debug!("Excluding {} {} by route map", method, path);
                    continue;
                }

                let input = OperationRef {
                    current_doc: &path_doc,
                    path_item_params: &path_item.parameters,
                    path,
                    method,
                    operation: op,
                };

                match self.generate_tool(&resolver, input, &mut tool_names).await {
                    Ok(tool) => tools.push(tool),
                    Err(e) => {
                        tracing::warn!("Skipping {} {} in '{}': {}", method, path, self.name, e);
                    }
                }
            }
        }

        let mut unmatched: Vec<&String> = self
            .config
            .mcp_names
            .keys()
            .filter(|id| !operation_ids.contains(*id))
            .collect();
        unmatched.sort();
        for id in unmatched {
            tracing::warn!(
                "mcp_names entry '{}' in '{}' does not match any operationId",
                id,
                self.name
            );
        }

        Ok(tools)
    }

    /// `mcp_names` wins, then `operationId`, then a name derived from method and path.
    fn base_tool_name(&self, operation: &Operation, method: HttpMethod, path: &str) -> String {
        operation
            .operation_id
            .as_ref()
            .map(|id| self.config.mcp_names.get(id).unwrap_or(id).clone())
            .unwrap_or_else(|| generate_canonical_name(method, path))
    }

    fn tool_description(operation: &Operation, method: HttpMethod, path: &str) -> String {
        match (&operation.summary, &operation.description) {
            (Some(summary), Some(desc)) if summary != desc => format!("{summary}\n\n{desc}"),
            (_, Some(desc)) => desc.clone(),
            (Some(summary), None) => summary.clone(),
            (None, None) => format!("Calls {method} {path}"),
        }
    }

    async fn collect_tool_parameters(
        &self,
        resolver: &OpenApiResolver<'_>,
        input: &OperationRef<'_>,
    ) -> Result<Vec<ToolParameter>> {
        let merged_params = merge_parameters(
            resolver,
            input.current_doc,
            input.path_item_params,
            &input.operation.parameters,
        )
        .await?;

        let mut parameters = Vec::new();
        let mut param_names: HashSet<String> = HashSet::new();

        for (param_doc, param) in &merged_params {
            let param_info = extract_parameter(resolver, param_doc, param).await?;
            if !param_names.insert(param_info.tool_name.clone()) {
                return Err(OpenApiToolsError::ParamCollision(format!(
                    "Parameter '{}' appears multiple times in {} {}",
                    param_info.tool_name, input.method, input.path
                )));
            }
            parameters.push(param_info);
        }

        let Some(body_ref) = &input.operation.request_body else {
            return Ok(parameters);
        };
        let (body_doc, body) = resolver
            .resolve(input.current_doc, body_ref)
            .await?;
        let Some(schema_ref) = json_media_type(&body.content).and_then(|mt| mt.schema.as_ref())
        else {
            tracing::debug!(
                "{} {} has no JSON request body; body arguments are not exposed",
                input.method,
                input.path
            );
            return Ok(parameters);
        };

        let body_params = extract_body_params(resolver, &body_doc, &body, schema_ref).await?;
        for bp in &body_params {
            if !param_names.insert(bp.tool_name.clone()) {
                return Err(OpenApiToolsError::ParamCollision(format!(
                    "Body parameter '{}' collides with a path/query/header parameter in {} {}",
                    bp.tool_name, input.method, input.path
                )));
            }
        }
        parameters.extend(body_params);

        Ok(parameters)
    }

    /// Generate a tool from an `OpenAPI` operation.
    async fn generate_tool(
        &self,
        resolver: &OpenApiResolver<'_>,
        input: OperationRef<'_>,
        tool_names: &mut HashSet<String>,
    ) -> Result<GeneratedTool> {
        let operation = input.operation;
        let parameters = self.collect_tool_parameters(resolver, &input).await?;

        let base_name = self.base_tool_name(operation, input.method, input.path);
        let name = reserve_unique_tool_name(tool_names, &base_name);
        if name != base_name {
            tracing::warn!(
                "Tool name '{}' is already taken in '{}'; exposing {} {} as '{}'",
                base_name,
                self.name,
                input.method,
                input.path,
                name
            );
        }

        let output_schema = match derive_body_schema(resolver, input.current_doc, operation).await?
        {
            Some(body_schema) => Some(wrap_body_output_schema(&body_schema)?),
            None => None,
        };

        Ok(GeneratedTool {
            name,
            operation_id: operation.operation_id.clone(),
            title: operation.summary.clone(),
            description: Some(Self::tool_description(operation, input.method, input.path)),
            method: input.method,
            path: input.path.to_string(),
            input_schema: build_input_schema(&parameters),
            parameters,
            output_schema,
        })
    }

    /// Execute an HTTP request for a tool call.
    async fn execute_request(&self, tool: &GeneratedTool, arguments: &Value) -> Result<ToolResponse> {
        let parts = build_request_parts(tool, arguments)?;
        let url = build_url(&self.config.base_url, &parts.path, &parts.query_params)?;

        tracing::debug!(tool = %tool.name, "{} {}", tool.method, crate::redact::redact_url(&url));

        let mut request = self.client.request(tool.method.to_reqwest(), url);
        for (key, value) in &parts.headers {
            request = request.header(key, value);
        }
        if let Some(payload) = &parts.body_payload {
            request = request.json(payload);
        } else if !parts.body_fields.is_empty() {
            request = request.json(&parts.body_fields);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OpenApiToolsError::Request(sanitize_reqwest_error(&e)))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = read_body_limited(response, self.config.max_response_bytes).await?;

        if !status.is_success() {
            let error_body = parse_json_or_text(bytes_to_text_or_base64_json(
                &bytes,
                content_type.as_deref(),
            ));
            return Err(OpenApiToolsError::Http(format!(
                "API returned {} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                error_body
            )));
        }

        if is_image_content_type(content_type.as_deref()) {
            let mime_type = content_type.unwrap_or_else(|| "image/*".to_string());
            return Ok(ToolResponse::Image { bytes, mime_type });
        }

        Ok(ToolResponse::Value(parse_json_or_text(
            bytes_to_text_or_base64_json(&bytes, content_type.as_deref()),
        )))
    }

    /// List the MCP `Tool`s exposed by this source.
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools
            .read()
            .iter()
            .map(|t| {
                let schema_obj = t
                    .input_schema
                    .as_object()
                    .cloned()
                    .unwrap_or_else(JsonObject::new);
                let mut tool = Tool::new(
                    t.name.clone(),
                    t.description.clone().unwrap_or_default(),
                    Arc::new(schema_obj),
                );
                tool.output_schema.clone_from(&t.output_schema);
                tool.annotations = Some(annotations_for_method(t.method, t.title.clone()));
                tool
            })
            .collect()
    }

    /// Execute a tool call.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the tool name is unknown
    /// - required parameters are missing
    /// - the outbound HTTP request fails (transport or non-2xx response)
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        // Clone out of the lock; it must not be held across the request.
        let tool = self
            .tools
            .read()
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| OpenApiToolsError::Runtime(format!("Tool not found: {name}")))?;

        match self.execute_request(&tool, &arguments).await? {
            ToolResponse::Image { bytes, mime_type } => {
                let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
                Ok(CallToolResult::success(vec![Content::image(b64, mime_type)]))
            }
            ToolResponse::Value(body) if tool.output_schema.is_some() => {
                let structured = json!({ "body": body });
                let text = serde_json::to_string(&structured)
                    .unwrap_or_else(|_| structured.to_string());
                Ok(CallToolResult {
                    content: vec![Content::text(text)],
                    structured_content: Some(structured),
                    is_error: Some(false),
                    meta: None,
                })
            }
            ToolResponse::Value(body) => {
                let text = match body {
                    Value::String(s) => s,
                    other => serde_json::to_string(&other).unwrap_or_else(|_| other.to_string()),
                };
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
        }
    }

    /// Load the spec, discover tools, and make the source ready for use.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid, or if spec loading/parsing or tool discovery
    /// fails or exceeds the startup timeout.
    pub async fn start(&self) -> Result<()> {
        validate_base_url(&self.config.base_url)?;

        let startup_timeout = self.config.startup_timeout;
        let startup = async {
            let (root, spec) = self.load_spec().await?;
            let tools = self.discover_tools(&spec, root).await?;
            Ok::<_, OpenApiToolsError>((spec, tools))
        };

        let (spec, tools) = match tokio::time::timeout(startup_timeout, startup).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(OpenApiToolsError::Startup(format!(
                    "Startup timeout after {}s for OpenAPI tool source '{}'",
                    startup_timeout.as_secs(),
                    self.name
                )));
            }
        };

        tracing::info!(
            "Discovered {} tools from OpenAPI spec '{}' ({})",
            tools.len(),
            spec.info.title,
            self.name
        );

        *self.spec_title.write() = Some(spec.info.title);
        *self.tools.write() = tools;

        Ok(())
    }

    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.tools.read().len()
    }

    /// The `info.title` from the parsed `OpenAPI` spec.
    ///
    /// Returns `None` if the source has not been started yet.
    #[must_use]
    pub fn spec_title(&self) -> Option<String> {
        self.spec_title.read().clone()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn path_operations(item: &PathItem) -> impl Iterator<Item = (HttpMethod, &Operation)> {
    [
        (HttpMethod::Get, &item.get),
        (HttpMethod::Post, &item.post),
        (HttpMethod::Put, &item.put),
        (HttpMethod::Delete, &item.delete),
        (HttpMethod::Patch, &item.patch),
        (HttpMethod::Head, &item.head),
        (HttpMethod::Options, &item.options),
        (HttpMethod::Trace, &item.trace),
    ]
    .into_iter()
    .filter_map(|(m, op)| op.as_ref().map(|op| (m, op)))
}

fn validate_base_url(base_url: &str) -> Result<()> {
    let url = Url::parse(base_url)
        .map_err(|e| OpenApiToolsError::Config(format!("Invalid base URL '{base_url}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(OpenApiToolsError::Config(format!(
            "Invalid base URL '{base_url}': must be an http(s) URL"
        )));
    }
    Ok(())
}

/// Generate a canonical tool name from method and path, e.g. `get_api_test_testKey`.
fn generate_canonical_name(method: HttpMethod, path: &str) -> String {
    let raw = format!("{}_{path}", method.as_str().to_ascii_lowercase());
    let mut name = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }
    name.trim_matches('_').chars().take(64).collect()
}

fn reserve_unique_tool_name(tool_names: &mut HashSet<String>, base: &str) -> String {
    if tool_names.insert(base.to_string()) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| tool_names.insert(candidate.clone()))
        .unwrap_or_else(|| base.to_string())
}

/// `application/json` first, then any other JSON media type (`+json`, `text/json`, ...).
fn json_media_type<'a, C>(content: C) -> Option<&'a MediaType>
where
    C: IntoIterator<Item = (&'a String, &'a MediaType)> + Copy,
{
    content
        .into_iter()
        .find_map(|(k, v)| k.eq_ignore_ascii_case("application/json").then_some(v))
        .or_else(|| {
            content
                .into_iter()
                .find_map(|(k, v)| k.to_ascii_lowercase().contains("json").then_some(v))
        })
}

async fn derive_body_schema(
    resolver: &OpenApiResolver<'_>,
    current_doc: &DocId,
    operation: &Operation,
) -> Result<Option<Value>> {
    // Lowest explicit 2xx code first, then the 2XX range.
    let explicit = operation
        .responses
        .responses
        .iter()
        .filter_map(|(code, resp)| match code {
            StatusCode::Code(n) if (200..300).contains(n) => Some((*n, resp)),
            _ => None,
        })
        .min_by_key(|(n, _)| *n)
        .map(|(_, r)| r);
    let range = operation
        .responses
        .responses
        .iter()
        .find_map(|(code, resp)| matches!(code, StatusCode::Range(2)).then_some(resp));

    let Some(resp_ref) = explicit.or(range) else {
        return Ok(None);
    };

    let (resp_doc, resp): (DocId, Response) =
        resolver.resolve(current_doc, resp_ref).await?;

    let Some(schema_ref) = json_media_type(&resp.content).and_then(|mt| mt.schema.as_ref()) else {
        return Ok(None);
    };

    Ok(Some(extract_schema_ref(resolver, &resp_doc, schema_ref).await?))
}

async fn extract_parameter(
    resolver: &OpenApiResolver<'_>,
    current_doc: &DocId,
    param: &Parameter,
) -> Result<ToolParameter> {
    let data = param.parameter_data_ref();
    let (location, required, query) = match param {
        // Path params are always required.
        Parameter::Path { .. } => (ParamLocation::Path, true, None),
        Parameter::Query {
            style,
            allow_reserved,
            allow_empty_value,
            ..
        } => (
            ParamLocation::Query,
            data.required,
            Some(QuerySerialization::new(
                style.clone(),
                data.explode,
                *allow_reserved,
                allow_empty_value.unwrap_or(false),
            )),
        ),
        Parameter::Header { .. } => (ParamLocation::Header, data.required, None),
        Parameter::Cookie { .. } => {
            return Err(OpenApiToolsError::OpenApi(
                "Cookie parameters not supported".to_string(),
            ));
        }
    };

    let mut schema = extract_schema(resolver, current_doc, &data.format).await?;
    if let (Some(obj), Some(desc)) = (schema.as_object_mut(), &data.description)
        && !obj.contains_key("description")
    {
        obj.insert("description".to_string(), Value::String(desc.clone()));
    }

    Ok(ToolParameter {
        tool_name: data.name.clone(),
        original_name: data.name.clone(),
        location,
        required,
        schema,
        query,
    })
}

/// Flatten an object request body into one argument per property, otherwise expose a single
/// `body` argument.
async fn extract_body_params(
    resolver: &OpenApiResolver<'_>,
    current_doc: &DocId,
    body: &RequestBody,
    schema_ref: &ReferenceOr<Schema>,
) -> Result<Vec<ToolParameter>> {
    let (schema_doc, schema) = match schema_ref {
        ReferenceOr::Item(s) => (current_doc.clone(), s.clone()),
        ReferenceOr::Reference { .. } => resolver.resolve(current_doc, schema_ref).await?,
    };

    // An optional body cannot make any of its fields required at the tool-arg level.
    let body_required = body.required;

    if let openapiv3::SchemaKind::Type(openapiv3::Type::Object(obj)) = &schema.schema_kind
        && !obj.properties.is_empty()
    {
        let mut params = Vec::with_capacity(obj.properties.len());
        for (prop_name, prop_schema) in &obj.properties {
            let mut prop_json = match prop_schema {
                ReferenceOr::Item(s) => schema_to_json(s),
                ReferenceOr::Reference { reference } => json!({"$ref": reference}),
            };
            inline_refs(resolver, &schema_doc, &mut prop_json, &mut Vec::new()).await;
            params.push(ToolParameter {
                tool_name: prop_name.clone(),
                original_name: prop_name.clone(),
                location: ParamLocation::Body,
                required: body_required && obj.required.contains(prop_name),
                schema: prop_json,
                query: None,
            });
        }
        return Ok(params);
    }

    let mut schema_json = schema_to_json(&schema);
    inline_refs(resolver, &schema_doc, &mut schema_json, &mut Vec::new()).await;
    if let (Some(desc), Some(obj)) = (&body.description, schema_json.as_object_mut()) {
        obj.entry("description")
            .or_insert_with(|| Value::String(desc.clone()));
    }
    Ok(vec![ToolParameter {
        tool_name: BODY_ARG.to_string(),
        original_name: BODY_ARG.to_string(),
        location: ParamLocation::WholeBody,
        required: body_required,
        schema: schema_json,
        query: None,
    }])
}

fn build_request_parts(tool: &GeneratedTool, arguments: &Value) -> Result<RequestParts> {
    let mut parts = RequestParts {
        path: tool.path.clone(),
        query_params: Vec::new(),
        headers: Vec::new(),
        body_fields: serde_json::Map::new(),
        body_payload: None,
    };

    for param in &tool.parameters {
        let value = arguments.get(&param.tool_name).filter(|v| !v.is_null());

        let Some(val) = value else {
            if param.required {
                return Err(OpenApiToolsError::Runtime(format!(
                    "Missing required parameter: {}",
                    param.tool_name
                )));
            }
            continue;
        };

        match param.location {
            ParamLocation::Path => {
                let segment = query::percent_encode(&value_to_string(val), false);
                parts.path = parts
                    .path
                    .replace(&format!("{{{}}}", param.original_name), &segment);
            }
            ParamLocation::Query => {
                let ser = param.query.clone().unwrap_or_default();
                parts.query_params.extend(query::serialize_param(
                    &param.original_name,
                    val,
                    param.required,
                    &ser,
                ));
            }
            ParamLocation::Header => {
                parts
                    .headers
                    .push((param.original_name.clone(), value_to_string(val)));
            }
            ParamLocation::WholeBody => {
                parts.body_payload = Some(val.clone());
            }
            ParamLocation::Body => {
                parts
                    .body_fields
                    .insert(param.original_name.clone(), val.clone());
            }
        }
    }

    if !parts.path.starts_with('/') {
        parts.path.insert(0, '/');
    }

    Ok(parts)
}

fn build_url(base_url: &str, path: &str, query_params: &[QueryPair]) -> Result<Url> {
    let mut url = Url::parse(&format!("{}{}", base_url.trim_end_matches('/'), path))
        .map_err(|e| OpenApiToolsError::Runtime(format!("Invalid URL: {e}")))?;
    if !query_params.is_empty() {
        url.set_query(Some(&query::encode_query(query_params)));
    }
    Ok(url)
}

async fn read_body_limited(
    mut response: reqwest::Response,
    max_bytes: Option<usize>,
) -> Result<Vec<u8>> {
    let Some(max) = max_bytes else {
        return response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| OpenApiToolsError::Request(sanitize_reqwest_error(&e)));
    };

    if let Some(len) = response.content_length()
        && len > max as u64
    {
        return Err(OpenApiToolsError::Http(format!(
            "Response too large: {len} bytes (limit {max})"
        )));
    }

    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| OpenApiToolsError::Request(sanitize_reqwest_error(&e)))?
    {
        if out.len().saturating_add(chunk.len()) > max {
            return Err(OpenApiToolsError::Http(format!(
                "Response too large: exceeded {max} bytes"
            )));
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

fn is_image_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.parse::<Mime>().ok())
        .is_some_and(|m| m.type_() == mime::IMAGE)
}

fn bytes_to_text_or_base64_json(bytes: &[u8], content_type: Option<&str>) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(s) => Value::String(s.to_string()),
        Err(_) => json!({
            "encoding": "base64",
            "mimeType": content_type,
            "data": base64::engine::general_purpose::STANDARD.encode(bytes),
        }),
    }
}

fn parse_json_or_text(body: Value) -> Value {
    match body {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

/// Extract JSON schema from parameter schema.
async fn extract_schema(
    resolver: &OpenApiResolver<'_>,
    current_doc: &DocId,
    format: &ParameterSchemaOrContent,
) -> Result<Value> {
    match format {
        ParameterSchemaOrContent::Schema(schema_ref) => {
            extract_schema_ref(resolver, current_doc, schema_ref).await
        }
        ParameterSchemaOrContent::Content(_) => Ok(json!({"type": "string"})),
    }
}

async fn extract_schema_ref(
    resolver: &OpenApiResolver<'_>,
    current_doc: &DocId,
    schema_ref: &ReferenceOr<Schema>,
) -> Result<Value> {
    let mut value = match schema_ref {
        ReferenceOr::Item(schema) => schema_to_json(schema),
        ReferenceOr::Reference { reference } => json!({"$ref": reference}),
    };
    inline_refs(resolver, current_doc, &mut value, &mut Vec::new()).await;
    Ok(value)
}

/// Replace every `$ref` in `value` with the schema it points at, so tool schemas stand alone.
///
/// `stack` holds the refs being expanded above this point. A ref that recurses into itself, runs
/// past [`MAX_INLINE_DEPTH`], or cannot be resolved becomes the empty schema `{}`.
fn inline_refs<'a>(
    resolver: &'a OpenApiResolver<'_>,
    doc: &'a DocId,
    value: &'a mut Value,
    stack: &'a mut Vec<String>,
) -> Pin<Box<dyn Future<Output = ()> + 'a>> {
    Box::pin(async move {
        let reference = value
            .get("$ref")
            .and_then(Value::as_str)
            .map(str::to_string);

        let Some(reference) = reference else {
            match value {
                Value::Object(map) => {
                    for v in map.values_mut() {
                        inline_refs(resolver, doc, v, stack).await;
                    }
                }
                Value::Array(items) => {
                    for v in items {
                        inline_refs(resolver, doc, v, stack).await;
                    }
                }
                _ => {}
            }
            return;
        };

        let key = format!("{doc}{reference}");
        if stack.contains(&key) || stack.len() >= MAX_INLINE_DEPTH {
            tracing::debug!("Not inlining recursive schema reference '{reference}'");
            *value = json!({});
            return;
        }

        let schema_ref = ReferenceOr::<Schema>::Reference {
            reference: reference.clone(),
        };
        let (target_doc, schema) = match resolver.resolve(doc, &schema_ref).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!("Unresolvable schema reference '{reference}': {e}");
                *value = json!({});
                return;
            }
        };

        let mut inlined = schema_to_json(&schema);
        stack.push(key);
        inline_refs(resolver, &target_doc, &mut inlined, stack).await;
        stack.pop();
        *value = inlined;
    })
}

/// Path-item parameters first, overridden by operation parameters with the same (in, name).
async fn merge_parameters(
    resolver: &OpenApiResolver<'_>,
    current_doc: &DocId,
    path_item_params: &[ReferenceOr<Parameter>],
    operation_params: &[ReferenceOr<Parameter>],
) -> Result<Vec<(DocId, Parameter)>> {
    fn key_for(p: &Parameter) -> (&'static str, String) {
        let loc = match p {
            Parameter::Path { .. } => "path",
            Parameter::Query { .. } => "query",
            Parameter::Header { .. } => "header",
            Parameter::Cookie { .. } => "cookie",
        };
        (loc, p.parameter_data_ref().name.clone())
    }

    let mut merged: Vec<(DocId, Parameter)> = Vec::new();
    let mut index: HashMap<(&'static str, String), usize> = HashMap::new();

    for p in path_item_params.iter().chain(operation_params) {
        let (doc, rp) = resolver.resolve(current_doc, p).await?;
        match index.get(&key_for(&rp)).copied() {
            Some(i) => merged[i] = (doc, rp),
            None => {
                index.insert(key_for(&rp), merged.len());
                merged.push((doc, rp));
            }
        }
    }

    Ok(merged)
}

/// Convert `OpenAPI` schema to JSON Schema value.
fn schema_to_json(schema: &Schema) -> Value {
    use openapiv3::{SchemaKind, Type};

    let mut result = serde_json::Map::new();
    let data = &schema.schema_data;
    if let Some(desc) = &data.description {
        result.insert("description".into(), json!(desc));
    }
    if let Some(default) = &data.default {
        result.insert("default".into(), default.clone());
    }
    if data.nullable {
        result.insert("nullable".into(), json!(true));
    }

    let ref_or_schema = |r: &ReferenceOr<Box<Schema>>| match r {
        ReferenceOr::Item(s) => schema_to_json(s),
        ReferenceOr::Reference { reference } => json!({"$ref": reference}),
    };

    match &schema.schema_kind {
        SchemaKind::Type(Type::String(s)) => {
            result.insert("type".into(), json!("string"));
            let values: Vec<&String> = s.enumeration.iter().flatten().collect();
            if !values.is_empty() {
                result.insert("enum".into(), json!(values));
            }
        }
        SchemaKind::Type(Type::Number(_)) => {
            result.insert("type".into(), json!("number"));
        }
        SchemaKind::Type(Type::Integer(_)) => {
            result.insert("type".into(), json!("integer"));
        }
        SchemaKind::Type(Type::Boolean(_)) => {
            result.insert("type".into(), json!("boolean"));
        }
        SchemaKind::Type(Type::Array(a)) => {
            result.insert("type".into(), json!("array"));
            if let Some(items) = &a.items {
                result.insert("items".into(), ref_or_schema(items));
            }
        }
        SchemaKind::Type(Type::Object(o)) => {
            result.insert("type".into(), json!("object"));
            if !o.properties.is_empty() {
                let props: serde_json::Map<String, Value> = o
                    .properties
                    .iter()
                    .map(|(name, prop)| (name.clone(), ref_or_schema(prop)))
                    .collect();
                result.insert("properties".into(), Value::Object(props));
            }
            if !o.required.is_empty() {
                result.insert("required".into(), json!(o.required));
            }
        }
        SchemaKind::Any(any) if !any.enumeration.is_empty() => {
            result.insert("enum".into(), json!(any.enumeration));
        }
        _ => {
            result.insert("type".into(), json!("object"));
        }
    }

    Value::Object(result)
}

/// Build input schema for a tool from its parameters.
fn build_input_schema(parameters: &[ToolParameter]) -> Value {
    let properties: serde_json::Map<String, Value> = parameters
        .iter()
        .map(|p| (p.tool_name.clone(), p.schema.clone()))
        .collect();
    let required: Vec<&str> = parameters
        .iter()
        .filter(|p| p.required)
        .map(|p| p.tool_name.as_str())
        .collect();

    let mut schema = json!({
        "type": "object",
        "properties": properties,
    });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

fn wrap_body_output_schema(body_schema: &Value) -> Result<Arc<JsonObject>> {
    if !body_schema.is_object() {
        return Err(OpenApiToolsError::Config(
            "outputSchema must be a JSON object (JSON Schema)".to_string(),
        ));
    }

    // MCP requires the root output schema to be an object.
    let wrapped = json!({
        "type": "object",
        "required": ["body"],
        "properties": {
            "body": body_schema.clone()
        }
    });

    let obj = wrapped.as_object().cloned().unwrap_or_else(JsonObject::new);
    Ok(Arc::new(obj))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_map::{MethodSet, RouteMap};
    use axum::Router;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::routing::{get, post};
    use std::fs;
    use std::net::SocketAddr;
    use tempfile::tempdir;

    const XRAY_SPEC: &str = r#"
openapi: "3.0.0"
info:
  title: Xray REST API
  version: "1.0"
paths:
  /rest/raven/1.0/api/test:
    get:
      operationId: getTests
      summary: Get tests
      tags: [tests]
      parameters:
        - name: keys
          in: query
          schema: { type: string }
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                type: array
                items: { type: object }
  /rest/raven/1.0/api/test/{testKey}/step:
    get:
      operationId: getTestSteps
      parameters:
        - name: testKey
          in: path
          required: true
          schema: { type: string }
      responses:
        "200":
          description: ok
    post:
      operationId: createTestStep
      parameters:
        - name: testKey
          in: path
          required: true
          schema: { type: string }
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              required: [step]
              properties:
                step: { type: string }
                data: { type: string }
      responses:
        "200":
          description: ok
    delete:
      operationId: deleteTestSteps
      parameters:
        - name: testKey
          in: path
          required: true
          schema: { type: string }
      responses:
        "204":
          description: deleted
  /rest/raven/1.0/api/testrun/{id}/status:
    put:
      parameters:
        - name: id
          in: path
          required: true
          schema: { type: integer }
        - name: status
          in: query
          required: true
          schema: { type: string }
      responses:
        "200":
          description: ok
    patch:
      operationId: patchTestRun
      parameters:
        - name: id
          in: path
          required: true
          schema: { type: integer }
      responses:
        "200":
          description: ok
"#;

    fn test_source(config: ToolSourceConfig) -> OpenApiToolSource {
        OpenApiToolSource::new("test", config, Client::new())
    }

    fn test_backend() -> OpenApiToolSource {
        test_source(ToolSourceConfig::new("inline", "https://example.com"))
    }

    async fn discover(source: &OpenApiToolSource, yaml: &str) -> Vec<GeneratedTool> {
        let raw = document::parse_document(yaml, document::DocumentFormat::Yaml, "inline").unwrap();
        let (root, spec) = normalize_document(raw, "inline").unwrap();
        source.discover_tools(&spec, root).await.unwrap()
    }

    fn names(tools: &[GeneratedTool]) -> Vec<&str> {
        tools.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_generate_canonical_name() {
        assert_eq!(
            generate_canonical_name(HttpMethod::Get, "/pet/{petId}"),
            "get_pet_petId"
        );
        assert_eq!(
            generate_canonical_name(HttpMethod::Put, "/rest/raven/1.0/api/testrun/{id}/status"),
            "put_rest_raven_1_0_api_testrun_id_status"
        );
        assert!(generate_canonical_name(HttpMethod::Get, &"/a".repeat(100)).len() <= 64);
    }

    #[test]
    fn test_reserve_unique_tool_name() {
        let mut taken = HashSet::new();
        assert_eq!(reserve_unique_tool_name(&mut taken, "get_test"), "get_test");
        assert_eq!(reserve_unique_tool_name(&mut taken, "get_test"), "get_test_1");
        assert_eq!(reserve_unique_tool_name(&mut taken, "get_test"), "get_test_2");
    }

    #[tokio::test]
    async fn discovers_every_operation_by_default() {
        let tools = discover(&test_backend(), XRAY_SPEC).await;
        assert_eq!(
            names(&tools),
            vec![
                "getTests",
                "getTestSteps",
                "createTestStep",
                "deleteTestSteps",
                "put_rest_raven_1_0_api_testrun_id_status",
                "patchTestRun",
            ]
        );
    }

    #[tokio::test]
    async fn read_only_hides_mutating_operations() {
        let mut config = ToolSourceConfig::new("inline", "https://example.com");
        config.read_only = true;
        // A rule that tries to re-include writes must not win over read-only mode.
        config.route_maps = vec![RouteMap::new(MethodSet::Any, McpType::Include)];
        let tools = discover(&test_source(config), XRAY_SPEC).await;
        assert_eq!(names(&tools), vec!["getTests", "getTestSteps"]);
        assert!(tools.iter().all(|t| t.method == HttpMethod::Get));
    }

    #[tokio::test]
    async fn route_maps_filter_by_method_pattern_and_tags() {
        let mut config = ToolSourceConfig::new("inline", "https://example.com");
        config.route_maps = vec![
            RouteMap {
                tags: ["tests".to_string()].into_iter().collect(),
                ..RouteMap::new(MethodSet::Any, McpType::Exclude)
            },
            RouteMap {
                pattern: Some(r"/testrun/".to_string()),
                ..RouteMap::new(MethodSet::Any, McpType::Exclude)
            },
            RouteMap::new(MethodSet::only([HttpMethod::Delete]), McpType::Exclude),
        ];
        let tools = discover(&test_source(config), XRAY_SPEC).await;
        assert_eq!(names(&tools), vec!["getTestSteps", "createTestStep"]);
    }

    #[tokio::test]
    async fn mcp_names_rename_tools_by_operation_id() {
        let mut config = ToolSourceConfig::new("inline", "https://example.com");
        config.mcp_names = HashMap::from([
            ("getTests".to_string(), "get_tests".to_string()),
            ("createTestStep".to_string(), "create_test_step".to_string()),
            ("noSuchOperation".to_string(), "ignored".to_string()),
        ]);
        let tools = discover(&test_source(config), XRAY_SPEC).await;
        let names = names(&tools);
        assert!(names.contains(&"get_tests"));
        assert!(names.contains(&"create_test_step"));
        assert!(!names.contains(&"getTests"));
        assert!(!names.contains(&"ignored"));
        let renamed = tools.iter().find(|t| t.name == "get_tests").unwrap();
        assert_eq!(renamed.operation_id.as_deref(), Some("getTests"));
    }

    #[tokio::test]
    async fn flattens_object_bodies_and_keeps_path_params_required() {
        let tools = discover(&test_backend(), XRAY_SPEC).await;
        let tool = tools.iter().find(|t| t.name == "createTestStep").unwrap();
        let required = tool.input_schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("testKey")));
        assert!(required.contains(&json!("step")));
        assert!(!required.contains(&json!("data")));
        assert!(tool.input_schema["properties"]["data"].is_object());
    }

    #[tokio::test]
    async fn test_resolves_parameter_ref() {
        let spec_yaml = r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
components:
  parameters:
    QParam:
      name: q
      in: query
      required: true
      schema:
        type: string
paths:
  /users:
    get:
      operationId: listUsers
      parameters:
        - $ref: '#/components/parameters/QParam'
      responses:
        "200":
          description: ok
"#;
        let tools = discover(&test_backend(), spec_yaml).await;
        let tool = tools.iter().find(|t| t.name == "listUsers").unwrap();
        assert!(tool.parameters.iter().any(|p| p.tool_name == "q" && p.required));
    }

    #[tokio::test]
    async fn test_merges_path_item_parameters_and_overrides() {
        let spec_yaml = r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /users:
    parameters:
      - name: q
        in: query
        required: false
        schema: { type: string }
    get:
      operationId: listUsers
      parameters:
        - name: q
          in: query
          required: true
          schema: { type: string }
      responses:
        "200":
          description: ok
"#;
        let tools = discover(&test_backend(), spec_yaml).await;
        let tool = tools.iter().find(|t| t.name == "listUsers").unwrap();
        let q: Vec<_> = tool
            .parameters
            .iter()
            .filter(|p| p.original_name == "q" && p.location == ParamLocation::Query)
            .collect();
        assert_eq!(q.len(), 1);
        assert!(q[0].required);
    }

    #[tokio::test]
    async fn test_generates_output_schema_for_json_2xx_response() {
        let tools = discover(&test_backend(), XRAY_SPEC).await;
        let tool = tools.iter().find(|t| t.name == "getTests").unwrap();
        let out = tool.output_schema.as_ref().expect("output_schema");
        assert_eq!(out.get("type").and_then(Value::as_str), Some("object"));
        assert_eq!(
            out["properties"]["body"]["type"].as_str(),
            Some("array")
        );

        let steps = tools.iter().find(|t| t.name == "getTestSteps").unwrap();
        assert!(steps.output_schema.is_none());
    }

    #[tokio::test]
    async fn non_object_bodies_become_a_single_body_argument() {
        let spec_yaml = r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /rest/raven/1.0/api/testexec/{key}/test:
    post:
      operationId: addTestsToExecution
      parameters:
        - name: key
          in: path
          required: true
          schema: { type: string }
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: array
              items: { type: string }
      responses:
        "200":
          description: ok
"#;
        let tools = discover(&test_backend(), spec_yaml).await;
        let tool = &tools[0];
        let body = tool.parameters.iter().find(|p| p.tool_name == "body").unwrap();
        assert!(body.required);
        assert_eq!(body.schema["type"], "array");
    }

    const REF_SPEC: &str = r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
components:
  schemas:
    Step:
      type: object
      required: [action]
      properties:
        action: { type: string }
    Test:
      type: object
      properties:
        key: { type: string }
        steps:
          type: array
          items: { $ref: '#/components/schemas/Step' }
        parent: { $ref: '#/components/schemas/Test' }
paths:
  /rest/raven/1.0/api/test:
    get:
      operationId: getTests
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                type: array
                items: { $ref: '#/components/schemas/Test' }
    post:
      operationId: createTest
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              properties:
                body: { type: string }
                step: { $ref: '#/components/schemas/Step' }
      responses:
        "200":
          description: ok
"#;

    #[tokio::test]
    async fn tool_schemas_inline_nested_refs() {
        let tools = discover(&test_backend(), REF_SPEC).await;

        let get = tools.iter().find(|t| t.name == "getTests").unwrap();
        let out = Value::Object((**get.output_schema.as_ref().unwrap()).clone());
        assert!(!out.to_string().contains("$ref"), "{out}");
        let item = &out["properties"]["body"]["items"];
        assert_eq!(item["properties"]["key"]["type"], "string");
        assert_eq!(
            item["properties"]["steps"]["items"]["properties"]["action"]["type"],
            "string"
        );
        // Self-reference is cut off instead of expanding forever.
        assert_eq!(item["properties"]["parent"], json!({}));

        let create = tools.iter().find(|t| t.name == "createTest").unwrap();
        assert!(!create.input_schema.to_string().contains("$ref"));
        assert_eq!(
            create.input_schema["properties"]["step"]["required"],
            json!(["action"])
        );
    }

    #[tokio::test]
    async fn body_property_named_body_is_sent_as_a_field() {
        let tools = discover(&test_backend(), REF_SPEC).await;
        let create = tools.iter().find(|t| t.name == "createTest").unwrap();

        let parts = build_request_parts(
            create,
            &json!({"body": "hello", "step": {"action": "x"}}),
        )
        .unwrap();
        assert!(parts.body_payload.is_none());
        assert_eq!(
            Value::Object(parts.body_fields),
            json!({"body": "hello", "step": {"action": "x"}})
        );
    }

    #[tokio::test]
    async fn swagger2_specs_are_discovered() {
        let spec_json = r#"{
  "swagger": "2.0",
  "info": {"title": "Xray", "version": "1"},
  "paths": {
    "/api/test": {
      "get": {
        "operationId": "getTests",
        "parameters": [{"name": "jql", "in": "query", "type": "string"}],
        "responses": {"200": {"description": "ok", "schema": {"type": "array", "items": {"type": "string"}}}}
      },
      "post": {
        "operationId": "createTest",
        "parameters": [{"name": "body", "in": "body", "required": true,
                        "schema": {"type": "object", "properties": {"summary": {"type": "string"}}}}],
        "responses": {"200": {"description": "ok"}}
      }
    }
  }
}"#;
        let tools = discover(&test_backend(), spec_json).await;
        assert_eq!(names(&tools), vec!["getTests", "createTest"]);
        assert!(tools[0].output_schema.is_some());
        assert!(tools[1].parameters.iter().any(|p| p.tool_name == "summary"));
    }

    #[tokio::test]
    async fn test_resolves_external_file_ref_parameter() {
        let dir = tempdir().unwrap();
        let common_path = dir.path().join("common.yaml");
        let root_path = dir.path().join("root.yaml");

        fs::write(
            &common_path,
            r"
components:
  parameters:
    QParam:
      name: q
      in: query
      required: true
      schema:
        type: string
",
        )
        .unwrap();

        fs::write(
            &root_path,
            r#"
openapi: "3.0.0"
info:
  title: t
  version: "1"
paths:
  /users:
    get:
      operationId: listUsers
      parameters:
        - $ref: "./common.yaml#/components/parameters/QParam"
      responses:
        200:
          description: ok
"#,
        )
        .unwrap();

        let source = test_source(ToolSourceConfig::new(
            root_path.display().to_string(),
            "https://example.com",
        ));
        source.start().await.unwrap();
        assert_eq!(source.spec_title().as_deref(), Some("t"));
        let tools = source.list_tools();
        let tool = tools.iter().find(|t| t.name == "listUsers").unwrap();
        assert!(tool.input_schema.get("properties").and_then(|p| p.get("q")).is_some());
    }

    #[tokio::test]
    async fn start_rejects_non_http_base_url() {
        let source = test_source(ToolSourceConfig::new("inline", "ftp://example.com"));
        let err = source.start().await.unwrap_err();
        assert!(matches!(err, OpenApiToolsError::Config(_)));
    }

    #[tokio::test]
    async fn list_tools_carries_method_annotations() {
        let dir = tempdir().unwrap();
        let spec_path = dir.path().join("xray.yaml");
        fs::write(&spec_path, XRAY_SPEC).unwrap();

        let source = test_source(ToolSourceConfig::new(
            spec_path.display().to_string(),
            "https://example.com",
        ));
        source.start().await.unwrap();
        assert_eq!(source.tool_count(), 6);

        let tools = source.list_tools();
        let get = tools.iter().find(|t| t.name == "getTests").unwrap();
        let ann = get.annotations.as_ref().unwrap();
        assert_eq!(ann.read_only_hint, Some(true));
        assert_eq!(ann.title.as_deref(), Some("Get tests"));

        let delete = tools.iter().find(|t| t.name == "deleteTestSteps").unwrap();
        assert_eq!(
            delete.annotations.as_ref().unwrap().destructive_hint,
            Some(true)
        );
    }

    // ------------------------------------------------------------------------
    // Calls against a mock Xray server
    // ------------------------------------------------------------------------

    async fn spawn_mock_xray() -> SocketAddr {
        let app = Router::new()
            .route(
                "/jira/rest/raven/1.0/api/test",
                get(|headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    axum::Json(json!([{ "key": q.get("keys"), "auth": auth }]))
                }),
            )
            .route(
                "/jira/rest/raven/1.0/api/test/{test_key}/step",
                post(
                    |Path(test_key): Path<String>, axum::Json(body): axum::Json<Value>| async move {
                        axum::Json(json!({ "testKey": test_key, "received": body }))
                    },
                )
                .get(|Path(test_key): Path<String>| async move {
                    (
                        HttpStatus::NOT_FOUND,
                        axum::Json(json!({"error": format!("Test {test_key} not found")})),
                    )
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    async fn started_source(addr: SocketAddr) -> (tempfile::TempDir, OpenApiToolSource) {
        let dir = tempdir().unwrap();
        let spec_path = dir.path().join("xray.yaml");
        fs::write(&spec_path, XRAY_SPEC).unwrap();

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_static("Bearer secret-token"),
        );
        let client = Client::builder().default_headers(headers).build().unwrap();

        let source = OpenApiToolSource::new(
            "xray",
            ToolSourceConfig::new(spec_path.display().to_string(), format!("http://{addr}/jira")),
            client,
        );
        source.start().await.unwrap();
        (dir, source)
    }

    #[tokio::test]
    async fn call_tool_sends_query_and_auth_and_returns_structured_body() {
        let addr = spawn_mock_xray().await;
        let (_dir, source) = started_source(addr).await;

        let result = source
            .call_tool("getTests", json!({"keys": "CALC-1"}))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(false));
        let body = &result.structured_content.as_ref().unwrap()["body"];
        assert_eq!(body[0]["key"], "CALC-1");
        assert_eq!(body[0]["auth"], "Bearer secret-token");
    }

    #[tokio::test]
    async fn call_tool_substitutes_path_and_sends_json_body() {
        let addr = spawn_mock_xray().await;
        let (_dir, source) = started_source(addr).await;

        let result = source
            .call_tool(
                "createTestStep",
                json!({"testKey": "CALC-7", "step": "Open app", "data": null}),
            )
            .await
            .unwrap();
        let text = result.content[0].as_text().unwrap().text.clone();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["testKey"], "CALC-7");
        assert_eq!(v["received"], json!({"step": "Open app"}));
    }

    #[tokio::test]
    async fn call_tool_reports_upstream_errors_and_bad_arguments() {
        let addr = spawn_mock_xray().await;
        let (_dir, source) = started_source(addr).await;

        let err = source
            .call_tool("getTestSteps", json!({"testKey": "CALC-404"}))
            .await
            .unwrap_err();
        assert!(err.is_upstream());
        let msg = err.to_string();
        assert!(msg.contains("API returned 404 Not Found"), "{msg}");
        assert!(msg.contains("Test CALC-404 not found"), "{msg}");

        let err = source
            .call_tool("createTestStep", json!({"testKey": "CALC-1"}))
            .await
            .unwrap_err();
        assert!(err.is_invalid_call());
        assert!(err.to_string().contains("Missing required parameter: step"));

        let err = source.call_tool("nope", json!({})).await.unwrap_err();
        assert!(err.is_invalid_call());
    }

    #[tokio::test]
    async fn renamed_tools_are_called_by_their_exposed_name_only() {
        let addr = spawn_mock_xray().await;
        let dir = tempdir().unwrap();
        let spec_path = dir.path().join("xray.yaml");
        fs::write(&spec_path, XRAY_SPEC).unwrap();
        let mut config =
            ToolSourceConfig::new(spec_path.display().to_string(), format!("http://{addr}/jira"));
        config.mcp_names = HashMap::from([("getTests".to_string(), "get_tests".to_string())]);
        let source = OpenApiToolSource::build("xray", config, Client::new())
            .await
            .unwrap();

        assert!(source.call_tool("get_tests", json!({})).await.is_ok());
        assert!(source.call_tool("getTests", json!({})).await.is_err());
    }
}
