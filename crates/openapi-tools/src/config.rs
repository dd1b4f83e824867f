use crate::route_map::{RouteMap, effective_route_maps};
use std::collections::HashMap;
use std::time::Duration;

/// Default limit for spec loading plus tool discovery.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for an OpenAPI-based tool source.
#[derive(Debug, Clone)]
pub struct ToolSourceConfig {
    /// `OpenAPI` spec location (URL or file path).
    pub spec: String,

    /// Base URL every operation path is appended to. The spec's own `servers` are not consulted.
    pub base_url: String,

    /// Ordered include/exclude rules.
    pub route_maps: Vec<RouteMap>,

    /// `operationId` -> exposed tool name.
    pub mcp_names: HashMap<String, String>,

    /// Hide every mutating operation (POST/PUT/DELETE/PATCH).
    pub read_only: bool,

    pub startup_timeout: Duration,

    /// Upper bound on upstream response bodies, `None` for unlimited.
    pub max_response_bytes: Option<usize>,
}

impl ToolSourceConfig {
    #[must_use]
    pub fn new(spec: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            base_url: base_url.into(),
            route_maps: Vec::new(),
            mcp_names: HashMap::new(),
            read_only: false,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            max_response_bytes: None,
        }
    }

    /// Route maps with the read-only rule applied.
    #[must_use]
    pub fn effective_route_maps(&self) -> Vec<RouteMap> {
        effective_route_maps(&self.route_maps, self.read_only)
    }
}
