//! `OpenAPI` -> MCP tooling for mcp-xray.
//!
//! Loads an `OpenAPI` (or Swagger 2.0) document, filters its operations through route maps, and
//! exposes the survivors as MCP tools that proxy to the upstream HTTP API.
//!
//! Nothing here knows about transports or environment configuration; that lives in the
//! `mcp-xray` binary crate.

pub mod config;
pub mod document;
pub mod error;
mod query;
pub mod redact;
pub mod resolver;
pub mod route_map;
pub mod runtime;
pub mod semantics;
pub mod upgrade;

pub use config::ToolSourceConfig;
pub use error::{OpenApiToolsError, Result};
pub use route_map::{HttpMethod, McpType, MethodSet, RouteMap};
pub use runtime::OpenApiToolSource;
