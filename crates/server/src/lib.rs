//! mcp-xray: exposes the Jira Xray Server/Data Center REST API as MCP tools.
//!
//! The tool surface comes from an `OpenAPI` document (see `mcp-xray-openapi`). This crate adds
//! the `XRAY_*` settings, the route-map/name configuration files, the authenticated client, the
//! MCP handler, and the stdio, SSE and streamable HTTP transports.

pub mod cli;
pub mod client;
pub mod error;
pub mod logging;
pub mod mcp_config;
pub mod server;
pub mod settings;
pub mod sse;
pub mod transport;

pub use error::{Result, ServerError};
pub use server::{XrayMcpServer, create_server};
pub use settings::AppSettings;
