//! Error types for the mcp-xray server.

use crate::settings::SettingsError;
use mcp_xray_openapi::OpenApiToolsError;
use thiserror::Error;

/// Main error type for the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid settings (missing/malformed `XRAY_*` values)
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Configuration file errors (invalid YAML/JSON, unknown keys, bad route maps)
    #[error("Configuration error: {0}")]
    Config(String),

    /// `OpenAPI` loading, discovery, or tool execution errors
    #[error(transparent)]
    OpenApi(#[from] OpenApiToolsError),

    /// Building the upstream HTTP client failed
    #[error("HTTP client error: {0}")]
    Client(String),

    /// Transport setup or serving failed
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
