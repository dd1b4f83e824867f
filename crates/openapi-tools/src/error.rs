//! Error types for `mcp-xray-openapi`.

use thiserror::Error;

/// Main error type for `OpenAPI` tooling.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// Configuration errors (invalid route maps, bad name table, conflicts).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Startup errors (spec failed to load in time, tool discovery failed).
    #[error("Startup error: {0}")]
    Startup(String),

    /// Runtime errors (unknown tool, invalid arguments).
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// HTTP errors (upstream returned a non-success status).
    #[error("HTTP error: {0}")]
    Http(String),

    /// `OpenAPI` errors (spec parsing, validation, `$ref` resolution).
    #[error("OpenAPI error: {0}")]
    OpenApi(String),

    #[error("failed to fetch '{url}': {message}")]
    DocumentFetch { url: String, message: String },

    #[error("failed to read response body from '{url}': {message}")]
    DocumentReadBody { url: String, message: String },

    #[error("failed to read file '{path}': {source}")]
    DocumentReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file does not exist: {0}")]
    DocumentNotFound(String),

    #[error("failed to parse '{location}': {message}")]
    DocumentParse { location: String, message: String },

    /// Parameter collision errors.
    #[error("Parameter collision: {0}")]
    ParamCollision(String),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client errors (transport failures, timeouts).
    #[error("Request error: {0}")]
    Request(String),
}

impl OpenApiToolsError {
    /// Whether this error was caused by the caller's arguments rather than the upstream API.
    #[must_use]
    pub fn is_invalid_call(&self) -> bool {
        matches!(self, Self::Runtime(_))
    }

    /// Whether this error came back from the upstream API (non-2xx or transport failure).
    #[must_use]
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Request(_))
    }
}

/// Result type alias for `OpenAPI` tooling operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;
