//! Loading JSON/YAML documents from local paths or `http(s)` URLs.
//!
//! Used for the `OpenAPI` spec itself, for `$ref`'d documents, and for the MCP configuration and
//! name-mapping files.

use crate::error::{OpenApiToolsError, Result};
use crate::redact::sanitize_reqwest_error;
use reqwest::Client;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Timeout used when fetching documents over HTTP.
pub const DOCUMENT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Document format, chosen from the location's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
    /// Unknown extension: try JSON, then YAML.
    Sniff,
}

impl DocumentFormat {
    #[must_use]
    pub fn for_location(location: &str) -> Self {
        let path = match Url::parse(location) {
            Ok(url) if is_url(location) || url.scheme() == "file" => url.path().to_string(),
            _ => location.to_string(),
        };
        let ext = Path::new(&path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => DocumentFormat::Json,
            Some("yaml" | "yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Sniff,
        }
    }
}

#[must_use]
pub fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// A plain HTTP client for document fetches.
///
/// Carries no auth headers: the API token must never reach whichever host serves the spec.
#[must_use]
pub fn document_client() -> Client {
    Client::builder()
        .timeout(DOCUMENT_FETCH_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build document client ({e}); fetching without a timeout");
            Client::new()
        })
}

/// Read the raw text at `location`.
///
/// # Errors
///
/// Returns an error if the file does not exist or cannot be read, or if the URL cannot be
/// fetched or returns a non-success status.
pub async fn read_location(location: &str, client: &Client) -> Result<String> {
    if is_url(location) {
        let url = Url::parse(location).map_err(|e| OpenApiToolsError::DocumentFetch {
            url: location.to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!(url = %crate::redact::redact_url(&url), "fetching document");

        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| OpenApiToolsError::DocumentFetch {
                url: location.to_string(),
                message: sanitize_reqwest_error(&e),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(OpenApiToolsError::DocumentFetch {
                url: location.to_string(),
                message: format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
            });
        }

        return resp
            .text()
            .await
            .map_err(|e| OpenApiToolsError::DocumentReadBody {
                url: location.to_string(),
                message: sanitize_reqwest_error(&e),
            });
    }

    let path = local_path(location)?;
    let is_file = tokio::fs::metadata(&path)
        .await
        .is_ok_and(|m| m.is_file());
    if !is_file {
        return Err(OpenApiToolsError::DocumentNotFound(location.to_string()));
    }
    tracing::debug!(path = %path.display(), "reading document");
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| OpenApiToolsError::DocumentReadFile {
            path: location.to_string(),
            source: e,
        })
}

fn local_path(location: &str) -> Result<PathBuf> {
    if location.starts_with("file://") {
        let url = Url::parse(location)
            .map_err(|e| OpenApiToolsError::Config(format!("Invalid file URL '{location}': {e}")))?;
        return url.to_file_path().map_err(|()| {
            OpenApiToolsError::Config(format!("Invalid file URL (not a path): {location}"))
        });
    }
    Ok(PathBuf::from(location))
}

/// Parse document text in the given format.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::DocumentParse`] if the text is not valid in the chosen format
/// (for [`DocumentFormat::Sniff`], if it is neither valid JSON nor valid YAML).
pub fn parse_document(content: &str, format: DocumentFormat, location: &str) -> Result<Value> {
    let parse_err = |message: String| OpenApiToolsError::DocumentParse {
        location: location.to_string(),
        message,
    };

    match format {
        DocumentFormat::Json => {
            serde_json::from_str(content).map_err(|e| parse_err(format!("invalid JSON: {e}")))
        }
        DocumentFormat::Yaml => yaml_to_json(content).map_err(parse_err),
        DocumentFormat::Sniff => serde_json::from_str(content).or_else(|json_err| {
            yaml_to_json(content).map_err(|yaml_err| {
                parse_err(format!(
                    "neither valid JSON ({json_err}) nor valid YAML ({yaml_err})"
                ))
            })
        }),
    }
}

// Go through `serde_yaml::Value` so non-string mapping keys (e.g. unquoted `200:` response codes)
// become JSON object keys instead of failing.
fn yaml_to_json(content: &str) -> std::result::Result<Value, String> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| format!("invalid YAML: {e}"))?;
    serde_json::to_value(yaml).map_err(|e| format!("unsupported YAML value: {e}"))
}

/// Read and parse the JSON/YAML document at `location`.
///
/// # Errors
///
/// Returns an error if the document cannot be read or parsed.
pub async fn load_document(location: &str, client: &Client) -> Result<Value> {
    let content = read_location(location, client).await?;
    parse_document(&content, DocumentFormat::for_location(location), location)
}
