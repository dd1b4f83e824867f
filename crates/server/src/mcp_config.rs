//! Route maps and tool-name mappings from the optional config and names files.

use crate::error::{Result, ServerError};
use crate::settings::AppSettings;
use mcp_xray_openapi::RouteMap;
use mcp_xray_openapi::document;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Contents of `XRAY_CONFIG_FILE`.
///
/// ```yaml
/// route_maps:
///   - methods: [GET]
///     pattern: "^/rest/raven/1.0/api/test"
///     mcp_type: INCLUDE
///   - methods: "*"
///     mcp_type: EXCLUDE
/// mcp_names:
///   getTests: get_tests
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McpConfiguration {
    #[serde(default)]
    pub mcp_names: Option<HashMap<String, String>>,
    #[serde(default)]
    pub route_maps: Option<Vec<RouteMap>>,
}

impl McpConfiguration {
    /// Load a configuration file (YAML or JSON). An empty file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, contains unknown keys, or holds an
    /// invalid route map.
    pub async fn load(location: &str, client: &Client) -> Result<Self> {
        let value = document::load_document(location, client).await?;
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| {
            ServerError::Config(format!("Invalid configuration file '{location}': {e}"))
        })
    }
}

/// Load a flat `operationId -> tool name` map from a JSON or YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a string-to-string mapping.
pub async fn load_mcp_names(location: &str, client: &Client) -> Result<HashMap<String, String>> {
    let value = document::load_document(location, client).await?;
    match value {
        Value::Null => Ok(HashMap::new()),
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(name) => Ok((k, name)),
                other => Err(ServerError::Config(format!(
                    "Invalid MCP names file '{location}': value for '{k}' must be a string, got {other}"
                ))),
            })
            .collect(),
        _ => Err(ServerError::Config(format!(
            "Invalid MCP names file '{location}': expected a mapping of operationId to tool name"
        ))),
    }
}

/// The effective route maps and name table for a run.
#[derive(Debug, Default, Clone)]
pub struct ResolvedMcpConfig {
    pub route_maps: Vec<RouteMap>,
    pub mcp_names: HashMap<String, String>,
}

/// Merge the config file and the names file. Names-file entries win on conflicts.
///
/// # Errors
///
/// Returns an error if either file fails to load.
pub async fn resolve(settings: &AppSettings, client: &Client) -> Result<ResolvedMcpConfig> {
    let mut resolved = ResolvedMcpConfig::default();

    if let Some(path) = &settings.config_file {
        let location = path.display().to_string();
        let config = McpConfiguration::load(&location, client).await?;
        tracing::debug!(
            route_maps = config.route_maps.as_ref().map_or(0, Vec::len),
            mcp_names = config.mcp_names.as_ref().map_or(0, HashMap::len),
            "Loaded configuration file {location}"
        );
        resolved.route_maps = config.route_maps.unwrap_or_default();
        resolved.mcp_names = config.mcp_names.unwrap_or_default();
    }

    if let Some(location) = &settings.mcp_names_file {
        let names = load_mcp_names(location, client).await?;
        tracing::debug!("Loaded {} MCP names from {location}", names.len());
        resolved.mcp_names.extend(names);
    }

    Ok(resolved)
}
