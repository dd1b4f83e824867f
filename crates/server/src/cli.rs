//! Command-line interface.

use crate::logging::LogFormat;
use crate::settings::{
    ENV_CONFIG_FILE, ENV_MCP_NAMES_FILE, ENV_OPENAPI_SPEC, ENV_PERSONAL_TOKEN, ENV_READ_ONLY,
    ENV_TIMEOUT, ENV_URL,
};
use crate::transport::{ServeFlags, Transport};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

/// MCP-Xray Server - Xray integration for MCP.
#[derive(Debug, Parser)]
#[command(name = "mcp-xray", version, about)]
pub struct Cli {
    /// Increase verbosity of logging output. Use multiple times for more verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Transport type [env: TRANSPORT] [default: stdio]
    #[arg(long, value_enum, ignore_case = true)]
    pub transport: Option<Transport>,

    /// Port to listen on for SSE or Streamable HTTP transport [env: PORT] [default: 8000]
    #[arg(long)]
    pub port: Option<u16>,

    /// Host to bind to for SSE or Streamable HTTP transport [env: HOST] [default: 0.0.0.0]
    #[arg(long)]
    pub host: Option<String>,

    /// Path for the HTTP transports, e.g. /mcp [env: STREAMABLE_HTTP_PATH]
    #[arg(long)]
    pub path: Option<String>,

    /// Jira Xray URL (e.g., https://jira.example.com/jira)
    #[arg(long, env = ENV_URL)]
    pub xray_url: String,

    /// Jira Xray Personal Access Token (for Xray Server/Data Center)
    #[arg(long, env = ENV_PERSONAL_TOKEN, hide_env_values = true)]
    pub xray_personal_token: String,

    /// Path or URL to the OpenAPI spec file for the Xray API
    #[arg(long, env = ENV_OPENAPI_SPEC)]
    pub xray_openapi_spec: String,

    /// Path to the configuration file (YAML/JSON) with route_maps and mcp_names
    #[arg(long, env = ENV_CONFIG_FILE, value_parser = existing_file)]
    pub config_file: Option<PathBuf>,

    /// Path or URL to a JSON/YAML file mapping operationId to tool name
    #[arg(long, env = ENV_MCP_NAMES_FILE)]
    pub xray_mcp_names_file: Option<String>,

    /// Timeout in seconds for Xray API calls [default: 20]
    #[arg(long, env = ENV_TIMEOUT)]
    pub xray_timeout: Option<String>,

    /// Run in read-only mode (no modifications allowed) [env: XRAY_READ_ONLY]
    #[arg(long, overrides_with = "no_read_only")]
    pub read_only: bool,

    /// Disable read-only mode
    #[arg(long, overrides_with = "read_only")]
    pub no_read_only: bool,
}

impl Cli {
    /// Transport flags as given (unset ones stay `None`).
    #[must_use]
    pub fn serve_flags(&self) -> ServeFlags {
        ServeFlags {
            transport: self.transport,
            port: self.port,
            host: self.host.clone(),
            path: self.path.clone(),
        }
    }

    /// `XRAY_*` values taken from the command line; anything absent falls through to the
    /// environment.
    #[must_use]
    pub fn settings_overrides(&self) -> HashMap<&'static str, String> {
        let mut overrides = HashMap::from([
            (ENV_URL, self.xray_url.clone()),
            (ENV_PERSONAL_TOKEN, self.xray_personal_token.clone()),
            (ENV_OPENAPI_SPEC, self.xray_openapi_spec.clone()),
        ]);
        if let Some(path) = &self.config_file {
            overrides.insert(ENV_CONFIG_FILE, path.display().to_string());
        }
        if let Some(names) = &self.xray_mcp_names_file {
            overrides.insert(ENV_MCP_NAMES_FILE, names.clone());
        }
        if let Some(timeout) = &self.xray_timeout {
            overrides.insert(ENV_TIMEOUT, timeout.clone());
        }
        if let Some(read_only) = self.read_only_flag() {
            overrides.insert(ENV_READ_ONLY, read_only.to_string());
        }
        overrides
    }

    fn read_only_flag(&self) -> Option<bool> {
        match (self.read_only, self.no_read_only) {
            (true, _) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        }
    }
}

fn existing_file(raw: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(raw);
    if path.is_file() {
        Ok(path)
    } else if path.exists() {
        Err(format!("'{raw}' is a directory"))
    } else {
        Err(format!("file '{raw}' does not exist"))
    }
}
