//! Connection settings loaded from `XRAY_*` environment variables.
//!
//! Values are read through a lookup function so the same validation serves the process
//! environment, a `.env` file, and CLI overrides.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const ENV_URL: &str = "XRAY_URL";
pub const ENV_AUTH_TYPE: &str = "XRAY_AUTH_TYPE";
pub const ENV_PERSONAL_TOKEN: &str = "XRAY_PERSONAL_TOKEN";
pub const ENV_OPENAPI_SPEC: &str = "XRAY_OPENAPI_SPEC";
pub const ENV_CONFIG_FILE: &str = "XRAY_CONFIG_FILE";
pub const ENV_MCP_NAMES_FILE: &str = "XRAY_MCP_NAMES_FILE";
pub const ENV_TIMEOUT: &str = "XRAY_TIMEOUT";
pub const ENV_READ_ONLY: &str = "XRAY_READ_ONLY";

/// Upstream call timeout in seconds when `XRAY_TIMEOUT` is unset.
pub const DEFAULT_TIMEOUT_SECS: f64 = 20.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

/// A secret that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

/// Authentication scheme used against the Xray API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthType {
    /// Personal access token sent as a bearer token.
    #[default]
    Pat,
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("pat") {
            Ok(Self::Pat)
        } else {
            Err(format!("unsupported authentication type '{s}' (supported: pat)"))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    /// Base URL of the Xray (Jira) server.
    pub url: String,
    pub auth_type: AuthType,
    pub personal_token: SecretString,
    /// `OpenAPI` document location (file path or URL).
    pub openapi_spec: String,
    /// YAML/JSON file with `route_maps` and `mcp_names`.
    pub config_file: Option<PathBuf>,
    /// JSON/YAML file with an `operationId -> tool name` map.
    pub mcp_names_file: Option<String>,
    /// Upstream call timeout in seconds.
    pub timeout: f64,
    pub read_only: bool,
}

impl AppSettings {
    /// Load settings from values provided by `lookup`.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns the first missing required setting or invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let required = |var: &'static str| get(var).ok_or(SettingsError::Missing(var));

        let url = required(ENV_URL)?;
        validate_url(&url)?;

        let auth_type = match get(ENV_AUTH_TYPE) {
            Some(v) => v.parse().map_err(|message| SettingsError::Invalid {
                var: ENV_AUTH_TYPE,
                message,
            })?,
            None => AuthType::default(),
        };

        let personal_token = SecretString::new(required(ENV_PERSONAL_TOKEN)?);
        let openapi_spec = required(ENV_OPENAPI_SPEC)?;

        let timeout = match get(ENV_TIMEOUT) {
            Some(v) => parse_timeout(&v)?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let read_only = match get(ENV_READ_ONLY) {
            Some(v) => parse_bool(&v).ok_or_else(|| SettingsError::Invalid {
                var: ENV_READ_ONLY,
                message: format!("expected a boolean, got '{v}'"),
            })?,
            None => false,
        };

        Ok(Self {
            url,
            auth_type,
            personal_token,
            openapi_spec,
            config_file: get(ENV_CONFIG_FILE).map(PathBuf::from),
            mcp_names_file: get(ENV_MCP_NAMES_FILE),
            timeout,
            read_only,
        })
    }

    /// Load settings from the process environment, after reading `.env` if present.
    ///
    /// # Errors
    ///
    /// See [`Self::from_lookup`].
    pub fn from_env() -> Result<Self, SettingsError> {
        load_dotenv();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`Self::from_env`], with `overrides` taking precedence over the environment.
    ///
    /// # Errors
    ///
    /// See [`Self::from_lookup`].
    pub fn from_overrides(overrides: &HashMap<&str, String>) -> Result<Self, SettingsError> {
        load_dotenv();
        Self::from_lookup(|var| {
            overrides
                .get(var)
                .cloned()
                .or_else(|| std::env::var(var).ok())
        })
    }

    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
    }
}

/// Read `.env` into the process environment. Variables that are already set win.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Ignoring unreadable .env file: {e}"),
    }
}

fn validate_url(raw: &str) -> Result<(), SettingsError> {
    let invalid = |message: String| SettingsError::Invalid {
        var: ENV_URL,
        message,
    };
    let url = Url::parse(raw).map_err(|e| invalid(format!("'{raw}' is not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("'{raw}' must use http or https")));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid(format!("'{raw}' has no host")));
    }
    Ok(())
}

fn parse_timeout(raw: &str) -> Result<f64, SettingsError> {
    let invalid = |message: String| SettingsError::Invalid {
        var: ENV_TIMEOUT,
        message,
    };
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid(format!("expected a number of seconds, got '{raw}'")))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid(format!("must be a positive number of seconds, got '{raw}'")));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| invalid(format!("'{raw}' is not a usable timeout: {e}")))?;
    Ok(secs)
}

/// Accepts the usual spellings of a boolean flag.
#[must_use]
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        (ENV_URL, "https://jira.example.com/jira"),
        (ENV_PERSONAL_TOKEN, "pat-123"),
        (ENV_OPENAPI_SPEC, "./xray-openapi.json"),
    ];

    #[test]
    fn loads_required_values_verbatim_with_defaults() {
        let s = AppSettings::from_lookup(lookup_from(&REQUIRED)).unwrap();
        assert_eq!(s.url, "https://jira.example.com/jira");
        assert_eq!(s.personal_token.expose(), "pat-123");
        assert_eq!(s.openapi_spec, "./xray-openapi.json");
        assert_eq!(s.auth_type, AuthType::Pat);
        assert!((s.timeout - DEFAULT_TIMEOUT_SECS).abs() < f64::EPSILON);
        assert!(!s.read_only);
        assert!(s.config_file.is_none());
        assert!(s.mcp_names_file.is_none());
    }

    #[test]
    fn loads_every_optional_value() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            (ENV_AUTH_TYPE, "PAT"),
            (ENV_CONFIG_FILE, "/etc/mcp-xray/config.yaml"),
            (ENV_MCP_NAMES_FILE, "names.json"),
            (ENV_TIMEOUT, "7.5"),
            (ENV_READ_ONLY, "yes"),
        ]);
        let s = AppSettings::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(
            s.config_file.as_deref(),
            Some(std::path::Path::new("/etc/mcp-xray/config.yaml"))
        );
        assert_eq!(s.mcp_names_file.as_deref(), Some("names.json"));
        assert_eq!(s.timeout_duration(), Duration::from_millis(7500));
        assert!(s.read_only);
    }

    #[test]
    fn missing_required_values_name_the_variable() {
        for (i, (var, _)) in REQUIRED.iter().enumerate() {
            let pairs: Vec<_> = REQUIRED
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| *p)
                .collect();
            let err = AppSettings::from_lookup(lookup_from(&pairs)).unwrap_err();
            assert_eq!(err, SettingsError::Missing(*var));
            assert!(err.to_string().contains(var));
        }
    }

    #[test]
    fn empty_values_count_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[1] = (ENV_PERSONAL_TOKEN, "  ");
        assert_eq!(
            AppSettings::from_lookup(lookup_from(&pairs)).unwrap_err(),
            SettingsError::Missing(ENV_PERSONAL_TOKEN)
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            (ENV_URL, "not a url"),
            (ENV_URL, "ftp://jira.example.com"),
            (ENV_AUTH_TYPE, "basic"),
            (ENV_TIMEOUT, "0"),
            (ENV_TIMEOUT, "-3"),
            (ENV_TIMEOUT, "inf"),
            (ENV_TIMEOUT, "soon"),
            (ENV_TIMEOUT, "1e300"),
            (ENV_READ_ONLY, "maybe"),
        ];
        for (var, value) in cases {
            let mut pairs: Vec<_> = REQUIRED.iter().filter(|(k, _)| *k != var).copied().collect();
            pairs.push((var, value));
            let err = AppSettings::from_lookup(lookup_from(&pairs)).unwrap_err();
            assert!(
                matches!(err, SettingsError::Invalid { var: v, .. } if v == var),
                "{var}={value}: {err}"
            );
        }
    }

    #[test]
    fn debug_output_redacts_the_token() {
        let s = AppSettings::from_lookup(lookup_from(&REQUIRED)).unwrap();
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("pat-123"));
        assert!(dbg.contains("***"));
    }

    #[test]
    fn overrides_win_over_environment() {
        let overrides: HashMap<&str, String> = REQUIRED
            .iter()
            .map(|(k, v)| (*k, (*v).to_string()))
            .chain([(ENV_READ_ONLY, "on".to_string())])
            .collect();
        let s = AppSettings::from_overrides(&overrides).unwrap();
        assert_eq!(s.url, "https://jira.example.com/jira");
        assert!(s.read_only);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for t in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(t), Some(true), "{t}");
        }
        for f in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(f), Some(false), "{f}");
        }
        assert_eq!(parse_bool("2"), None);
    }
}
