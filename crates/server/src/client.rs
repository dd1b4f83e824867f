//! Authenticated HTTP client for the Xray API.

use crate::error::{Result, ServerError};
use crate::settings::{AppSettings, AuthType};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

/// Build the client used for every tool call.
///
/// The bearer token header is marked sensitive so it is never printed by `Debug`.
///
/// # Errors
///
/// Returns an error if the token cannot be used as a header value or the client fails to build.
pub fn build_xray_client(settings: &AppSettings) -> Result<Client> {
    let mut headers = HeaderMap::new();

    match settings.auth_type {
        AuthType::Pat => {
            let mut auth = HeaderValue::from_str(&format!(
                "Bearer {}",
                settings.personal_token.expose()
            ))
            .map_err(|_| {
                ServerError::Config(
                    "Personal access token contains characters not allowed in an HTTP header"
                        .to_string(),
                )
            })?;
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
        }
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    tracing::debug!(
        timeout_secs = settings.timeout,
        "Initializing Xray client with personal access token authentication"
    );

    Client::builder()
        .default_headers(headers)
        .timeout(settings.timeout_duration())
        .user_agent(concat!("mcp-xray/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ServerError::Client(e.to_string()))
}
