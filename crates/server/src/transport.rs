//! Transport selection and serving (stdio, legacy SSE, streamable HTTP).

use crate::error::{Result, ServerError};
use crate::server::XrayMcpServer;
use crate::sse;
use axum::Router;
use axum::routing::get;
use rmcp::ServiceExt as _;
use rmcp::transport::StreamableHttpServerConfig;
use rmcp::transport::StreamableHttpService;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use std::fmt;
use std::future::IntoFuture as _;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const ENV_TRANSPORT: &str = "TRANSPORT";
pub const ENV_PORT: &str = "PORT";
pub const ENV_HOST: &str = "HOST";
pub const ENV_PATH: &str = "STREAMABLE_HTTP_PATH";

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_STREAMABLE_HTTP_PATH: &str = "/mcp";
pub const DEFAULT_SSE_PATH: &str = "/sse";

/// How long open streams get to finish after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Transport {
    #[default]
    Stdio,
    Sse,
    StreamableHttp,
}

impl Transport {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Stdio => "stdio",
            Transport::Sse => "sse",
            Transport::StreamableHttp => "streamable-http",
        }
    }

    #[must_use]
    pub fn default_path(self) -> &'static str {
        match self {
            Transport::Sse => DEFAULT_SSE_PATH,
            Transport::Stdio | Transport::StreamableHttp => DEFAULT_STREAMABLE_HTTP_PATH,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Transport::Stdio),
            "sse" => Ok(Transport::Sse),
            "streamable-http" => Ok(Transport::StreamableHttp),
            other => Err(format!(
                "invalid transport '{other}' (expected stdio, sse or streamable-http)"
            )),
        }
    }
}

/// Values given on the command line; `None` means "not provided".
#[derive(Debug, Clone, Default)]
pub struct ServeFlags {
    pub transport: Option<Transport>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub path: Option<String>,
}

/// Fully resolved serving options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeOptions {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl ServeOptions {
    /// Resolve each option as flag, then environment variable, then default.
    pub fn resolve<F>(flags: ServeFlags, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let transport = flags.transport.unwrap_or_else(|| match env(ENV_TRANSPORT) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!("Invalid transport '{raw}' from env/default, using 'stdio'.");
                Transport::Stdio
            }),
            None => Transport::Stdio,
        });

        let port = flags.port.unwrap_or_else(|| {
            env(ENV_PORT)
                .filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT)
        });

        let host = flags
            .host
            .or_else(|| env(ENV_HOST))
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let path = flags
            .path
            .or_else(|| env(ENV_PATH))
            .map(|p| normalize_path(&p))
            .unwrap_or_else(|| transport.default_path().to_string());

        tracing::debug!(%transport, %host, port, %path, "Resolved transport options");

        Self {
            transport,
            host,
            port,
            path,
        }
    }
}

fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Serve `server` over the selected transport until it finishes or `ct` is cancelled.
///
/// # Errors
///
/// Returns an error if the transport cannot be set up (e.g. the address is in use).
pub async fn serve(
    server: XrayMcpServer,
    options: &ServeOptions,
    ct: CancellationToken,
) -> Result<()> {
    match options.transport {
        Transport::Stdio => serve_stdio(server, ct).await,
        Transport::Sse => {
            let router = sse::router(server, &options.path, ct.clone());
            serve_http(router, options, ct).await
        }
        Transport::StreamableHttp => {
            let router = streamable_http_router(server, &options.path);
            serve_http(router, options, ct).await
        }
    }
}

async fn serve_stdio(server: XrayMcpServer, ct: CancellationToken) -> Result<()> {
    tracing::info!("Starting server with STDIO transport.");
    let running = server
        .serve_with_ct(rmcp::transport::stdio(), ct)
        .await
        .map_err(|e| ServerError::Transport(format!("stdio initialization failed: {e}")))?;
    let reason = running
        .waiting()
        .await
        .map_err(|e| ServerError::Transport(format!("stdio service task failed: {e}")))?;
    tracing::debug!("STDIO service stopped: {reason:?}");
    Ok(())
}

/// Router with the rmcp streamable HTTP service at `path` plus `GET /health`.
pub fn streamable_http_router(server: XrayMcpServer, path: &str) -> Router {
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig {
            stateful_mode: true,
            sse_keep_alive: Some(Duration::from_secs(15)),
            ..Default::default()
        },
    );

    Router::new()
        .route("/health", get(health))
        .route_service(path, service)
}

pub(crate) async fn health() -> &'static str {
    "ok"
}

async fn serve_http(router: Router, options: &ServeOptions, ct: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((options.host.as_str(), options.port))
        .await
        .map_err(|e| {
            ServerError::Transport(format!(
                "failed to bind {}:{}: {e}",
                options.host, options.port
            ))
        })?;

    tracing::info!(
        "Starting server with {} transport on http://{}:{}{}",
        options.transport.as_str().to_ascii_uppercase(),
        options.host,
        options.port,
        options.path
    );

    let graceful = axum::serve(listener, router)
        .with_graceful_shutdown(ct.clone().cancelled_owned())
        .into_future();

    tokio::select! {
        res = graceful => res.map_err(ServerError::Io),
        () = async {
            ct.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            tracing::warn!("Open connections did not close in time; stopping anyway");
            Ok(())
        }
    }
}
