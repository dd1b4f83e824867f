use anyhow::Context as _;
use clap::Parser as _;
use mcp_xray::cli::Cli;
use mcp_xray::settings::{AppSettings, load_dotenv};
use mcp_xray::transport::{ServeOptions, serve};
use mcp_xray::{create_server, logging};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` must be in the environment before clap reads `env = ...` defaults.
    load_dotenv();
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.log_format)?;

    let options = ServeOptions::resolve(cli.serve_flags(), |var| std::env::var(var).ok());
    let settings = AppSettings::from_overrides(&cli.settings_overrides())
        .context("invalid Xray settings")?;
    tracing::debug!(?settings, "Loaded settings");

    let server = create_server(&settings)
        .await
        .context("failed to start the Xray MCP server")?;

    let ct = CancellationToken::new();
    let shutdown = ct.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Server shutdown initiated");
            shutdown.cancel();
        }
    });

    serve(server, &options, ct).await.inspect_err(|e| {
        tracing::error!("Server encountered an error: {e}");
    })?;
    Ok(())
}
