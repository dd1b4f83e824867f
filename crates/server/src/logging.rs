//! `tracing` subscriber setup. Logs always go to stderr so stdout stays free for the stdio
//! transport.

use crate::error::{Result, ServerError};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `-v` count to level: none is WARN, `-v` is INFO, `-vv` and up is DEBUG.
#[must_use]
pub fn level_for_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, replaces the verbosity-derived level.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(verbose: u8, format: LogFormat) -> Result<()> {
    let level = level_for_verbosity(verbose);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| ServerError::Logging(e.to_string()))?;

    tracing::debug!("Logging level set to: {level}");
    Ok(())
}
