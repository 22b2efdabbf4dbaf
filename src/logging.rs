use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

static LOG_INIT: OnceLock<()> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
}

/// Installs a stdout tracing subscriber filtered by `RUST_LOG` (default `info`).
/// Subsequent calls are no-ops.
pub fn init() -> Result<(), LoggingError> {
    if LOG_INIT.get().is_some() {
        return Ok(());
    }

    let subscriber = Registry::default()
        .with(build_env_filter())
        .with(fmt::layer().with_target(false).with_writer(std::io::stdout));
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    let _ = LOG_INIT.set(());
    Ok(())
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
