//! Logging setup: env-filtered tracing to a rotating daily file plus stderr.
//!
//! Log level comes from the `PHOTEX_LOG` environment variable, falling back
//! to the configured `LOG_LEVEL`:
//! - `PHOTEX_LOG=debug` for verbose output
//! - `PHOTEX_LOG=info` for standard output (default)
//! - `PHOTEX_LOG=warn` for warnings and errors only

use anyhow::Result;
use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(log_dir: &Path, default_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("PHOTEX_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "photex.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard must outlive the subscriber; init() is called once at startup.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(dir = %log_dir.display(), "Logging initialized");
    Ok(())
}
