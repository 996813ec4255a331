use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

pub const DEFAULT_DIRECTIVE: &str = "survey_flow=info";

// ─────────────────────────────────────────────
// Console + daily rolling file under `dir`.
// RUST_LOG overrides the default directive.
// ─────────────────────────────────────────────

/// Installs the global subscriber. Keep the returned guard alive until exit
/// or buffered file lines are lost.
pub fn init(dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(dir)?;

    let file_appender = rolling::daily(dir, "survey_flow.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}
