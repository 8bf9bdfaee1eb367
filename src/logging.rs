use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "ingest_pipeline=info,info";

/// Initializes logging with console output and a daily-rotated JSON file under
/// `log_dir`. Keep the returned guard alive until exit so buffered lines are
/// flushed.
pub fn init_logging(log_dir: &Path, file_name: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    // File logging is best effort: an unwritable log dir leaves console only.
    let dir_error = fs::create_dir_all(log_dir).err();
    let (file_layer, guard) = if dir_error.is_none() {
        let file_appender = tracing_appender::rolling::daily(log_dir, file_name);
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
        (Some(fmt::layer().json().with_writer(non_blocking_writer)), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(e) = dir_error {
        tracing::warn!(dir = %log_dir.display(), error = %e, "Log directory unavailable, console logging only");
    }
    guard
}
