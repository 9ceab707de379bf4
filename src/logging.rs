use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the process-wide tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. When `LOG_DIR` is set, log lines
/// additionally go to a daily-rolled file through a non-blocking writer; the
/// returned guard must be held for process lifetime so buffered lines flush
/// on shutdown.
pub fn init_logging(process: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    if let Ok(log_dir) = std::env::var("LOG_DIR") {
        let file_appender = tracing_appender::rolling::daily(&log_dir, format!("{process}.log"));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);

        registry.with(file_layer).with(stdout_layer).init();
        Some(guard)
    } else {
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(stdout_layer).init();
        None
    }
}
