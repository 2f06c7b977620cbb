use std::sync::Once;

use tracing::Level;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry};

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub enum OutputType {
    Stdout,
    /// Rolling daily file under `log_dir`.
    File,
}

#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub debug: bool,
    pub output: OutputType,
    pub log_dir: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        LoggingOptions {
            debug: false,
            output: OutputType::Stdout,
            log_dir: String::from("/tmp/db-intel/logs"),
        }
    }
}

impl LoggingOptions {
    pub fn new(debug: bool, output: OutputType, log_dir: Option<String>) -> Self {
        LoggingOptions {
            debug,
            output,
            log_dir: log_dir.unwrap_or_else(|| LoggingOptions::default().log_dir),
        }
    }
}

/// Installs a global `tracing` subscriber exactly once. Subsequent calls are no-ops,
/// guarded by `Once` rather than the racy `static mut` flag this is descended from --
/// every processor must be internally thread-safe, so the logging bootstrap is too.
///
/// Returns a `WorkerGuard` when file output is selected; the caller must keep it
/// alive for the process lifetime or buffered lines are lost on exit.
pub fn init_logging(opts: LoggingOptions) -> Option<WorkerGuard> {
    let level = if opts.debug { Level::DEBUG } else { Level::INFO };
    let mut guard = None;

    INIT.call_once(|| {
        let format = fmt::format()
            .with_file(true)
            .with_line_number(false)
            .with_target(false)
            .with_thread_ids(true)
            .with_thread_names(true)
            .compact();

        match opts.output {
            OutputType::Stdout => {
                let subscriber = Registry::default().with(
                    fmt::layer().event_format(format).with_filter(tracing_subscriber::filter::LevelFilter::from_level(level)),
                );
                let _ = subscriber.try_init();
            }
            OutputType::File => {
                let appender = rolling::daily(&opts.log_dir, "db-intel.log");
                let (writer, worker_guard) = non_blocking(appender);
                let subscriber = Registry::default().with(
                    fmt::layer()
                        .event_format(format)
                        .with_writer(writer)
                        .with_filter(tracing_subscriber::filter::LevelFilter::from_level(level)),
                );
                let _ = subscriber.try_init();
                guard = Some(worker_guard);
            }
        }
    });

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging(LoggingOptions::default());
        init_logging(LoggingOptions::default());
        tracing::info!("logging initialized twice without panicking");
    }
}
