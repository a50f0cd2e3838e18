//! Logging initialization.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "qix-search.log";

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: &str) -> String {
    format!("qix={0},qix_search={0}", level)
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| default_directives(level)))
}

/// Install the global subscriber.
///
/// Logs go to stderr, or to a daily rolling file when `config.dir` is set.
/// The returned guard flushes the file writer on drop and must live as long
/// as logging is wanted.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let Some(log_dir) = &config.dir else {
        init_stderr(&config.level);
        return None;
    };

    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("Failed to create log directory {:?}: {}", log_dir, e);
        // Fall back to stderr logging
        init_stderr(&config.level);
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false), // No ANSI colors in log files
        )
        .init();

    tracing::info!("Logging initialized to {:?}", log_dir);
    Some(guard)
}

fn init_stderr(level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_cover_lib_and_binary() {
        assert_eq!(default_directives("debug"), "qix=debug,qix_search=debug");
    }

    #[test]
    fn test_directives_parse() {
        let filter = EnvFilter::try_new(default_directives("info"));
        assert!(filter.is_ok());
    }
}
