//! Process-wide tracing subscriber
//!
//! Transfer events carry their ids and balances as fields, and concurrent
//! workers are told apart by the `worker` span they run in. JSON output keeps
//! both; text output is for people watching a terminal.

use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber. Keep the guard alive until exit so
/// buffered file output is flushed.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(config));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        let file_layer = fmt::layer()
            .json()
            .with_target(true) // store vs transfer events
            .with_current_span(true) // worker label
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false) // span names already say where we are
            .with_writer(non_blocking)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}

fn file_appender(config: &AppConfig) -> RollingFileAppender {
    match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.log_file),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.log_file),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.log_file),
    }
}

/// Filter used when `RUST_LOG` is unset.
///
/// sqlx logs every statement at info, so it stays at warn unless the
/// configured level is more verbose than info.
fn default_directives(config: &AppConfig) -> String {
    match config.log_level.as_str() {
        "debug" | "trace" => config.log_level.clone(),
        level => format!("{},sqlx=warn", level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(log_level: &str) -> AppConfig {
        AppConfig::from_yaml(&format!(
            "log_level: {log_level}\nlog_dir: ./logs\nlog_file: test.log\nuse_json: false\nrotation: never\n"
        ))
        .unwrap()
    }

    #[test]
    fn test_sqlx_quiet_at_info() {
        assert_eq!(default_directives(&config("info")), "info,sqlx=warn");
        assert_eq!(default_directives(&config("warn")), "warn,sqlx=warn");
    }

    #[test]
    fn test_sqlx_statements_visible_when_debugging() {
        assert_eq!(default_directives(&config("debug")), "debug");
        assert_eq!(default_directives(&config("trace")), "trace");
    }

    #[test]
    fn test_directives_parse() {
        for level in ["info", "debug", "error"] {
            assert!(EnvFilter::try_new(default_directives(&config(level))).is_ok());
        }
    }
}
