/*!
 * Logging Module
 * Subscriber setup shared by the server and its tools
 */
pub mod middleware;

use std::io;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::Environment;

const LOG_DIR: &str = "logs";

/// Default filter directive when `RUST_LOG` is unset.
pub fn default_directive(log_level: &str) -> String {
    format!("blog_backend={log_level},tower_http=debug,axum=debug")
}

/// Installs the global subscriber: rolling `logs/app.log`, errors-only
/// `logs/error.log`, and the console. JSON in production, pretty otherwise.
///
/// The returned guards flush the background writers; hold them until exit.
pub fn init(environment: Environment, log_level: &str) -> Vec<WorkerGuard> {
    if let Err(e) = std::fs::create_dir_all(LOG_DIR) {
        eprintln!("could not create {LOG_DIR}/: {e}");
    }

    let (file_writer, file_guard) = non_blocking(rolling::daily(LOG_DIR, "app.log"));
    let (error_writer, error_guard) = non_blocking(rolling::daily(LOG_DIR, "error.log"));
    let (console_writer, console_guard) = non_blocking(io::stdout());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    let installed = if environment.is_production() {
        let file_layer = fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        let error_layer = fmt::layer()
            .json()
            .with_writer(error_writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);

        let console_layer = fmt::layer()
            .json()
            .with_writer(console_writer)
            .with_target(false);

        subscriber
            .with(file_layer)
            .with(error_layer)
            .with(console_layer)
            .try_init()
    } else {
        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);

        let error_layer = fmt::layer()
            .with_writer(error_writer)
            .with_ansi(false)
            .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);

        let console_layer = fmt::layer()
            .with_writer(console_writer)
            .with_target(true)
            .pretty();

        subscriber
            .with(file_layer)
            .with(error_layer)
            .with(console_layer)
            .try_init()
    };

    match installed {
        Ok(()) => tracing::info!(
            environment = environment.as_str(),
            log_level,
            "logging initialized"
        ),
        Err(e) => eprintln!("logging already initialized: {e}"),
    }

    vec![file_guard, error_guard, console_guard]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_targets_crate() {
        assert_eq!(
            default_directive("info"),
            "blog_backend=info,tower_http=debug,axum=debug"
        );
        assert!(EnvFilter::try_new(default_directive("debug")).is_ok());
    }
}
