//! Structured logging for the provider process.
//!
//! Logs go to **stderr**; stdout carries only the handshake line. Filtering
//! follows `RUST_LOG`, e.g. `RUST_LOG=hemmer_provider_mongodb=debug`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default directives when `RUST_LOG` is unset. The driver's own events stay
/// at `warn` so credentials in connection chatter never reach the log.
pub const DEFAULT_DIRECTIVES: &str = "info,mongodb=warn";

fn filter_for(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Install the global subscriber with [`DEFAULT_DIRECTIVES`].
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default(DEFAULT_DIRECTIVES);
}

/// Install the global subscriber, using `default_level` when `RUST_LOG` is
/// unset. An unparsable `default_level` falls back to [`DEFAULT_DIRECTIVES`].
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(filter_for(default_level))
        .with(stderr_layer())
        .init();
}

/// Like [`init_logging`], but returns `false` instead of panicking when a
/// subscriber is already installed.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(filter_for(DEFAULT_DIRECTIVES))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}
