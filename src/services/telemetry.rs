//! Logging initialization.
//!
//! Structured logging with `tracing` and `tracing-subscriber`. stdout carries
//! the RPC protocol, so every log line goes to stderr.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the defaults when set. With `enabled == false`
/// nothing is logged unless `RUST_LOG` asks for it.
pub fn init_tracing(enabled: bool, verbose: bool, json_format: bool) {
    let filter_level = match (enabled, verbose) {
        (false, _) => "off",
        (true, true) => "debug,hyper=info,reqwest=info,rusqlite=info",
        (true, false) => "info",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_level));

    if json_format {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .with(env_filter)
            .try_init();
    }
}
