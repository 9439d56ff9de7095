//! # Logging
//!
//! Dispatcher log lines are emitted through `tracing` when the `tracing`
//! feature is enabled (it is by default). Without it every log statement
//! compiles away.
//!
//! [`init_telemetry`] installs the process-wide subscriber: an [`EnvFilter`]
//! read from `RUST_LOG` (falling back to `info`) and a console `fmt` layer in
//! the requested [`LogFormat`]. Host processes that already install their own
//! subscriber should skip it; the dispatcher only emits events.

use crate::config::LogFormat;
use anyhow::Context;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global `tracing` subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let base = tracing_subscriber::fmt::layer()
        .with_thread_ids(true)
        .with_line_number(true)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_file(true);

    let console = match format {
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Compact => base.compact().boxed(),
        LogFormat::Json => base.json().with_current_span(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init()
        .context("failed to install tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_rejected() {
        // The second call must fail cleanly instead of panicking.
        let _ = init_telemetry(LogFormat::Compact);
        let second = init_telemetry(LogFormat::Json);
        assert!(second.is_err());
    }
}
