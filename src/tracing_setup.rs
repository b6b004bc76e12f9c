// file: src/tracing_setup.rs
// description: log filter and plain or JSON subscriber setup for the inbox client
// reference: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/

use anyhow::{Context, Result};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// `RUST_LOG` wins; otherwise the crate logs at `log_level` and its
/// dependencies at `warn`.
pub fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("warn,inbox_realtime={log_level}")))
        .unwrap_or_else(|_| EnvFilter::new("warn,inbox_realtime=info"))
}

pub fn setup_tracing(log_level: &str, json_logs: bool) -> Result<()> {
    let fmt_layer = if json_logs {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_names(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(build_filter(log_level))
        .with(fmt_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(())
}
