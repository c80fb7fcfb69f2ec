//! Logging and tracing utilities for the provider.
//!
//! All logs are written to **stderr** to avoid interfering with the host
//! handshake on stdout.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g., `info`, `debug`, `opc_api=debug`)
//!
//! # Examples
//!
//! ```bash
//! # Show info logs (default)
//! RUST_LOG=info ./terraform-provider-opc
//!
//! # Trace every OPC API request and response
//! RUST_LOG=info,opc_api=debug ./terraform-provider-opc
//! ```

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log target for OPC API traffic.
///
/// Debug events on this target are what [`ApiLogger`] emits; enabling them
/// is what makes the client factory wire a logger at all.
pub const API_LOG_TARGET: &str = "opc_api";

/// Sink for API client debug output.
///
/// The client hands over message parts; implementations decide how to render
/// them. Injected into the compute and storage clients by the client factory.
pub trait ApiLogger: Send + Sync + std::fmt::Debug {
    /// Log one API event made of text parts.
    fn log(&self, parts: &[&str]);
}

/// [`ApiLogger`] that joins the non-empty parts with spaces and emits a
/// `tracing` debug event under [`API_LOG_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingApiLogger;

impl ApiLogger for TracingApiLogger {
    fn log(&self, parts: &[&str]) {
        tracing::debug!(target: API_LOG_TARGET, "{}", join_parts(parts));
    }
}

/// Join log parts with single spaces, skipping empty ones.
pub fn join_parts(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The logger the client factory wires when API debug output is enabled.
pub fn default_api_logger() -> Option<Arc<dyn ApiLogger>> {
    if tracing::enabled!(target: API_LOG_TARGET, tracing::Level::DEBUG) {
        Some(Arc::new(TracingApiLogger))
    } else {
        None
    }
}

fn subscriber(default_level: &str) -> impl tracing::Subscriber + Send + Sync + 'static {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    )
}

/// Initialize the default logging subscriber.
///
/// Reads `RUST_LOG`, defaulting to `info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level used when `RUST_LOG` is unset.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Try to initialize logging, returning false if already initialized.
pub fn try_init_logging() -> bool {
    subscriber("info").try_init().is_ok()
}
