//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] / [`init_json_subscriber`] install the process
//!   subscriber (stderr, `RUST_LOG` aware). Applications call one of them
//!   once; library code never does.
//! - [`LogContext`] is the handle each component receives at construction.
//!   It carries a span tagged with the owning client so events from the
//!   dispatch tree, requester, and publisher can be told apart when several
//!   connections share a process.
//! - [`capture_logs`] installs a thread-local capturing subscriber for tests.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing::Span;

use crate::topic::ClientIdentifier;

/// Initialize the global tracing subscriber with human-readable stderr output.
///
/// Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Minimum log level when `RUST_LOG` is unset (e.g. `"info"`).
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with JSON lines on stderr.
pub fn init_json_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}

/// Logging handle passed explicitly into each component.
#[derive(Clone, Debug)]
pub struct LogContext {
    span: Span,
}

impl LogContext {
    /// Context for components owned by `client`.
    pub fn for_client(client: &ClientIdentifier) -> Self {
        Self {
            span: tracing::info_span!("simbus", client = %client),
        }
    }

    /// Context that adds nothing to emitted events.
    pub fn detached() -> Self {
        Self { span: Span::none() }
    }

    /// The span events should be recorded under.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Enter the span for the lifetime of the returned guard.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::detached()
    }
}
