//! Observability infrastructure for ferry.
//!
//! Structured logging with consistent spans. This module provides the
//! subscriber initialization helper and span constructors shared by the
//! controller, the dispatchers, and the CLI.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

static INIT: Once = Once::new();

const ENV_LOG_FORMAT: &str = "FERRY_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// Reads the log format from `FERRY_LOG_FORMAT`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the variable holds an unknown format.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Reads the log format with a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the variable holds an unknown format.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        match get_env(ENV_LOG_FORMAT) {
            None => Ok(Self::default()),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "json" => Ok(Self::Json),
                "pretty" | "" => Ok(Self::Pretty),
                other => Err(Error::configuration(format!(
                    "{ENV_LOG_FORMAT} must be 'json' or 'pretty', got '{other}'"
                ))),
            },
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops. Logs go to stderr so command output on
/// stdout stays machine-readable.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `ferry_flow=debug`)
///
/// # Example
///
/// ```rust
/// use ferry_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty().with_writer(std::io::stderr))
                    .init();
            }
        }
    });
}

/// Creates a span covering one workflow instance.
///
/// # Example
///
/// ```rust
/// use ferry_core::observability::workflow_span;
///
/// let span = workflow_span("01HX0000000000000000000000", "acct-A/role-X", "proj-1");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn workflow_span(workflow_id: &str, delegation_target: &str, job_definition_id: &str) -> Span {
    tracing::info_span!(
        "workflow",
        workflow_id = workflow_id,
        target = delegation_target,
        job = job_definition_id,
    )
}

/// Creates a span for a single dispatcher operation.
#[must_use]
pub fn dispatch_span(operation: &str, delegation_target: &str) -> Span {
    tracing::debug_span!("dispatch", op = operation, target = delegation_target)
}
