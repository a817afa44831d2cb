//! Tracing and logging (shared setup).

/// Initialize process-wide observability (tracing/logging).
///
/// The output format comes from `STOCKFLOW_LOG_FORMAT` (`json` or `pretty`,
/// default `json`); filtering from `RUST_LOG` (default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use tracing::{LOG_FORMAT_ENV, LogFormat, ParseLogFormatError};
