//! Tracing/logging setup shared by the engine and the CLI.

/// Initialize process-wide tracing using the environment's log format.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, layers).
pub mod tracing;
