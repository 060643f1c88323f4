//! Logging setup shared by the binaries.

/// Initialize process-wide tracing.
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Subscriber configuration (filters, output format).
pub mod tracing;
