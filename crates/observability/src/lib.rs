//! Tracing/logging setup shared by the binaries.

pub mod tracing;

/// Initialize process-wide tracing.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}
