//! End-to-end harness for sosync
//!
//! [`TestBackend`] serves the emergency API over HTTP on an ephemeral port,
//! backed by an [`InMemoryEmergencyService`](sosync_core::InMemoryEmergencyService)
//! so tests can inspect and steer server-side records.

pub mod backend;

pub use backend::TestBackend;

/// Install a test-friendly subscriber once per process
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter("sosync_core=debug,sosync_api_client=debug,sosync_integration_tests=debug")
        .with_test_writer()
        .try_init();
}
