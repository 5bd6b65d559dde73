//! Shared helpers for the `jobqueue` integration tests.

pub mod builders;
pub mod fake_dispatcher;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing_subscriber::{fmt, EnvFilter};

/// Upper bound for any async test body.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Capture logs through the test writer, so they only show for failing
/// tests or with `--nocapture`. `RUST_LOG` picks the level (`warn` when
/// unset).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Await `f`, panicking after [`TEST_TIMEOUT`].
pub async fn with_timeout<F: Future>(f: F) -> F::Output {
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(output) => output,
        Err(_) => panic!("test did not finish within {TEST_TIMEOUT:?}"),
    }
}

/// A fixed instant, `secs` seconds after the Unix epoch.
///
/// Channel tests use small integers as clock values (`at(100)`, `at(102)`).
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("timestamp in range")
}
