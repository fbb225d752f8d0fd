//! Test utilities.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns a unique path under the system temp directory.
///
/// The process id and an atomic counter keep concurrent test runs from
/// colliding.
pub fn temp_path(tag: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("exanet-{}-{}-{}", std::process::id(), tag, n))
}
