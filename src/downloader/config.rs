//! Download configuration constants

use std::time::Duration;

/// Attempts per file before giving up on a retryable failure.
/// With cubic backoff, five attempts wait 1 + 8 + 27 + 64 = 100 seconds in total.
pub const MAX_ATTEMPTS: u32 = 5;

/// Default number of concurrent transfers.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Maximum allowed concurrency. The CDN starts answering 429 well before this.
pub const MAX_CONCURRENCY: usize = 32;

/// Write buffer size for the temporary file (8 KiB).
pub const CHUNK_SIZE: usize = 8 << 10;

/// Longest silence tolerated between two body chunks before the attempt is
/// abandoned as a timeout.
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

/// TCP connect timeout for CDN requests.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay that follows failed attempt number `attempt` (1-based): `attempt³` seconds.
///
/// This schedule is user-facing (1s, 8s, 27s, 64s) and must not change.
pub fn calculate_backoff(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt).pow(3))
}
