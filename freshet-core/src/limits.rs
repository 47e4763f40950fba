//! Retry budgets, intervals, and buffer bounds.
//!
//! `TigerStyle`: put limits on everything. Retry budgets are per call
//! site rather than one global constant because the sites genuinely
//! differ: a shard that vanished mid-rebalance deserves a much longer
//! window than a generic transient fault.

/// Plan version tracked before the first heartbeat response arrives.
pub const DEFAULT_PLAN_VERSION: i64 = -1;

/// The heartbeat period is this fraction of the session timeout.
pub const HEARTBEAT_INTERVAL_FRACTION: u64 = 3;

/// Lower clamp on the heartbeat period in milliseconds.
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// Lower clamp on the session timeout in milliseconds.
pub const MIN_SESSION_TIMEOUT_MS: u64 = 10_000;

/// Upper clamp on the session timeout in milliseconds.
pub const MAX_SESSION_TIMEOUT_MS: u64 = 300_000;

/// Backoff after an empty fetch in milliseconds.
pub const EMPTY_FETCH_BACKOFF_MS: u64 = 100;

/// Retries for a transient fault inside the fetch loop.
pub const FETCH_RETRY_COUNT: u32 = 3;

/// Retries for shard-not-found inside the fetch loop.
///
/// During a rebalance a shard can transiently disappear before metadata
/// catches up, so this window is materially longer than the generic one.
pub const SHARD_NOT_FOUND_RETRY_COUNT: u32 = 10;

/// Retries for the group join call.
pub const JOIN_RETRY_COUNT: u32 = 3;

/// Retries for an offset commit.
pub const COMMIT_RETRY_COUNT: u32 = 2;

/// Computes the heartbeat period for a session timeout, in milliseconds.
#[must_use]
pub const fn heartbeat_interval_ms(session_timeout_ms: u64) -> u64 {
    let interval = session_timeout_ms / HEARTBEAT_INTERVAL_FRACTION;
    if interval < MIN_HEARTBEAT_INTERVAL_MS {
        MIN_HEARTBEAT_INTERVAL_MS
    } else {
        interval
    }
}

/// Clamps a session timeout into the service-accepted range.
#[must_use]
pub const fn clamp_session_timeout_ms(session_timeout_ms: u64) -> u64 {
    if session_timeout_ms < MIN_SESSION_TIMEOUT_MS {
        MIN_SESSION_TIMEOUT_MS
    } else if session_timeout_ms > MAX_SESSION_TIMEOUT_MS {
        MAX_SESSION_TIMEOUT_MS
    } else {
        session_timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_interval() {
        assert_eq!(heartbeat_interval_ms(60_000), 20_000);
        // Clamped to the minimum.
        assert_eq!(heartbeat_interval_ms(1_500), MIN_HEARTBEAT_INTERVAL_MS);
    }

    #[test]
    fn test_session_timeout_clamp() {
        assert_eq!(clamp_session_timeout_ms(60_000), 60_000);
        assert_eq!(clamp_session_timeout_ms(1), MIN_SESSION_TIMEOUT_MS);
        assert_eq!(clamp_session_timeout_ms(u64::MAX), MAX_SESSION_TIMEOUT_MS);
    }
}
