//! Client configuration.

/// Configuration for the consumer side.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Requested session timeout for group membership, milliseconds.
    pub session_timeout_ms: u64,
    /// Minimum time between offset commits, milliseconds.
    pub offset_commit_interval_ms: u64,
    /// Timeout for a single offset-commit request, milliseconds.
    pub offset_commit_timeout_ms: u64,
    /// Maximum records per fetch request.
    pub fetch_size: usize,
    /// Whether `read` drives offset commits automatically.
    pub auto_commit: bool,
    /// Retry budget for transient faults on most requests.
    pub retry_count: u32,
    /// Sleep between retries, milliseconds.
    pub retry_interval_ms: u64,
    /// Sleep between empty read passes, milliseconds.
    pub read_poll_interval_ms: u64,
    /// Bound on the number of records buffered per shard.
    pub max_buffered_records: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 60_000,
            offset_commit_interval_ms: 30_000,
            offset_commit_timeout_ms: 10_000,
            fetch_size: 1_000,
            auto_commit: true,
            retry_count: 3,
            retry_interval_ms: 1_000,
            read_poll_interval_ms: 20,
            max_buffered_records: 4_000,
        }
    }
}

impl ConsumerConfig {
    /// Returns the fetch size with its lower bound applied.
    #[must_use]
    pub fn effective_fetch_size(&self) -> usize {
        self.fetch_size.max(1)
    }

    /// Returns the per-shard buffer bound, never below one fetch.
    #[must_use]
    pub fn effective_buffer_bound(&self) -> usize {
        self.max_buffered_records.max(self.effective_fetch_size())
    }
}

/// Configuration for the producer side.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Retry budget for transient faults.
    pub retry_count: u32,
    /// Sleep between retries, milliseconds.
    pub retry_interval_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_interval_ms: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.session_timeout_ms, 60_000);
        assert!(config.auto_commit);
        assert_eq!(config.effective_fetch_size(), 1_000);
    }

    #[test]
    fn test_effective_bounds() {
        let config = ConsumerConfig {
            fetch_size: 0,
            max_buffered_records: 0,
            ..ConsumerConfig::default()
        };
        assert_eq!(config.effective_fetch_size(), 1);
        assert_eq!(config.effective_buffer_bound(), 1);
    }
}
