use std::time::Duration;

/// Timing and capacity knobs for a [`SyncEngine`](crate::SyncEngine) and its block fetcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// Interval between retries of heads that could not be joined yet.
    pub retry_interval: Duration,
    /// How long a single peer gets to answer a block request.
    pub fetch_timeout: Duration,
    /// Capacity of the event channel.
    pub channel_capacity: usize,
    /// Most deferred entries kept for retry. Further ones are dropped.
    pub max_pending: usize,
    /// Deferrals after which a pending entry is dropped.
    pub max_retry_rounds: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(30),
            channel_capacity: 1024,
            max_pending: 4096,
            max_retry_rounds: 64,
        }
    }
}

impl SyncConfig {
    /// Short intervals for fast test execution.
    pub fn test_config() -> Self {
        Self {
            retry_interval: Duration::from_millis(50),
            fetch_timeout: Duration::from_millis(500),
            channel_capacity: 256,
            max_pending: 64,
            max_retry_rounds: 8,
        }
    }
}
