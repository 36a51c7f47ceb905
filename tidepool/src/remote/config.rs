//! Remote layer configuration.

use std::time::Duration;

/// Retry behaviour of one endpoint writer.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Delay after the first failed send.
    pub initial_backoff: Duration,

    /// Upper bound for the doubling backoff.
    pub max_backoff: Duration,

    /// Failures tolerated inside `retry_window` before the endpoint is
    /// declared unreachable.
    pub max_retries: u32,

    /// Rolling window failures are counted in.
    pub retry_window: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            max_retries: 5,
            retry_window: Duration::from_secs(60),
        }
    }
}

impl EndpointConfig {
    /// Fast-failing settings for in-process or LAN clusters.
    pub fn local_network() -> Self {
        Self {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
            max_retries: 3,
            retry_window: Duration::from_secs(10),
        }
    }
}

/// Settings for [`Remote`](super::Remote).
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    /// Address to listen on; becomes the address of every local pid.
    pub address: String,

    /// Per-endpoint retry behaviour.
    pub endpoint: EndpointConfig,
}

impl RemoteConfig {
    /// Listen on `address` with default retry settings.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            endpoint: EndpointConfig::default(),
        }
    }

    /// Replace the endpoint retry settings.
    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }
}
