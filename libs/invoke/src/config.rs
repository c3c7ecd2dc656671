use std::time::Duration;

use relay_fabric::transport::DEFAULT_MAX_FRAME_LEN;

/// Client-side configuration shared by every connection a [`Client`] opens.
///
/// [`Client`]: crate::client::Client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for a single invocation. `None` waits indefinitely.
    pub invocation_timeout: Option<Duration>,
    /// Maximum time to establish a connection.
    pub connect_timeout: Option<Duration>,
    /// Maximum time a single frame may take to write.
    pub send_timeout: Option<Duration>,
    /// Largest frame accepted or sent.
    pub max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            invocation_timeout: Some(Duration::from_secs(60)),
            connect_timeout: Some(Duration::from_secs(10)),
            send_timeout: Some(Duration::from_secs(5)),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ClientConfig {
    pub fn with_invocation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }
}

/// Server-side configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Handlers allowed to run at once across all connections.
    pub max_concurrent_dispatch: usize,
    /// How long shutdown waits for in-flight dispatches before aborting them.
    pub drain_timeout: Duration,
    /// Largest frame accepted or sent.
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatch: 64,
            drain_timeout: Duration::from_secs(5),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ServerConfig {
    pub fn with_max_concurrent_dispatch(mut self, max: usize) -> Self {
        self.max_concurrent_dispatch = max.max(1);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded() {
        let client = ClientConfig::default();
        assert_eq!(client.invocation_timeout, Some(Duration::from_secs(60)));
        assert_eq!(client.max_frame_len, DEFAULT_MAX_FRAME_LEN);

        let server = ServerConfig::default();
        assert_eq!(server.max_concurrent_dispatch, 64);
    }

    #[test]
    fn zero_workers_is_clamped() {
        let server = ServerConfig::default().with_max_concurrent_dispatch(0);
        assert_eq!(server.max_concurrent_dispatch, 1);
    }
}
