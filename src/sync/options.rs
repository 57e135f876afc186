//! Runtime timing and limits shared by the server and client roles

use std::time::Duration;

use crate::protocol::{NotificationCodec, MAX_FRAME_SIZE};

use super::RetryPolicy;

/// Deadlines, intervals and limits for one coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// How long a single accept waits before re-checking for shutdown
    pub accept_poll_interval: Duration,

    /// Per-read deadline on the primary; spans idle gaps between heartbeats
    pub server_read_timeout: Duration,

    /// Per-read deadline on a secondary
    pub client_read_timeout: Duration,

    /// Deadline for writing one frame
    pub write_timeout: Duration,

    /// Deadline for dialing the primary
    pub dial_timeout: Duration,

    /// Interval between liveness pulses from the primary
    pub heartbeat_interval: Duration,

    /// Pause before a losing candidate dials the new primary
    pub settle_delay: Duration,

    /// Ceiling on waiting for background tasks during stop
    pub shutdown_timeout: Duration,

    /// Sleep between receive-loop checks while disconnected
    pub idle_retry_interval: Duration,

    /// Pause after losing the connection before the next loop iteration
    pub closed_pause: Duration,

    /// Reconnection backoff
    pub retry: RetryPolicy,

    /// Largest frame accepted or produced, delimiter included
    pub max_frame_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            accept_poll_interval: Duration::from_secs(1),
            server_read_timeout: Duration::from_secs(120),
            client_read_timeout: Duration::from_secs(90),
            write_timeout: Duration::from_secs(5),
            dial_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(10),
            settle_delay: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
            idle_retry_interval: Duration::from_secs(1),
            closed_pause: Duration::from_millis(100),
            retry: RetryPolicy::default(),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl SyncOptions {
    pub fn codec(&self) -> NotificationCodec {
        NotificationCodec::with_max_frame_size(self.max_frame_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SyncOptions::default();
        assert_eq!(options.server_read_timeout, Duration::from_secs(120));
        assert_eq!(options.client_read_timeout, Duration::from_secs(90));
        assert_eq!(options.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(options.codec().max_frame_size(), 8192);
    }
}
