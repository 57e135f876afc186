//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tasksync::{Notification, RetryPolicy, SharedListener, SyncOptions};

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

/// Options with short waits so reconnection and heartbeats happen quickly
pub fn fast_options() -> SyncOptions {
    SyncOptions {
        accept_poll_interval: Duration::from_millis(100),
        heartbeat_interval: Duration::from_millis(100),
        settle_delay: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(2),
        idle_retry_interval: Duration::from_millis(50),
        closed_pause: Duration::from_millis(20),
        retry: RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(20),
            multiplier: 2.0,
            max_delay: Duration::from_millis(200),
        },
        ..Default::default()
    }
}

/// Listener that records everything it is handed
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl Recorder {
    pub fn listener(&self) -> SharedListener {
        let seen = self.seen.clone();
        Arc::new(move |n: Notification| seen.lock().push(n))
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_exist() {
        assert!(valid_config_fixture().exists());
        assert!(invalid_config_fixture().exists());
    }
}
