#![deny(clippy::unwrap_used)]

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{sleep, Duration};

pub mod classify;
pub mod connection;
pub mod csv;
pub mod memory;
pub mod normalize;
pub mod range;
pub mod rest;
pub mod upload;

pub use classify::{classify, ErrorClass, SyncError};
pub use connection::{ConnectionProvider, StoreConfig};
pub use range::{RangeReader, PAGE_SIZE};
pub use upload::{BatchUploader, UploadOptions, UploadReport};

/// Paces outgoing store requests to at most `rpm` per minute.
pub struct RateLimiter(Arc<Notify>);

impl RateLimiter {
    pub fn new(rpm: u64) -> Self {
        let notify = Arc::new(Notify::new());
        let n = notify.clone();
        let duration = Duration::from_millis(60_000 / rpm.max(1));
        tokio::spawn(async move {
            let notify = n;
            loop {
                sleep(duration).await;
                notify.notify_one();
            }
        });
        Self(notify)
    }
}

#[async_trait]
impl reqwest_ratelimit::RateLimiter for RateLimiter {
    async fn acquire_permit(&self) {
        self.0.notified().await;
    }
}

pub fn env_flag(key: &str, default_value: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default_value,
        },
        Err(_) => default_value,
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    #[test]
    fn env_flag_falls_back_on_garbage() {
        std::env::set_var("DASH_SYNC_TEST_FLAG", "maybe");
        assert!(env_flag("DASH_SYNC_TEST_FLAG", true));
        std::env::set_var("DASH_SYNC_TEST_FLAG", " Off ");
        assert!(!env_flag("DASH_SYNC_TEST_FLAG", true));
        assert!(!env_flag("DASH_SYNC_TEST_FLAG_UNSET", false));
    }
}
