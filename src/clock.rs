use std::{fmt, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A source of time for the refresh engine.
///
/// Every wait in the engine (device polling and the unauthorized backoff) goes through
/// [`sleep`](Self::sleep), and every expiry decision goes through [`now`](Self::now), so an
/// alternative implementation can drive the engine without real delays.
#[async_trait]
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;

    /// Wait for `duration` to elapse.
    async fn sleep(&self, duration: Duration);
}

/// The wall clock, with sleeps backed by the tokio timer.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

impl fmt::Debug for SystemClock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SystemClock")
    }
}
