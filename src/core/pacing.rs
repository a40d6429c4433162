//! # Gated, rate-limited fetch.
//!
//! [`Fetcher`] is the only network handle tasks ever see. Each call:
//!
//! ```text
//! fetch(req) ──► gate.admit() ──► lock last-dispatch slot
//!                                   │
//!                      wait = last + interval - now
//!                      wait > 0 ? sleep(wait)
//!                                   │
//!                      record dispatch time, unlock ──► inner.fetch(req)
//! ```
//!
//! Spacing is measured between *dispatches*, across every task sharing the
//! fetcher. The slot lock is held across the delay, so concurrent workers
//! queue up behind it and each gets its own interval. A request issued after a
//! long idle period goes out immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::TaskError;
use crate::net::{Fetch, FetchRequest, FetchResponse};

use super::Gate;

/// Paced wrapper around the raw [`Fetch`] primitive.
pub struct Fetcher {
    inner: Arc<dyn Fetch>,
    gate: Arc<Gate>,
    interval: Option<Duration>,
    last_dispatch: Mutex<Option<Instant>>,
}

impl Fetcher {
    /// `interval = None` disables pacing.
    pub fn new(inner: Arc<dyn Fetch>, gate: Arc<Gate>, interval: Option<Duration>) -> Self {
        Self {
            inner,
            gate,
            interval,
            last_dispatch: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Performs `request` once the gate admits it and the interval has elapsed.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TaskError> {
        self.gate.admit().await;
        {
            let mut last = self.last_dispatch.lock().await;
            if let (Some(prev), Some(interval)) = (*last, self.interval) {
                let due = prev + interval;
                if due > Instant::now() {
                    tokio::time::sleep_until(due).await;
                }
            }
            *last = Some(Instant::now());
        }
        tracing::debug!(method = %request.method, url = %request.url, "dispatch");
        Ok(self.inner.fetch(request).await?)
    }

    /// `GET url`.
    pub async fn get(&self, url: impl Into<String>) -> Result<FetchResponse, TaskError> {
        self.fetch(FetchRequest::get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::events::Bus;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;

    #[derive(Default)]
    struct Clock {
        at: SyncMutex<Vec<Instant>>,
    }

    #[async_trait]
    impl Fetch for Clock {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
            self.at.lock().push(Instant::now());
            Ok(FetchResponse::ok(request.url, ""))
        }
    }

    async fn running_gate() -> Arc<Gate> {
        let gate = Arc::new(Gate::new(Bus::new(8)));
        gate.start().unwrap();
        gate.proceed().await;
        gate
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_requests_are_spaced() {
        let clock = Arc::new(Clock::default());
        let fetcher = Fetcher::new(
            clock.clone(),
            running_gate().await,
            Some(Duration::from_millis(1000)),
        );

        fetcher.get("https://example.com/1").await.unwrap();
        fetcher.get("https://example.com/2").await.unwrap();

        let at = clock.at.lock().clone();
        assert!(at[1] - at[0] >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_period_adds_no_delay() {
        let clock = Arc::new(Clock::default());
        let fetcher = Fetcher::new(
            clock.clone(),
            running_gate().await,
            Some(Duration::from_millis(1000)),
        );

        fetcher.get("https://example.com/1").await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let before = Instant::now();
        fetcher.get("https://example.com/2").await.unwrap();

        let at = clock.at.lock().clone();
        assert_eq!(at[1], before);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_the_interval() {
        let clock = Arc::new(Clock::default());
        let fetcher = Arc::new(Fetcher::new(
            clock.clone(),
            running_gate().await,
            Some(Duration::from_millis(500)),
        ));

        let mut handles = Vec::new();
        for i in 0..3 {
            let f = fetcher.clone();
            handles.push(tokio::spawn(async move {
                f.get(format!("https://example.com/{i}")).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let mut at = clock.at.lock().clone();
        at.sort();
        for pair in at.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test]
    async fn stopped_gate_holds_requests() {
        let clock = Arc::new(Clock::default());
        let gate = Arc::new(Gate::new(Bus::new(8)));
        let fetcher = Arc::new(Fetcher::new(clock.clone(), gate.clone(), None));

        let pending = {
            let f = fetcher.clone();
            tokio::spawn(async move { f.get("https://example.com/").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(clock.at.lock().is_empty());

        gate.start().unwrap();
        pending.await.unwrap().unwrap();
        assert_eq!(clock.at.lock().len(), 1);
    }
}
