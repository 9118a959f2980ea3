//! Rate-limited concurrent dispatcher for real-time calls.
//!
//! Two independent gates sit in front of every call:
//! - a counting semaphore caps how many calls are outstanding at once;
//! - a shared last-start timestamp spaces call *starts* at least
//!   `min_interval` apart, no matter how many permits are free.
//!
//! Each call then runs under its own deadline. The permit and the in-flight
//! gauge are RAII guards, so every exit path (success, error, timeout,
//! cancellation of the caller's future) releases them.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use crate::error::{ConfigError, ProviderError};
use crate::item::{ItemResult, WorkItem};
use crate::provider::Provider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Outstanding-call cap, kept below the provider's concurrency ceiling
    pub max_concurrent: usize,
    /// Minimum spacing between call starts
    pub min_interval: Duration,
    /// Per-call deadline
    pub call_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 30,
            min_interval: Duration::from_millis(50),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    /// Spacing that keeps call starts under `rpm` requests per minute
    pub fn interval_for_rpm(rpm: u32) -> Duration {
        if rpm == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(60) / rpm
        }
    }
}

pub struct Dispatcher {
    permits: Semaphore,
    last_start: Mutex<Option<Instant>>,
    in_flight: AtomicUsize,
    config: DispatcherConfig,
}

/// Decrements the in-flight gauge on drop
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self, ConfigError> {
        if config.max_concurrent == 0 {
            return Err(ConfigError("max_concurrent must be > 0".into()));
        }
        if config.call_timeout.is_zero() {
            return Err(ConfigError("call_timeout must be > 0".into()));
        }
        Ok(Self {
            permits: Semaphore::new(config.max_concurrent),
            last_start: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            config,
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Calls currently past both gates and awaiting the provider
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run one call through the concurrency cap, the start throttle and the
    /// per-call deadline.
    ///
    /// A deadline expiry is reported as [`ProviderError::Timeout`]; the
    /// remote call may still be running but is abandoned locally.
    pub async fn dispatch<T, F, Fut>(&self, call: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let _permit = self.permits.acquire().await.map_err(|_| ProviderError::Http {
            status: None,
            message: "dispatcher closed".into(),
        })?;
        self.throttle().await;

        let _gauge = InFlight::enter(&self.in_flight);
        match tokio::time::timeout(self.config.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "call exceeded timeout of {:.1}s",
                    self.config.call_timeout.as_secs_f64()
                );
                Err(ProviderError::Timeout(self.config.call_timeout))
            }
        }
    }

    /// Wait out the residual interval since the previous start.
    ///
    /// The lock is held across the sleep so starts are strictly serialized.
    async fn throttle(&self) {
        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last {
            let since = prev.elapsed();
            if since < self.config.min_interval {
                let wait = self.config.min_interval - since;
                log::trace!("throttle: waiting {:.3}s", wait.as_secs_f64());
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Classify `items` concurrently; one result per item, completion order.
    ///
    /// Failures are tagged per item and never stop the rest.
    pub async fn dispatch_all<P: Provider>(
        &self,
        provider: &P,
        items: &[WorkItem],
    ) -> Vec<ItemResult> {
        futures_util::stream::iter(items)
            .map(|item| async move {
                match self.dispatch(|| provider.call(item)).await {
                    Ok(value) => ItemResult::output(&item.id, value),
                    Err(e) => {
                        log::warn!("{}: {e}", item.id);
                        ItemResult::error(&item.id, e.to_string())
                    }
                }
            })
            .buffer_unordered(self.config.max_concurrent)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn dispatcher(max_concurrent: usize, min_interval_ms: u64, timeout_ms: u64) -> Dispatcher {
        Dispatcher::new(DispatcherConfig {
            max_concurrent,
            min_interval: Duration::from_millis(min_interval_ms),
            call_timeout: Duration::from_millis(timeout_ms),
        })
        .unwrap()
    }

    #[test]
    fn rejects_zero_concurrency() {
        let config = DispatcherConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(Dispatcher::new(config).is_err());
    }

    #[test]
    fn rpm_to_interval() {
        assert_eq!(DispatcherConfig::interval_for_rpm(60), Duration::from_secs(1));
        assert_eq!(DispatcherConfig::interval_for_rpm(2000), Duration::from_millis(30));
        assert_eq!(DispatcherConfig::interval_for_rpm(0), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_starts_are_spaced() {
        let d = dispatcher(4, 100, 1000);
        let start = Instant::now();
        for i in 0..5 {
            let v = d.dispatch(|| async move { Ok::<_, ProviderError>(i) }).await.unwrap();
            assert_eq!(v, i);
        }
        // N calls → at least (N-1) intervals
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_are_spaced() {
        let d = dispatcher(8, 100, 1000);
        let starts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let calls = (0..6).map(|_| {
            let starts = starts.clone();
            let d = &d;
            async move {
                d.dispatch(|| async move {
                    starts.lock().unwrap().push(Instant::now());
                    Ok::<_, ProviderError>(())
                })
                .await
            }
        });
        futures_util::future::join_all(calls).await;

        let mut starts = starts.lock().unwrap().clone();
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_never_exceeds_cap() {
        let d = dispatcher(3, 0, 10_000);
        let peak = AtomicUsize::new(0);
        let calls = (0..20).map(|i| {
            let d = &d;
            let peak = &peak;
            async move {
                d.dispatch(|| async move {
                    peak.fetch_max(d.in_flight(), Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 + i % 7)).await;
                    Ok::<_, ProviderError>(())
                })
                .await
            }
        });
        let results = futures_util::future::join_all(calls).await;
        assert!(results.iter().all(Result::is_ok));
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
        assert_eq!(d.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_distinguishable_and_releases_permit() {
        let d = dispatcher(1, 0, 50);
        let err = d
            .dispatch(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, ProviderError>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(d.in_flight(), 0);

        // The single permit is free again
        let ok = d.dispatch(|| async { Ok::<_, ProviderError>(7) }).await.unwrap();
        assert_eq!(ok, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn error_releases_permit() {
        let d = dispatcher(1, 0, 1000);
        let err = d
            .dispatch(|| async { Err::<(), _>(ProviderError::InvalidPayload("bad".into())) })
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(d.dispatch(|| async { Ok::<_, ProviderError>(()) }).await.is_ok());
    }
}
