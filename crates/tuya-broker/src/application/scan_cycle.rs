//! Scan cycle: the Scanner seam, single-flight control, and the background
//! scheduler that keeps the [`DiscoveryCache`] current.
//!
//! # Scheduling model (for beginners)
//!
//! One long-lived Tokio task owns the [`ScanScheduler`].  It wakes up on a
//! fixed interval (or when [`ScanControl::request_scan`] nudges it), runs
//! exactly one scan bounded by a timeout, writes the outcome into the cache,
//! and goes back to sleep.  The HTTP handlers never scan themselves; they
//! only read the cache.
//!
//! ```text
//!  ┌───────── tick ──────────┐
//!  │  or manual request      ▼
//!  │                  scanner.scan(window)  ── bounded by timeout
//!  │                         │
//!  │          ok ◄───────────┴──────────► error / timeout
//!  │   cache.apply_success          cache.record_failure
//!  └─────────────────────────┘   (previous presence data kept)
//! ```
//!
//! Shutdown is a `CancellationToken`.  It is checked between cycles, so a
//! scan that is already running finishes (within its timeout) first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tuya_core::PresenceRecord;

use super::discovery_cache::DiscoveryCache;
use crate::domain::ScanSettings;

/// Why one discovery pass produced no result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    /// None of the discovery ports could be bound.
    #[error("no discovery port could be bound: {0}")]
    Bind(String),

    /// The scan exceeded its bound.
    #[error("scan did not finish within {0:?}")]
    Timeout(Duration),

    /// A socket failed while the scan was listening.
    #[error("network error during scan: {0}")]
    Io(String),
}

/// Returned by [`ScanControl::request_scan`].
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ScanRequestError {
    #[error("a scan is already running")]
    AlreadyRunning,
}

/// One discovery pass over the local network.
///
/// Implementations are stateless between calls.  A pass that sees no device
/// returns `Ok(vec![])`; `Err` means the pass itself could not be performed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Listens for `window` and returns every device observed.
    async fn scan(&self, window: Duration) -> Result<Vec<PresenceRecord>, ScanError>;
}

// ── ScanControl ───────────────────────────────────────────────────────────────

/// Shared between the scheduler and the HTTP layer: "is a scan running?" and
/// "please scan soon".
#[derive(Debug, Default)]
pub struct ScanControl {
    running: AtomicBool,
    trigger: Notify,
}

impl ScanControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` while a scan cycle is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks the scheduler to start a cycle now instead of at the next tick.
    /// Several requests before the scheduler wakes up collapse into one scan.
    ///
    /// # Errors
    ///
    /// Returns [`ScanRequestError::AlreadyRunning`] while a cycle is running.
    pub fn request_scan(&self) -> Result<(), ScanRequestError> {
        if self.is_running() {
            return Err(ScanRequestError::AlreadyRunning);
        }
        self.trigger.notify_one();
        Ok(())
    }

    fn try_begin(&self) -> Option<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(&self.running))
    }
}

/// Clears the running flag when the cycle ends, including on panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── ScanScheduler ─────────────────────────────────────────────────────────────

/// Result of one call to [`ScanScheduler::run_cycle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cache now holds this many devices.
    Completed { devices: usize },
    /// The scan failed; the cache kept its previous devices.
    Failed(ScanError),
    /// Another cycle was already running; nothing was done.
    Skipped,
}

/// Drives [`Scanner`] on a fixed interval and feeds the [`DiscoveryCache`].
pub struct ScanScheduler {
    scanner: Arc<dyn Scanner>,
    cache: Arc<DiscoveryCache>,
    control: Arc<ScanControl>,
    settings: ScanSettings,
}

impl ScanScheduler {
    pub fn new(
        scanner: Arc<dyn Scanner>,
        cache: Arc<DiscoveryCache>,
        control: Arc<ScanControl>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            scanner,
            cache,
            control,
            settings,
        }
    }

    /// Runs cycles until `shutdown` is cancelled.  The first cycle starts
    /// immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.settings.interval.as_secs(),
            window_secs = self.settings.window.as_secs(),
            "scan scheduler started"
        );

        loop {
            let manual = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => false,
                _ = self.control.trigger.notified() => true,
            };

            if manual {
                debug!("manual scan requested");
            }
            self.run_cycle().await;
            if manual {
                // The next periodic scan is one full interval after this one.
                ticker.reset();
            }
        }

        info!("scan scheduler stopped");
    }

    /// Runs one scan, bounded by the configured timeout, and applies the
    /// outcome to the cache.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(_guard) = self.control.try_begin() else {
            debug!("scan cycle skipped: another cycle is running");
            return CycleOutcome::Skipped;
        };

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.settings.timeout,
            self.scanner.scan(self.settings.window),
        )
        .await
        .unwrap_or(Err(ScanError::Timeout(self.settings.timeout)));
        let elapsed = started.elapsed();

        match result {
            Ok(observed) => {
                let observed_count = observed.len();
                self.cache.apply_success(observed, Utc::now(), elapsed);
                let devices = self.cache.snapshot().present_count();
                info!(
                    observed = observed_count,
                    devices,
                    duration_ms = elapsed.as_millis() as u64,
                    "scan cycle completed"
                );
                CycleOutcome::Completed { devices }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    duration_ms = elapsed.as_millis() as u64,
                    "scan cycle failed; keeping previous presence data"
                );
                self.cache.record_failure(e.clone(), elapsed);
                CycleOutcome::Failed(e)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StalenessPolicy;
    use std::sync::atomic::AtomicUsize;
    use tokio_test::{assert_err, assert_ok};
    use tuya_core::DeviceId;

    fn settings() -> ScanSettings {
        ScanSettings {
            interval: Duration::from_secs(60),
            window: Duration::from_secs(10),
            timeout: Duration::from_secs(12),
            stale_after: Duration::from_secs(180),
            staleness: StalenessPolicy::DropMissing,
            ports: vec![6666, 6667, 7000],
            probe: false,
        }
    }

    fn record(id: &str, ip: &str) -> PresenceRecord {
        PresenceRecord::new(id.into(), ip.parse().unwrap(), Utc::now())
    }

    fn scheduler(scanner: MockScanner) -> (ScanScheduler, Arc<DiscoveryCache>, Arc<ScanControl>) {
        let cache = Arc::new(DiscoveryCache::new(StalenessPolicy::DropMissing));
        let control = Arc::new(ScanControl::new());
        let s = ScanScheduler::new(
            Arc::new(scanner),
            Arc::clone(&cache),
            Arc::clone(&control),
            settings(),
        );
        (s, cache, control)
    }

    #[tokio::test]
    async fn test_successful_cycle_populates_cache() {
        // Arrange
        let mut scanner = MockScanner::new();
        scanner
            .expect_scan()
            .times(1)
            .returning(|_| Ok(vec![record("dev1", "10.0.0.5")]));
        let (s, cache, _) = scheduler(scanner);

        // Act
        let outcome = s.run_cycle().await;

        // Assert
        assert_eq!(outcome, CycleOutcome::Completed { devices: 1 });
        let snap = cache.snapshot();
        assert!(snap.devices.contains_key(&DeviceId::from("dev1")));
        assert!(snap.last_scan_at.is_some());
    }

    #[tokio::test]
    async fn test_scanner_receives_configured_window() {
        let mut scanner = MockScanner::new();
        scanner
            .expect_scan()
            .withf(|window| *window == Duration::from_secs(10))
            .times(1)
            .returning(|_| Ok(Vec::new()));
        let (s, _, _) = scheduler(scanner);

        s.run_cycle().await;
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_previous_devices() {
        // Arrange: first scan succeeds, second fails
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut scanner = MockScanner::new();
        scanner.expect_scan().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![record("dev1", "10.0.0.5")])
            } else {
                Err(ScanError::Bind("no interface".to_string()))
            }
        });
        let (s, cache, _) = scheduler(scanner);
        s.run_cycle().await;
        let last_scan_at = cache.snapshot().last_scan_at;

        // Act
        let outcome = s.run_cycle().await;

        // Assert
        assert!(matches!(outcome, CycleOutcome::Failed(ScanError::Bind(_))));
        let snap = cache.snapshot();
        assert_eq!(snap.devices.len(), 1);
        assert_eq!(snap.last_scan_at, last_scan_at);
        assert!(snap.last_scan_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_scan_is_recorded_as_timeout() {
        // Arrange: a scanner that never finishes on its own
        struct Hanging;
        #[async_trait]
        impl Scanner for Hanging {
            async fn scan(&self, _window: Duration) -> Result<Vec<PresenceRecord>, ScanError> {
                std::future::pending().await
            }
        }
        let cache = Arc::new(DiscoveryCache::new(StalenessPolicy::DropMissing));
        let s = ScanScheduler::new(
            Arc::new(Hanging),
            Arc::clone(&cache),
            Arc::new(ScanControl::new()),
            settings(),
        );

        // Act
        let outcome = s.run_cycle().await;

        // Assert
        assert_eq!(
            outcome,
            CycleOutcome::Failed(ScanError::Timeout(Duration::from_secs(12)))
        );
        assert_eq!(
            cache.snapshot().last_scan_error,
            Some(ScanError::Timeout(Duration::from_secs(12)))
        );
    }

    #[test]
    fn test_request_scan_is_refused_while_running() {
        // Arrange
        let control = ScanControl::new();
        let guard = control.try_begin();
        assert!(guard.is_some());

        // Act / Assert
        assert!(control.is_running());
        assert_err!(control.request_scan());
        drop(guard);
        assert!(!control.is_running());
        assert_ok!(control.request_scan());
    }

    #[test]
    fn test_second_begin_fails_while_first_is_held() {
        let control = ScanControl::new();
        let _first = control.try_begin();
        assert!(control.try_begin().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_scans_on_every_tick_until_cancelled() {
        // Arrange
        let mut scanner = MockScanner::new();
        scanner.expect_scan().returning(|_| Ok(Vec::new()));
        let (s, cache, _) = scheduler(scanner);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(s.run(shutdown.clone()));

        // Act: the first tick is immediate, then one per 60 s
        tokio::time::sleep(Duration::from_secs(125)).await;
        shutdown.cancel();
        handle.await.unwrap();

        // Assert
        assert_eq!(cache.snapshot().scans_completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_request_triggers_an_early_scan() {
        // Arrange
        let mut scanner = MockScanner::new();
        scanner.expect_scan().returning(|_| Ok(Vec::new()));
        let (s, cache, control) = scheduler(scanner);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(s.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.snapshot().scans_completed, 1);

        // Act
        assert_ok!(control.request_scan());
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Assert
        assert_eq!(cache.snapshot().scans_completed, 2);
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycles_do_not_stop_the_scheduler() {
        let mut scanner = MockScanner::new();
        scanner
            .expect_scan()
            .returning(|_| Err(ScanError::Io("network unreachable".to_string())));
        let (s, cache, _) = scheduler(scanner);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(s.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(185)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let snap = cache.snapshot();
        assert_eq!(snap.scans_failed, 4);
        assert_eq!(snap.scans_completed, 0);
    }
}
