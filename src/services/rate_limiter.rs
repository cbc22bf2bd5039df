//! Fixed-window request counter.
//!
//! # Algorithm
//!
//! Each identity owns a window that starts on its first request and lasts
//! `policy.window`. Within the window the first `policy.limit` requests are
//! admitted; the rest are rejected without being counted. Once the window has
//! passed, the next request opens a fresh one.
//!
//! ```text
//!  first hit            limit reached              window_reset_at
//!     │ admitted  …  admitted │ rejected … rejected       │ admitted (count=1)
//!  ───┼───────────────────────┼───────────────────────────┼──────────────▶ t
//! ```
//!
//! Traffic straddling a boundary can see up to `2 × limit` admissions in a
//! span shorter than one window. That is inherent to fixed windows and
//! accepted here.
//!
//! # Storage
//!
//! State lives behind the [`RateLimitStore`] trait. The default
//! [`MemoryRateLimitStore`] is process-local: several instances behind a load
//! balancer each count independently.
//!
//! # Cleanup
//!
//! Entries whose window has passed are removed by [`RateLimitSweeper`], an
//! explicit background task that is started and stopped with the app state.
//! A missed sweep only costs memory; [`RateLimitStore::hit`] resets stale
//! entries on its own.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::clock::{Clock, add_duration};
use crate::metrics;

/// Error type for rate limit policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Request limit cannot be zero.
    ZeroLimit,
    /// Window length cannot be zero.
    ZeroWindow,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroLimit => {
                write!(f, "rate limit must be greater than 0; disable the limiter instead")
            }
            RateLimitError::ZeroWindow => write!(f, "rate limit window must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Requests allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    limit: NonZeroU32,
    window: Duration,
}

impl RateLimitPolicy {
    /// # Errors
    ///
    /// Returns [`RateLimitError::ZeroLimit`] or [`RateLimitError::ZeroWindow`].
    pub fn new(limit: u32, window: Duration) -> Result<Self, RateLimitError> {
        let limit = NonZeroU32::new(limit).ok_or(RateLimitError::ZeroLimit)?;
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        Ok(Self { limit, window })
    }

    /// Convenience constructor taking the window in milliseconds.
    pub fn per_millis(limit: u32, window_ms: u64) -> Result<Self, RateLimitError> {
        Self::new(limit, Duration::from_millis(window_ms))
    }

    pub fn limit(&self) -> u32 {
        self.limit.get()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Per-identity counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Requests counted in the current window
    pub count: u32,
    /// When the current window ends
    pub window_reset_at: DateTime<Utc>,
}

impl RateLimitEntry {
    /// A window is over once `now` is strictly past its reset instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.window_reset_at
    }
}

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub admitted: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the current window ends
    pub reset_at: DateTime<Utc>,
    pub limit: u32,
}

impl RateLimitDecision {
    /// Whole seconds until `reset_at`, never less than 1. Used for `Retry-After`.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        retry_after_secs(self.reset_at, now)
    }
}

/// Whole seconds from `now` until `reset_at`, rounded up and never less than 1.
pub fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_at - now).num_milliseconds().max(0);
    u64::try_from(millis).unwrap_or(0).div_ceil(1000).max(1)
}

/// Backing storage for rate-limit counters.
///
/// Implementations must make [`hit`](RateLimitStore::hit) atomic per
/// identity: two concurrent hits may never both observe the same count.
pub trait RateLimitStore: Send + Sync + fmt::Debug {
    /// Count one request for `identity` and decide whether it is admitted.
    fn hit(&self, identity: &str, policy: &RateLimitPolicy, now: DateTime<Utc>)
    -> RateLimitDecision;

    /// Read an entry without counting.
    fn peek(&self, identity: &str) -> Option<RateLimitEntry>;

    /// Give back one counted request, but only if the window that counted it
    /// (identified by `window_reset_at`) is still the current one.
    fn release(&self, identity: &str, window_reset_at: DateTime<Utc>);

    /// Drop entries whose window has passed. Returns how many were removed.
    fn sweep(&self, now: DateTime<Utc>) -> usize;

    /// Number of tracked identities.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutex-guarded `HashMap` store.
///
/// One lock covers the whole table. The critical section is a hash lookup
/// and a couple of integer operations, never an await.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateLimitEntry>> {
        // A panic while holding the lock cannot leave an entry half-written,
        // so the data is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn hit(
        &self,
        identity: &str,
        policy: &RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let limit = policy.limit();
        let mut entries = self.lock();

        match entries.get_mut(identity) {
            Some(entry) if !entry.is_expired_at(now) => {
                if entry.count >= limit {
                    return RateLimitDecision {
                        admitted: false,
                        remaining: 0,
                        reset_at: entry.window_reset_at,
                        limit,
                    };
                }
                entry.count += 1;
                RateLimitDecision {
                    admitted: true,
                    remaining: limit - entry.count,
                    reset_at: entry.window_reset_at,
                    limit,
                }
            }
            _ => {
                let entry = RateLimitEntry {
                    count: 1,
                    window_reset_at: add_duration(now, policy.window()),
                };
                entries.insert(identity.to_string(), entry);
                RateLimitDecision {
                    admitted: true,
                    remaining: limit - 1,
                    reset_at: entry.window_reset_at,
                    limit,
                }
            }
        }
    }

    fn peek(&self, identity: &str) -> Option<RateLimitEntry> {
        self.lock().get(identity).copied()
    }

    fn release(&self, identity: &str, window_reset_at: DateTime<Utc>) {
        if let Some(entry) = self.lock().get_mut(identity)
            && entry.window_reset_at == window_reset_at
        {
            entry.count = entry.count.saturating_sub(1);
        }
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Rate limiter: a store plus a clock.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Count a request for `identity` against `policy`.
    ///
    /// Never fails. Rejected requests do not consume quota.
    pub fn check(&self, identity: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        let decision = self.store.hit(identity, policy, self.clock.now());
        trace!(
            identity,
            admitted = decision.admitted,
            remaining = decision.remaining,
            "Rate limit checked"
        );
        decision
    }

    /// Undo the count taken by an admitted `decision`.
    ///
    /// Lets a caller reserve quota with [`check`](RateLimiter::check) before
    /// slow work and hand it back when the work turns out not to count. A
    /// decision from an earlier window is ignored.
    pub fn release(&self, identity: &str, decision: &RateLimitDecision) {
        if decision.admitted {
            self.store.release(identity, decision.reset_at);
        }
    }

    /// If `identity` has used up `policy` in its current window, return when
    /// that window ends. Does not count a request.
    pub fn exhausted(&self, identity: &str, policy: &RateLimitPolicy) -> Option<DateTime<Utc>> {
        let entry = self.store.peek(identity)?;
        let now = self.clock.now();
        (!entry.is_expired_at(now) && entry.count >= policy.limit())
            .then_some(entry.window_reset_at)
    }

    /// Remove expired entries now.
    pub fn sweep(&self) -> usize {
        self.store.sweep(self.clock.now())
    }

    pub fn tracked_clients(&self) -> usize {
        self.store.len()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Background task that periodically evicts expired rate-limit entries.
///
/// Cloning shares the same task; [`stop`](RateLimitSweeper::stop) on any
/// clone stops it.
#[derive(Debug, Clone)]
pub struct RateLimitSweeper {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl RateLimitSweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn start(limiter: RateLimiter, every: Duration) -> Self {
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let token = cancel.clone();

        tracker.spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => {
                        debug!("Rate limit sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        let remaining = limiter.tracked_clients();
                        metrics::record_rate_limit_sweep(removed, remaining);
                        if removed > 0 {
                            debug!(removed, remaining, "Swept expired rate limit entries");
                        }
                    }
                }
            }

            debug!("Rate limit sweeper shutting down");
        });
        tracker.close();

        info!(interval_ms = every.as_millis() as u64, "Rate limit sweeper started");
        Self { cancel, tracker }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tracker.is_empty()
    }

    /// Cancel the sweep loop and wait for it to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter() -> (RateLimiter, Arc<ManualClock>, Arc<MemoryRateLimitStore>) {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let store = Arc::new(MemoryRateLimitStore::new());
        let limiter = RateLimiter::new(store.clone(), clock.clone());
        (limiter, clock, store)
    }

    #[test]
    fn test_policy_rejects_zero() {
        assert_eq!(
            RateLimitPolicy::per_millis(0, 1000),
            Err(RateLimitError::ZeroLimit)
        );
        assert_eq!(
            RateLimitPolicy::per_millis(10, 0),
            Err(RateLimitError::ZeroWindow)
        );
    }

    #[test]
    fn test_worked_example() {
        let (limiter, clock, _) = limiter();
        let policy = RateLimitPolicy::per_millis(3, 60_000).unwrap();

        let remaining: Vec<u32> = (0..3)
            .map(|_| {
                let d = limiter.check("1.2.3.4", &policy);
                assert!(d.admitted);
                d.remaining
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let fourth = limiter.check("1.2.3.4", &policy);
        assert!(!fourth.admitted);
        assert_eq!(fourth.remaining, 0);

        clock.advance(Duration::from_millis(60_001));
        let fifth = limiter.check("1.2.3.4", &policy);
        assert!(fifth.admitted);
        assert_eq!(fifth.remaining, 2);
    }

    #[test]
    fn test_rejections_do_not_consume_quota() {
        let (limiter, _, store) = limiter();
        let policy = RateLimitPolicy::per_millis(2, 1000).unwrap();

        for _ in 0..10 {
            limiter.check("a", &policy);
        }
        assert_eq!(store.peek("a").unwrap().count, 2);
    }

    #[test]
    fn test_rejection_reports_window_reset() {
        let (limiter, clock, _) = limiter();
        let policy = RateLimitPolicy::per_millis(1, 30_000).unwrap();
        let start = clock.now();

        limiter.check("a", &policy);
        clock.advance(Duration::from_secs(10));
        let rejected = limiter.check("a", &policy);

        assert!(!rejected.admitted);
        assert_eq!((rejected.reset_at - start).num_milliseconds(), 30_000);
        assert_eq!(rejected.retry_after_secs(clock.now()), 20);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let (limiter, clock, _) = limiter();
        let policy = RateLimitPolicy::per_millis(1, 1000).unwrap();

        limiter.check("a", &policy);
        clock.advance(Duration::from_millis(1000));
        // Exactly at reset_at the old window still applies
        assert!(!limiter.check("a", &policy).admitted);
        clock.advance(Duration::from_millis(1));
        assert!(limiter.check("a", &policy).admitted);
    }

    #[test]
    fn test_identities_are_independent() {
        let (limiter, _, _) = limiter();
        let policy = RateLimitPolicy::per_millis(1, 60_000).unwrap();

        assert!(limiter.check("a", &policy).admitted);
        assert!(!limiter.check("a", &policy).admitted);
        let other = limiter.check("b", &policy);
        assert!(other.admitted);
        assert_eq!(other.remaining, 0);
    }

    #[test]
    fn test_exhausted_peek_does_not_count() {
        let (limiter, clock, store) = limiter();
        let policy = RateLimitPolicy::per_millis(2, 1000).unwrap();

        assert!(limiter.exhausted("a", &policy).is_none());
        limiter.check("a", &policy);
        assert!(limiter.exhausted("a", &policy).is_none());
        limiter.check("a", &policy);
        assert!(limiter.exhausted("a", &policy).is_some());
        assert_eq!(store.peek("a").unwrap().count, 2);

        clock.advance(Duration::from_millis(1001));
        assert!(limiter.exhausted("a", &policy).is_none());
    }

    #[test]
    fn test_release_returns_quota_in_same_window() {
        let (limiter, clock, store) = limiter();
        let policy = RateLimitPolicy::per_millis(1, 1000).unwrap();

        let first = limiter.check("a", &policy);
        assert!(!limiter.check("a", &policy).admitted);
        limiter.release("a", &first);
        assert_eq!(store.peek("a").unwrap().count, 0);
        assert!(limiter.check("a", &policy).admitted);

        // A reservation from a window that has since rolled over is ignored
        let stale = limiter.check("b", &policy);
        clock.advance(Duration::from_millis(1001));
        limiter.check("b", &policy);
        limiter.release("b", &stale);
        assert_eq!(store.peek("b").unwrap().count, 1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (limiter, clock, _) = limiter();
        let short = RateLimitPolicy::per_millis(5, 1000).unwrap();
        let long = RateLimitPolicy::per_millis(5, 60_000).unwrap();

        limiter.check("short", &short);
        limiter.check("long", &long);
        clock.advance(Duration::from_secs(2));

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_concurrent_hits_are_counted_exactly() {
        let (limiter, _, store) = limiter();
        let policy = RateLimitPolicy::per_millis(1000, 60_000).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|_| limiter.check("shared", &policy).admitted)
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(admitted, 800);
        assert_eq!(store.peek("shared").unwrap().count, 800);
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let decision = RateLimitDecision {
            admitted: false,
            remaining: 0,
            reset_at: now,
            limit: 1,
        };
        assert_eq!(decision.retry_after_secs(now), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_and_stops() {
        let (limiter, clock, _) = limiter();
        let policy = RateLimitPolicy::per_millis(5, 1000).unwrap();
        limiter.check("a", &policy);
        clock.advance(Duration::from_secs(5));

        let sweeper = RateLimitSweeper::start(limiter.clone(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(limiter.tracked_clients(), 0);

        sweeper.stop().await;
        assert!(!sweeper.is_running());
    }
}
