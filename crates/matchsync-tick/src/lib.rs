//! Cancellable fixed-interval tick scheduler for matchsync.
//!
//! A [`TickScheduler`] owns one background task that invokes a callback
//! every `interval` until the callback asks to stop or the returned
//! [`TickHandle`] is cancelled. Ticks never overlap: the next deadline is
//! armed only after the current callback's future has completed, so a slow
//! broadcast delays (or, under [`TickPolicy::FixedRate`], skips) ticks but
//! never doubles them.
//!
//! # Usage
//!
//! ```ignore
//! let handle = TickScheduler::start(TickConfig::with_interval(interval), move |info| {
//!     let session = Weak::clone(&session);
//!     async move {
//!         match session.upgrade() {
//!             Some(session) => session.on_tick(info).await,
//!             None => TickControl::Stop,
//!         }
//!     }
//! });
//! // later, exactly once or as often as you like:
//! handle.cancel();
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How the next deadline is chosen once a tick's callback has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickPolicy {
    /// Wait a full interval after the callback completes. A slow callback
    /// stretches the period; the interval between the end of one tick and
    /// the start of the next is always `interval`.
    #[default]
    FixedDelay,
    /// Keep the original cadence. If the callback overran one or more
    /// deadlines, those ticks are skipped and the next one fires on the
    /// following slot. Never fires two ticks back to back.
    FixedRate,
}

/// Full configuration for a tick scheduler.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Re-arm policy.
    pub policy: TickPolicy,
    /// Budget warning threshold (0.0–1.0). A tracing warning is emitted when
    /// a callback takes more than this fraction of `interval`.
    pub budget_warn_threshold: f64,
    /// Random jitter (0–max µs) added to the *first* tick so sessions that
    /// start together don't tick in lockstep.
    pub initial_jitter_us: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.80,
            initial_jitter_us: 0,
        }
    }
}

impl TickConfig {
    /// Shortest interval the scheduler accepts.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    /// Create a config for a specific interval with default settings.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamp any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`TickScheduler::start`].
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_us = self.interval.as_micros() as u64,
                "tick interval below minimum, clamping to 1ms"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }
}

// ---------------------------------------------------------------------------
// Per-tick types
// ---------------------------------------------------------------------------

/// Information passed to the callback for every tick.
#[derive(Debug, Clone, Copy)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// The configured interval.
    pub interval: Duration,
    /// How far past its deadline this tick fired.
    pub late_by: Duration,
    /// Ticks skipped before this one (only ever non-zero for
    /// [`TickPolicy::FixedRate`]).
    pub ticks_skipped: u64,
}

/// Returned by the callback to keep or stop the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

// ---------------------------------------------------------------------------
// TickScheduler
// ---------------------------------------------------------------------------

/// Starts tick loops.
pub struct TickScheduler;

impl TickScheduler {
    /// Spawns a tick loop calling `callback` every `config.interval`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F, Fut>(config: TickConfig, callback: F) -> TickHandle
    where
        F: FnMut(TickInfo) -> Fut + Send + 'static,
        Fut: Future<Output = TickControl> + Send + 'static,
    {
        let config = config.validated();
        let token = CancellationToken::new();
        let ticks = Arc::new(AtomicU64::new(0));

        debug!(
            interval_ms = config.interval.as_secs_f64() * 1000.0,
            policy = ?config.policy,
            "tick scheduler started"
        );

        let task = tokio::spawn(run(
            Clock::new(config),
            token.clone(),
            Arc::clone(&ticks),
            callback,
        ));

        TickHandle {
            token,
            cancelled: AtomicBool::new(false),
            ticks,
            task,
        }
    }
}

async fn run<F, Fut>(
    mut clock: Clock,
    token: CancellationToken,
    ticks: Arc<AtomicU64>,
    mut callback: F,
) where
    F: FnMut(TickInfo) -> Fut + Send + 'static,
    Fut: Future<Output = TickControl> + Send + 'static,
{
    loop {
        let info = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            info = clock.wait_for_tick() => info,
        };
        ticks.fetch_add(1, Ordering::Relaxed);
        trace!(tick = info.tick, "tick fired");

        let control = callback(info).await;
        clock.record_tick_end();

        if control == TickControl::Stop {
            debug!(tick = info.tick, "tick loop stopped by callback");
            break;
        }
        // The callback may have cancelled its own schedule.
        if token.is_cancelled() {
            break;
        }
        clock.rearm();
    }
    token.cancel();
}

// ---------------------------------------------------------------------------
// TickHandle
// ---------------------------------------------------------------------------

/// Owner's handle on a running tick loop.
///
/// Dropping the handle cancels the loop. Cancellation takes effect before
/// the next tick; a callback already running is allowed to finish.
#[derive(Debug)]
pub struct TickHandle {
    token: CancellationToken,
    cancelled: AtomicBool,
    ticks: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl TickHandle {
    /// Cancels the loop. Returns `true` only for the call that actually
    /// cancelled; every later call is a no-op returning `false`.
    pub fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::AcqRel);
        if first {
            self.token.cancel();
            debug!(ticks = self.ticks_fired(), "tick scheduler cancelled");
        }
        first
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether the background loop has exited (cancelled or stopped).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Number of ticks fired so far.
    pub fn ticks_fired(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        // Never abort the task: the handle may be dropped from inside the
        // callback it is running.
        self.token.cancel();
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Deadline bookkeeping for one loop.
struct Clock {
    config: TickConfig,
    tick_count: u64,
    next_tick: Instant,
    tick_start: Option<Instant>,
    skipped: u64,
}

impl Clock {
    fn new(config: TickConfig) -> Self {
        let jitter = if config.initial_jitter_us > 0 {
            let us = rand::rng().random_range(0..config.initial_jitter_us);
            Duration::from_micros(us)
        } else {
            Duration::ZERO
        };
        let next_tick = Instant::now() + config.interval + jitter;
        Self {
            config,
            tick_count: 0,
            next_tick,
            tick_start: None,
            skipped: 0,
        }
    }

    async fn wait_for_tick(&mut self) -> TickInfo {
        time::sleep_until(self.next_tick).await;

        let now = Instant::now();
        self.tick_count += 1;
        self.tick_start = Some(now);

        TickInfo {
            tick: self.tick_count,
            interval: self.config.interval,
            late_by: now.saturating_duration_since(self.next_tick),
            ticks_skipped: std::mem::take(&mut self.skipped),
        }
    }

    /// Budget monitoring for the tick that just finished.
    fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        let budget = self.config.interval;
        let utilization = elapsed.as_secs_f64() / budget.as_secs_f64();

        if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = budget.as_secs_f64() * 1000.0,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "tick approaching budget limit"
            );
        }
    }

    /// Picks the next deadline. Only called after the callback completed.
    fn rearm(&mut self) {
        let now = Instant::now();
        let interval = self.config.interval;
        self.next_tick = match self.config.policy {
            TickPolicy::FixedDelay => now + interval,
            TickPolicy::FixedRate => {
                let mut next = self.next_tick + interval;
                while next <= now {
                    next += interval;
                    self.skipped += 1;
                }
                if self.skipped > 0 {
                    warn!(
                        tick = self.tick_count,
                        skipped = self.skipped,
                        "tick overrun, skipping ahead"
                    );
                }
                next
            }
        };
    }
}
