//! Circuit breaker guarding evaluation against cascading store failures.
//!
//! CLOSED admits everything and counts failures inside a rolling window.
//! OPEN rejects immediately until a cool-off elapses, then HALF_OPEN lets
//! a small number of trial evaluations through; one failure re-opens, a
//! full set of successes closes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Failures inside the window that trip the breaker.
    pub failure_threshold: u32,
    /// How long OPEN rejects before probing.
    pub cool_off: Duration,
    /// Rolling window for counting failures while CLOSED.
    pub window: Duration,
    /// Trial successes HALF_OPEN needs before closing.
    pub half_open_trials: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        BreakerSettings {
            failure_threshold: 10,
            cool_off: Duration::from_secs(15),
            window: Duration::from_secs(60),
            half_open_trials: 2,
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    /// Failure timestamps inside the rolling window (CLOSED only).
    failures: Vec<Instant>,
    opened_at: Option<Instant>,
    /// Trials admitted while HALF_OPEN, capped at `half_open_trials`.
    trials_in_flight: u32,
    trial_successes: u32,
}

/// Shared breaker; all methods are callable from any worker thread.
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
    transitions: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        CircuitBreaker {
            settings,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: Vec::new(),
                opened_at: None,
                trials_in_flight: 0,
                trial_successes: 0,
            }),
            transitions: AtomicU64::new(0),
        }
    }

    /// Ask to run one evaluation. `false` means the caller must reject
    /// the work without touching the store.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.settings.cool_off {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.trials_in_flight = 1;
                    inner.trial_successes = 0;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.trials_in_flight < self.settings.half_open_trials {
                    inner.trials_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed => {
                inner.failures.clear();
            }
            BreakerState::HalfOpen => {
                inner.trial_successes += 1;
                if inner.trial_successes >= self.settings.half_open_trials {
                    self.transition(&mut inner, BreakerState::Closed);
                    inner.failures.clear();
                    inner.opened_at = None;
                    inner.trials_in_flight = 0;
                    inner.trial_successes = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed => {
                let now = Instant::now();
                let window = self.settings.window;
                inner
                    .failures
                    .retain(|at| now.duration_since(*at) < window);
                inner.failures.push(now);
                if inner.failures.len() as u32 >= self.settings.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open);
                    inner.opened_at = Some(now);
                    inner.failures.clear();
                }
            }
            BreakerState::HalfOpen => {
                // One failed probe is enough to re-open.
                self.transition(&mut inner, BreakerState::Open);
                inner.opened_at = Some(Instant::now());
                inner.trials_in_flight = 0;
                inner.trial_successes = 0;
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn transition_count(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        self.transitions.fetch_add(1, Ordering::Relaxed);
        match to {
            BreakerState::Open => {
                warn!(from = from.as_str(), to = to.as_str(), "circuit breaker opened")
            }
            _ => info!(from = from.as_str(), to = to.as_str(), "circuit breaker transition"),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}
