//! Per-client sliding-window rate limiting with a cooldown on violation.
//!
//! A client may be admitted at most `rate` times in any trailing `window`.
//! The request that would exceed the limit blocks the client, and every
//! request is denied until a full window has passed since the block started.
//! The first request after that is admitted and starts a fresh window.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

/// Default interval between idle sweeps.
pub const DEFAULT_IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Idle clients are evicted after this many windows without a request.
const IDLE_WINDOW_MULTIPLE: u32 = 10;

/// Bookkeeping for one client address.
#[derive(Debug, Clone)]
struct RateLimitState {
    admitted: VecDeque<Instant>,
    blocked_at: Option<Instant>,
    last_seen: Instant,
}

impl RateLimitState {
    fn new(now: Instant) -> Self {
        Self {
            admitted: VecDeque::from([now]),
            blocked_at: None,
            last_seen: now,
        }
    }
}

/// Sliding-window rate limiter keyed by client address.
#[derive(Debug)]
pub struct RateLimiter {
    clients: RwLock<HashMap<String, RateLimitState>>,
    rate: usize,
    window: Duration,
    idle_after: Duration,
}

impl RateLimiter {
    /// Create a limiter admitting `rate` requests per `window` and evicting
    /// clients idle for ten windows.
    #[must_use]
    pub fn new(rate: usize, window: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            rate,
            window,
            idle_after: window.saturating_mul(IDLE_WINDOW_MULTIPLE),
        }
    }

    /// Override the idle eviction threshold.
    #[must_use]
    pub fn with_idle_after(mut self, idle_after: Duration) -> Self {
        self.idle_after = idle_after;
        self
    }

    /// Configured admissions per window.
    #[must_use]
    pub fn rate(&self) -> usize {
        self.rate
    }

    /// Configured window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether a request from `client` is admitted now.
    pub fn admit(&self, client: &str) -> bool {
        self.admit_at(client, Instant::now())
    }

    /// Decide whether a request from `client` is admitted at `now`.
    pub fn admit_at(&self, client: &str, now: Instant) -> bool {
        let mut clients = self.clients.write();

        let Some(state) = clients.get_mut(client) else {
            clients.insert(client.to_owned(), RateLimitState::new(now));
            return true;
        };
        state.last_seen = now;

        if let Some(blocked_at) = state.blocked_at {
            if now.saturating_duration_since(blocked_at) > self.window {
                debug!(client, "Rate limit cooldown elapsed");
                state.blocked_at = None;
                state.admitted.clear();
                state.admitted.push_back(now);
                return true;
            }
            return false;
        }

        while let Some(&oldest) = state.admitted.front() {
            if now.saturating_duration_since(oldest) > self.window {
                state.admitted.pop_front();
            } else {
                break;
            }
        }

        if state.admitted.len() >= self.rate {
            warn!(
                client,
                rate = self.rate,
                window_secs = self.window.as_secs(),
                "Rate limit exceeded, blocking client"
            );
            state.blocked_at = Some(now);
            return false;
        }

        state.admitted.push_back(now);
        true
    }

    /// Evict clients idle longer than the threshold, returning how many.
    pub fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now())
    }

    /// Evict clients idle longer than the threshold as of `now`.
    pub fn sweep_idle_at(&self, now: Instant) -> usize {
        let mut clients = self.clients.write();
        let before = clients.len();
        clients.retain(|_, state| now.saturating_duration_since(state.last_seen) <= self.idle_after);
        let removed = before - clients.len();
        if removed > 0 {
            debug!(removed, remaining = clients.len(), "Evicted idle rate limit clients");
        }
        removed
    }

    /// Number of tracked clients.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether `client` is currently in cooldown.
    #[must_use]
    pub fn is_blocked(&self, client: &str) -> bool {
        self.clients
            .read()
            .get(client)
            .is_some_and(|state| state.blocked_at.is_some())
    }
}
