//! A fail-open, in-memory sliding-window rate limiter for the bid endpoint.
//!
//! Built from the same "process-local `Mutex`-guarded state" idiom as
//! `TimeSource` and the leaderboard index, rather than reaching for an
//! external crate, since this is a single piece of process-local counter
//! state, not a shared cache or distributed lock.

use jiff::{Span, Timestamp};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub struct RateLimiter {
    max_requests: usize,
    window: Span,
    hits: Mutex<HashMap<String, VecDeque<Timestamp>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Span) -> Self {
        Self { max_requests, window, hits: Mutex::new(HashMap::new()) }
    }

    /// Returns `true` if `key` (userId-or-client-address) is still under the
    /// limit, recording this attempt as a hit. Rate-limiter failures fail
    /// open: there is no failure mode here (no external dependency), but
    /// callers treat a poisoned mutex the same way, allowing the request
    /// rather than blocking bidding.
    pub fn check(&self, key: &str, now: Timestamp) -> bool {
        let Ok(mut hits) = self.hits.lock() else {
            return true;
        };
        let window_start = now - self.window;
        let entry = hits.entry(key.to_string()).or_default();
        while entry.front().is_some_and(|t| *t < window_start) {
            entry.pop_front();
        }
        if entry.len() >= self.max_requests {
            return false;
        }
        entry.push_back(now);
        true
    }
}
