//! Per-client request throttling over a sliding time window.
//!
//! The sentinel is an ordinary value owned by whatever hosts the pipeline.
//! Every call evicts timestamps that have aged out of the window and drops
//! clients with nothing left, so memory tracks recent traffic only.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SentinelDecision {
    Allowed { count: usize },
    Throttled { count: usize },
}

impl SentinelDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, SentinelDecision::Allowed { .. })
    }
}

pub struct RequestSentinel {
    limit: usize,
    window: Duration,
    clients: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RequestSentinel {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, client: &str) -> SentinelDecision {
        self.check_at(client, Instant::now())
    }

    /// Record a request from `client` at `now` unless it would exceed the limit.
    pub fn check_at(&self, client: &str, now: Instant) -> SentinelDecision {
        let mut clients = self.clients.lock();
        clients.retain(|_, hits| {
            while hits
                .front()
                .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
            {
                hits.pop_front();
            }
            !hits.is_empty()
        });

        let hits = clients.entry(client.to_string()).or_default();
        if hits.len() >= self.limit {
            debug!(client, count = hits.len(), "request throttled");
            return SentinelDecision::Throttled { count: hits.len() };
        }
        hits.push_back(now);
        SentinelDecision::Allowed { count: hits.len() }
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }
}
