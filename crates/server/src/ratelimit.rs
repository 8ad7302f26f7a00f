//! Sliding-window rate limiting keyed by client address.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::HeaderMap;
use tokio::time::Instant;

/// How often stale entries are swept out.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Per-key sliding-window limiter.
///
/// A key is allowed `limit` hits within any trailing `window`.
pub struct RateLimiter {
    entries: Mutex<HashMap<String, Vec<Instant>>>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        RateLimiter {
            entries: Mutex::new(HashMap::new()),
            limit,
            window,
        }
    }

    /// Records a hit for `key` and reports whether it is within limit.
    pub fn allow(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let hits = entries.entry(key.to_string()).or_default();
        hits.retain(|t| now.duration_since(*t) < self.window);
        if hits.len() >= self.limit {
            return false;
        }
        hits.push(now);
        true
    }

    /// Hits currently on record for `key`.
    pub fn count(&self, key: &str) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(hits) => {
                hits.retain(|t| now.duration_since(*t) < self.window);
                hits.len()
            }
            None => 0,
        }
    }

    /// Starts a background task that drops keys with no recent hits.
    pub fn start_sweeper(self: &Arc<Self>) {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut entries = limiter.entries.lock().unwrap();
                let now = Instant::now();
                entries.retain(|_, hits| {
                    hits.retain(|t| now.duration_since(*t) < limiter.window);
                    !hits.is_empty()
                });
            }
        });
    }
}

/// Best-effort client address: the first `X-Forwarded-For` element when
/// present, otherwise the peer address.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(xff) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.ip().to_string()
}
