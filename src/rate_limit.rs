use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Sliding window in-memory rate limiter (pod local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled {
            return true;
        }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action budgets derived from env. Auto-save is the chatty one; ratings
/// and reports are throttled hard since both are upsert/append-once anyway.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub save_limit: usize,
    pub save_window: Duration,
    pub rate_limit: usize,
    pub rate_window: Duration,
    pub report_limit: usize,
    pub report_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        fn dur_env(name: &str, default: u64) -> Duration {
            Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default))
        }
        Self {
            save_limit: usize_env("RL_SAVE_LIMIT", 60),
            save_window: dur_env("RL_SAVE_WINDOW", 60),
            rate_limit: usize_env("RL_RATING_LIMIT", 5),
            rate_window: dur_env("RL_RATING_WINDOW", 300),
            report_limit: usize_env("RL_REPORT_LIMIT", 3),
            report_window: dur_env("RL_REPORT_WINDOW", 3600),
        }
    }
}

/// High level guard used by handlers, keyed by actor id.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self {
        Self { limiter, cfg }
    }
    pub fn allow_save(&self, actor: &str) -> bool {
        self.limiter.check(&format!("save:{actor}"), self.cfg.save_limit, self.cfg.save_window)
    }
    pub fn allow_rating(&self, actor: &str) -> bool {
        self.limiter.check(&format!("rating:{actor}"), self.cfg.rate_limit, self.cfg.rate_window)
    }
    pub fn allow_report(&self, actor: &str) -> bool {
        self.limiter.check(&format!("report:{actor}"), self.cfg.report_limit, self.cfg.report_window)
    }
}
