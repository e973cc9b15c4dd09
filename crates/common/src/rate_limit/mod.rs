//! Failed-attempt limiter for login
//!
//! Counts failures per source (client IP) inside a sliding start window and
//! locks the source out once `max_attempts` is reached. State is
//! process-local; build one instance at start-up and share it through `Arc`.
//!
//! Every operation has an `_at` form taking the current instant so the
//! window arithmetic can be tested without sleeping.

use crate::config::LoginThrottleConfig;
use crate::metrics;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct AttemptEntry {
    count: u32,
    first_attempt: Instant,
    lockout_until: Option<Instant>,
}

impl AttemptEntry {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 0,
            first_attempt: now,
            lockout_until: None,
        }
    }

    fn locked_at(&self, now: Instant) -> bool {
        self.lockout_until.is_some_and(|until| now < until)
    }
}

pub struct AttemptLimiter {
    max_attempts: u32,
    window: Duration,
    lockout: Duration,
    entries: Mutex<HashMap<String, AttemptEntry>>,
}

impl AttemptLimiter {
    pub fn new(max_attempts: u32, window: Duration, lockout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            window,
            lockout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &LoginThrottleConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs(config.window_secs),
            Duration::from_secs(config.lockout_secs),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AttemptEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_locked_out(&self, key: &str) -> bool {
        self.is_locked_out_at(key, Instant::now())
    }

    pub fn is_locked_out_at(&self, key: &str, now: Instant) -> bool {
        self.lock().get(key).is_some_and(|e| e.locked_at(now))
    }

    /// Count one failure; returns the attempts left before lockout
    pub fn record_failed_attempt(&self, key: &str) -> u32 {
        self.record_failed_attempt_at(key, Instant::now())
    }

    pub fn record_failed_attempt_at(&self, key: &str, now: Instant) -> u32 {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| AttemptEntry::fresh(now));

        if entry.locked_at(now) {
            return 0;
        }

        // Expired lockout or elapsed window starts a new count
        if entry.lockout_until.is_some() || now.duration_since(entry.first_attempt) >= self.window
        {
            *entry = AttemptEntry::fresh(now);
        }

        entry.count += 1;
        if entry.count >= self.max_attempts {
            entry.lockout_until = Some(now + self.lockout);
            metrics::record_lockout();
            tracing::warn!(
                source = key,
                attempts = entry.count,
                lockout_secs = self.lockout.as_secs(),
                "Source locked out after repeated failures"
            );
        }

        self.max_attempts.saturating_sub(entry.count)
    }

    /// Forget the source entirely
    pub fn record_successful_attempt(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn remaining_attempts(&self, key: &str) -> u32 {
        self.remaining_attempts_at(key, Instant::now())
    }

    pub fn remaining_attempts_at(&self, key: &str, now: Instant) -> u32 {
        match self.lock().get(key) {
            None => self.max_attempts,
            Some(e) if e.locked_at(now) => 0,
            Some(e) if e.lockout_until.is_some() => self.max_attempts,
            Some(e) if now.duration_since(e.first_attempt) >= self.window => self.max_attempts,
            Some(e) => self.max_attempts.saturating_sub(e.count),
        }
    }

    /// When the current lockout ends, if there is one
    pub fn lockout_expiry(&self, key: &str) -> Option<Instant> {
        self.lockout_expiry_at(key, Instant::now())
    }

    pub fn lockout_expiry_at(&self, key: &str, now: Instant) -> Option<Instant> {
        self.lock()
            .get(key)
            .filter(|e| e.locked_at(now))
            .and_then(|e| e.lockout_until)
    }

    /// Drop entries that no longer affect any decision; returns how many
    pub fn cleanup_expired_entries(&self) -> usize {
        self.cleanup_expired_entries_at(Instant::now())
    }

    pub fn cleanup_expired_entries_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| {
            e.locked_at(now)
                || (e.lockout_until.is_none() && now.duration_since(e.first_attempt) < self.window)
        });
        before - entries.len()
    }

    pub fn tracked_sources(&self) -> usize {
        self.lock().len()
    }
}
