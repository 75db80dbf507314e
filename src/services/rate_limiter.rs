// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Dual sliding-window rate limiter.
//!
//! Strava enforces a short-window quota (100 requests per 15 minutes) and a
//! daily quota (1000 requests). The limiter keeps a log of grant instants and
//! only admits a call when both windows are below `buffer_fraction` of their
//! quota. Otherwise the caller sleeps until enough entries age out.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Quota settings for the two windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub short_window: Duration,
    pub short_quota: u32,
    pub long_window: Duration,
    pub long_quota: u32,
    /// Fraction of each quota the limiter is allowed to use.
    pub buffer_fraction: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            short_window: Duration::from_secs(15 * 60),
            short_quota: 100,
            long_window: Duration::from_secs(24 * 60 * 60),
            long_quota: 1000,
            buffer_fraction: 0.9,
        }
    }
}

impl RateLimitConfig {
    /// Grants allowed inside one short window.
    pub fn short_cap(&self) -> usize {
        cap(self.short_quota, self.buffer_fraction)
    }

    /// Grants allowed inside one long window.
    pub fn long_cap(&self) -> usize {
        cap(self.long_quota, self.buffer_fraction)
    }
}

fn cap(quota: u32, fraction: f64) -> usize {
    ((quota as f64 * fraction).floor() as usize).max(1)
}

/// Current window usage, for logging and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitUsage {
    pub short_used: usize,
    pub short_cap: usize,
    pub long_used: usize,
    pub long_cap: usize,
}

/// Sliding-log limiter over two windows.
///
/// Not shared: the single cycle runner owns it, so `acquire` takes `&mut self`.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    grants: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            grants: VecDeque::new(),
        }
    }

    /// Wait until a call is permitted in both windows, then record it.
    pub async fn acquire(&mut self) {
        loop {
            let now = Instant::now();
            self.trim(now);

            let Some(until) = self.next_permit(now) else {
                self.grants.push_back(now);
                return;
            };

            let usage = self.usage_at(now);
            tracing::info!(
                wait_secs = until.saturating_duration_since(now).as_secs_f64(),
                short_used = usage.short_used,
                short_cap = usage.short_cap,
                long_used = usage.long_used,
                long_cap = usage.long_cap,
                "Rate limit reached, waiting"
            );
            tokio::time::sleep_until(until).await;
        }
    }

    /// Usage of both windows right now.
    pub fn usage(&self) -> RateLimitUsage {
        self.usage_at(Instant::now())
    }

    fn usage_at(&self, now: Instant) -> RateLimitUsage {
        RateLimitUsage {
            short_used: self.in_window(now, self.config.short_window).1,
            short_cap: self.config.short_cap(),
            long_used: self.in_window(now, self.config.long_window).1,
            long_cap: self.config.long_cap(),
        }
    }

    /// Index of the first grant still inside `window`, and how many are.
    fn in_window(&self, now: Instant, window: Duration) -> (usize, usize) {
        // An entry granted at t occupies the window until t + window.
        let start = self.grants.partition_point(|t| *t + window <= now);
        (start, self.grants.len() - start)
    }

    /// `None` when a call may proceed now, else the instant it may.
    fn next_permit(&self, now: Instant) -> Option<Instant> {
        let windows = [
            (self.config.short_window, self.config.short_cap()),
            (self.config.long_window, self.config.long_cap()),
        ];

        windows
            .into_iter()
            .filter_map(|(window, cap)| {
                let (start, count) = self.in_window(now, window);
                if count < cap {
                    return None;
                }
                // Enough entries must expire to bring the count below cap.
                let binding = self.grants[start + (count - cap)];
                Some(binding + window)
            })
            .max()
    }

    fn trim(&mut self, now: Instant) {
        let horizon = self.config.short_window.max(self.config.long_window);
        while let Some(front) = self.grants.front() {
            if *front + horizon <= now {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }
}
