//! Per-source call pacing
//!
//! Sliding-window limiter: a call is admitted only when fewer than
//! `max_per_second` calls were admitted in the trailing second and the optional
//! minimum interval since the previous admission has elapsed. Waiters queue on
//! the async mutex, so concurrent workers are admitted in arrival order and
//! never jointly exceed the ceiling.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::config::SourceSettings;
use crate::error::{EnrichError, Result};

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct RateLimiter {
    max_per_second: u32,
    min_interval: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_second: u32) -> Self {
        let max_per_second = max_per_second.max(1);
        Self {
            max_per_second,
            min_interval: Duration::ZERO,
            admitted: Mutex::new(VecDeque::with_capacity(max_per_second as usize)),
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Limiter for a source whose fetch issues `requests_per_fetch` HTTP requests.
    ///
    /// `settings.max_per_second` is a per-request ceiling, so the limiter admits
    /// `max_per_second / requests_per_fetch` fetches a second. A ceiling lower
    /// than one fetch's worth of requests cannot be honoured and is rejected.
    pub fn from_settings(settings: &SourceSettings, requests_per_fetch: u32) -> Result<Self> {
        let per_fetch = requests_per_fetch.max(1);
        if settings.max_per_second < per_fetch {
            return Err(EnrichError::Config(format!(
                "max_per_second {} is below the {} requests one fetch makes",
                settings.max_per_second, per_fetch
            )));
        }
        let limiter = Self::new(settings.max_per_second / per_fetch);
        Ok(match settings.min_interval() {
            Some(interval) => limiter.with_min_interval(interval),
            None => limiter,
        })
    }

    pub fn max_per_second(&self) -> u32 {
        self.max_per_second
    }

    /// Wait until a call slot is available, then claim it
    pub async fn acquire(&self) {
        let mut admitted = self.admitted.lock().await;
        loop {
            let now = Instant::now();
            while let Some(&oldest) = admitted.front() {
                if now.duration_since(oldest) >= WINDOW {
                    admitted.pop_front();
                } else {
                    break;
                }
            }

            let mut wait = Duration::ZERO;
            if admitted.len() >= self.max_per_second as usize {
                if let Some(&oldest) = admitted.front() {
                    wait = wait.max((oldest + WINDOW).saturating_duration_since(now));
                }
            }
            if let Some(&last) = admitted.back() {
                wait = wait.max((last + self.min_interval).saturating_duration_since(now));
            }

            if wait.is_zero() {
                admitted.push_back(now);
                return;
            }
            // Holding the lock while sleeping keeps later callers queued behind us
            sleep(wait).await;
        }
    }
}
