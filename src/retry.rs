//! Bounded retry with exponential backoff and jitter
//!
//! Transient failures (network, rate limited) are retried up to
//! `max_attempts`; permanent failures end the call immediately. Every attempt,
//! retried or not, first passes through the source's rate limiter, and every
//! attempt is bounded by the per-call timeout.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};

use crate::config::RetryConfig;
use crate::error::SourceError;
use crate::events::{EnrichmentEvent, EventSink};
use crate::rate_limiter::RateLimiter;
use crate::types::{Failure, PartialEnrichment, SourceId};

/// Identifies the call being retried, for telemetry
pub struct AttemptContext<'a> {
    pub source: &'a SourceId,
    pub record: usize,
    pub events: &'a dyn EventSink,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the `failed_attempts`-th failure
    pub fn backoff_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        let capped = self
            .base_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay);
        if !self.jitter {
            return capped;
        }
        let spread = (capped.as_millis() as u64) / 2;
        let extra = rand::thread_rng().gen_range(0..=spread);
        capped + Duration::from_millis(extra)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn execute<F, Fut>(
        &self,
        ctx: &AttemptContext<'_>,
        limiter: &RateLimiter,
        call_timeout: Duration,
        mut op: F,
    ) -> Result<PartialEnrichment, Failure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PartialEnrichment, SourceError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            limiter.acquire().await;
            ctx.events.emit(&EnrichmentEvent::AttemptStarted {
                source: ctx.source.clone(),
                record: ctx.record,
                attempt,
            });

            let outcome = match timeout(call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::network(format!(
                    "call exceeded {}ms timeout",
                    call_timeout.as_millis()
                ))),
            };

            let err = match outcome {
                Ok(partial) => {
                    ctx.events.emit(&EnrichmentEvent::AttemptSucceeded {
                        source: ctx.source.clone(),
                        record: ctx.record,
                        attempt,
                    });
                    return Ok(partial);
                }
                Err(err) => err,
            };

            let will_retry = err.is_transient() && attempt < self.max_attempts;
            ctx.events.emit(&EnrichmentEvent::AttemptFailed {
                source: ctx.source.clone(),
                record: ctx.record,
                attempt,
                kind: err.kind,
                message: err.message.clone(),
                will_retry,
            });

            if !will_retry {
                return Err(Failure::new(
                    ctx.source.clone(),
                    err.kind,
                    err.message,
                    attempt,
                ));
            }

            let mut delay = self.backoff_for(attempt);
            if let Some(requested) = err.retry_after {
                delay = delay.max(requested);
            }
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use crate::types::FailureKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1))
            .without_jitter()
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = policy(5);
        assert_eq!(p.backoff_for(1), Duration::from_millis(100));
        assert_eq!(p.backoff_for(2), Duration::from_millis(200));
        assert_eq!(p.backoff_for(3), Duration::from_millis(400));
        assert_eq!(p.backoff_for(5), Duration::from_secs(1));
        assert_eq!(p.backoff_for(40), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_half_spread() {
        let p = RetryPolicy::new(3)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1));
        for _ in 0..50 {
            let d = p.backoff_for(2);
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_bounded_by_max_attempts() {
        let calls = AtomicU32::new(0);
        let sink = RecordingEventSink::new();
        let source = SourceId::from("places");
        let ctx = AttemptContext {
            source: &source,
            record: 0,
            events: &sink,
        };
        let limiter = RateLimiter::new(100);

        let result = policy(3)
            .execute(&ctx, &limiter, Duration::from_secs(5), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::network("connection reset")) }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.kind, FailureKind::NetworkError);
        assert_eq!(failure.attempt_count, 3);
        assert_eq!(
            sink.count(|e| matches!(e, EnrichmentEvent::AttemptFailed { will_retry: true, .. })),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let calls = AtomicU32::new(0);
        let sink = RecordingEventSink::new();
        let source = SourceId::from("reviews");
        let ctx = AttemptContext {
            source: &source,
            record: 4,
            events: &sink,
        };
        let limiter = RateLimiter::new(100);

        let failure = policy(3)
            .execute(&ctx, &limiter, Duration::from_secs(5), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::auth("invalid key")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.kind, FailureKind::AuthError);
        assert_eq!(failure.attempt_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let sink = RecordingEventSink::new();
        let source = SourceId::from("places");
        let ctx = AttemptContext {
            source: &source,
            record: 0,
            events: &sink,
        };
        let limiter = RateLimiter::new(100);

        let result = policy(3)
            .execute(&ctx, &limiter, Duration::from_secs(5), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(SourceError::rate_limited("slow down"))
                    } else {
                        Ok(PartialEnrichment::new("places"))
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_network_error() {
        let sink = RecordingEventSink::new();
        let source = SourceId::from("council");
        let ctx = AttemptContext {
            source: &source,
            record: 0,
            events: &sink,
        };
        let limiter = RateLimiter::new(100);

        let failure = policy(2)
            .execute(&ctx, &limiter, Duration::from_millis(50), || async {
                sleep(Duration::from_secs(60)).await;
                Ok(PartialEnrichment::new("council"))
            })
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::NetworkError);
        assert_eq!(failure.attempt_count, 2);
        assert!(failure.message.contains("timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honoured() {
        let sink = RecordingEventSink::new();
        let source = SourceId::from("places");
        let ctx = AttemptContext {
            source: &source,
            record: 0,
            events: &sink,
        };
        let limiter = RateLimiter::new(100);
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let _ = policy(2)
            .execute(&ctx, &limiter, Duration::from_secs(5), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SourceError::rate_limited("429")
                        .with_retry_after(Duration::from_secs(30)))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
