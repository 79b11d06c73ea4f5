//! Scripted in-memory sources for driving the orchestrator in tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use place_enrich::{
    CanonicalField, EnrichmentConfig, FieldValue, PartialEnrichment, RawRecord, SourceClient,
    SourceError,
};

type Script =
    dyn Fn(&RawRecord, u32) -> Result<PartialEnrichment, SourceError> + Send + Sync + 'static;

/// A source whose response is computed by a closure of (record, call number)
#[derive(Clone)]
pub struct ScriptedSource {
    id: &'static str,
    script: Arc<Script>,
    delay: Duration,
    requests: u32,
    calls: Arc<AtomicU32>,
    call_times: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedSource {
    pub fn new<F>(id: &'static str, script: F) -> Self
    where
        F: Fn(&RawRecord, u32) -> Result<PartialEnrichment, SourceError> + Send + Sync + 'static,
    {
        Self {
            id,
            script: Arc::new(script),
            delay: Duration::ZERO,
            requests: 1,
            calls: Arc::new(AtomicU32::new(0)),
            call_times: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always succeeds with a rating
    pub fn rating(id: &'static str, rating: f64) -> Self {
        Self::new(id, move |_, _| {
            Ok(PartialEnrichment::new(id).with(CanonicalField::Rating, FieldValue::Number(rating)))
        })
    }

    /// Always fails with the given error
    pub fn failing(id: &'static str, error: SourceError) -> Self {
        Self::new(id, move |_, _| Err(error.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Pretend each fetch issues `requests` HTTP requests, all stamped at call time
    pub fn with_requests_per_fetch(mut self, requests: u32) -> Self {
        self.requests = requests;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceClient for ScriptedSource {
    fn source_id(&self) -> &'static str {
        self.id
    }

    fn source_name(&self) -> &'static str {
        "scripted"
    }

    fn requests_per_fetch(&self) -> u32 {
        self.requests
    }

    async fn fetch(&self, record: &RawRecord) -> Result<PartialEnrichment, SourceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Instant::now();
        self.call_times
            .lock()
            .unwrap()
            .extend(std::iter::repeat(now).take(self.requests as usize));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.script)(record, n)
    }
}

pub fn park(i: usize) -> RawRecord {
    RawRecord::new(format!("Park {}", i), "Hackney", "E8 1AA")
}

pub fn parks(n: usize) -> Vec<RawRecord> {
    (0..n).map(park).collect()
}

/// Default config with fast, deterministic backoff
pub fn test_config() -> EnrichmentConfig {
    let mut config = EnrichmentConfig::default();
    config.retry.base_delay_ms = 100;
    config.retry.max_delay_ms = 1_000;
    config.retry.jitter = false;
    config
}

/// Largest number of instants falling inside any 1-second window
pub fn max_in_any_second(times: &[Instant]) -> usize {
    let mut sorted = times.to_vec();
    sorted.sort();
    let mut best = 0;
    for (i, start) in sorted.iter().enumerate() {
        let n = sorted[i..]
            .iter()
            .take_while(|t| t.duration_since(*start) < Duration::from_secs(1))
            .count();
        best = best.max(n);
    }
    best
}
