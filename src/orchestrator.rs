//! Orchestrator: drives records through fetch, merge and classification
//!
//! ```text
//! records ──► bounded worker pool (buffer_unordered)
//!               │
//!               ├─► per source: breaker ─► cache ─► retry ─► limiter ─► client
//!               │
//!               └─► merge successes ─► classify ─► EnrichedRecord
//! ```
//!
//! ## Lifecycle
//!
//! Each record moves `Pending → Fetching → Merging → Done | PartialFailure |
//! Failed`. Records never dispatched because of shutdown end as `Cancelled`,
//! so the output always holds one record per input, in input order.
//!
//! ## Shutdown
//!
//! `ShutdownHandle::trigger` stops dispatch of new records. Records already
//! fetching finish (or time out) and are merged and emitted normally. The
//! signal is consumed when the run it stopped returns, so a later `run` on the
//! same orchestrator starts fresh. A trigger before `run` cancels that run.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::cache::{CacheStore, MemoryCacheStore, ResponseCache};
use crate::config::EnrichmentConfig;
use crate::error::{EnrichError, Result};
use crate::events::{EnrichmentEvent, EventSink, TracingEventSink};
use crate::fingerprint::SourceFingerprint;
use crate::merge::Merger;
use crate::rate_limiter::RateLimiter;
use crate::retry::{AttemptContext, RetryPolicy};
use crate::source::SourceClient;
use crate::stats::{RunStats, SourceTally};
use crate::types::{
    EnrichedRecord, Failure, FailureKind, PartialEnrichment, RawRecord, RecordStatus, SourceId,
};

// =============================================================================
// Per-source wiring
// =============================================================================

/// A client together with the run-shared state guarding it
struct ConfiguredSource {
    id: SourceId,
    client: Arc<dyn SourceClient>,
    limiter: RateLimiter,
    cache: ResponseCache,
    breaker: CircuitBreaker,
    tally: Mutex<SourceTally>,
}

impl ConfiguredSource {
    fn tally(&self) -> std::sync::MutexGuard<'_, SourceTally> {
        self.tally
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// =============================================================================
// Shutdown
// =============================================================================

/// Cooperative shutdown signal for a running orchestrator
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

// =============================================================================
// Run output
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One per input record, in input order
    pub records: Vec<EnrichedRecord>,
    pub stats: RunStats,
}

// =============================================================================
// Builder
// =============================================================================

pub struct OrchestratorBuilder {
    config: EnrichmentConfig,
    clients: Vec<Arc<dyn SourceClient>>,
    store: Option<Arc<dyn CacheStore>>,
    events: Option<Arc<dyn EventSink>>,
}

impl OrchestratorBuilder {
    pub fn source(self, client: impl SourceClient + 'static) -> Self {
        self.source_arc(Arc::new(client))
    }

    pub fn source_arc(mut self, client: Arc<dyn SourceClient>) -> Self {
        self.clients.push(client);
        self
    }

    /// Backing store shared by every source's cache (in-memory by default)
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCacheStore::new()));
        let events = self.events.unwrap_or_else(|| Arc::new(TracingEventSink));

        let mut sources: Vec<ConfiguredSource> = Vec::new();
        for client in self.clients {
            let id = SourceId::from(client.source_id());
            if sources.iter().any(|s| s.id == id) {
                return Err(EnrichError::Config(format!(
                    "source '{}' registered more than once",
                    id
                )));
            }

            let settings = self.config.source_settings(&id);
            if !settings.enabled {
                tracing::info!(source = %id, "Source disabled by configuration");
                continue;
            }

            let limiter = RateLimiter::from_settings(&settings, client.requests_per_fetch())
                .map_err(|e| match e {
                    EnrichError::Config(msg) => {
                        EnrichError::Config(format!("sources.{}: {}", id, msg))
                    }
                    other => other,
                })?;
            tracing::debug!(
                source = %id,
                name = client.source_name(),
                max_per_second = limiter.max_per_second(),
                "Source configured"
            );

            sources.push(ConfiguredSource {
                cache: ResponseCache::new(id.clone(), store.clone(), self.config.cache.ttl())
                    .with_refresh(self.config.cache.refresh),
                breaker: CircuitBreaker::new(self.config.breaker.threshold),
                limiter,
                tally: Mutex::new(SourceTally::default()),
                client,
                id,
            });
        }

        if sources.is_empty() {
            return Err(EnrichError::Config("no enabled sources configured".into()));
        }

        let (tx, _rx) = watch::channel(false);
        Ok(Orchestrator {
            merger: Merger::new(self.config.priority.clone()),
            retry: RetryPolicy::from_config(&self.config.retry),
            config: self.config,
            sources,
            events,
            shutdown: Arc::new(tx),
        })
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct Orchestrator {
    config: EnrichmentConfig,
    sources: Vec<ConfiguredSource>,
    merger: Merger,
    retry: RetryPolicy,
    events: Arc<dyn EventSink>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Orchestrator {
    pub fn builder(config: EnrichmentConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            clients: Vec::new(),
            store: None,
            events: None,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|s| s.id.clone()).collect()
    }

    /// Enrich every record; never fails, failures are recorded as data
    pub async fn run(&self, records: Vec<RawRecord>) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        for source in &self.sources {
            source.breaker.reset();
            source.cache.begin_run();
            *source.tally() = SourceTally::default();
        }
        tracing::info!(
            run_id = %run_id,
            records = records.len(),
            sources = self.sources.len(),
            workers = self.config.workers,
            "Enrichment run started"
        );

        let shutdown_rx = self.shutdown.subscribe();
        let completed: Vec<(usize, EnrichedRecord)> = stream::iter(records.iter().enumerate())
            .take_while(move |_| {
                let stop = *shutdown_rx.borrow();
                async move { !stop }
            })
            .map(|(index, record)| async move { (index, self.process_record(index, record).await) })
            .buffer_unordered(self.config.workers)
            .collect()
            .await;

        // Reorder to input order; anything missing was never dispatched
        let mut slots: Vec<Option<EnrichedRecord>> = vec![None; records.len()];
        for (index, enriched) in completed {
            slots[index] = Some(enriched);
        }
        let records: Vec<EnrichedRecord> = slots
            .into_iter()
            .zip(records)
            .map(|(slot, raw)| {
                slot.unwrap_or_else(|| EnrichedRecord::bare(raw, RecordStatus::Cancelled, vec![]))
            })
            .collect();

        let mut stats = RunStats::default();
        for record in &records {
            stats.record(record);
        }
        for source in &self.sources {
            *stats.source_mut(&source.id) = source.tally().clone();
        }

        if self.shutdown.send_replace(false) {
            tracing::info!(run_id = %run_id, "Shutdown signal consumed by this run");
        }

        self.events.emit(&EnrichmentEvent::RunFinished {
            run_id,
            done: stats.done,
            partial_failure: stats.partial_failure,
            failed: stats.failed,
            cancelled: stats.cancelled,
        });

        RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            records,
            stats,
        }
    }

    async fn process_record(&self, index: usize, record: &RawRecord) -> EnrichedRecord {
        tracing::trace!(record = index, state = %RecordStatus::Fetching, "Record state");
        let outcomes = join_all(
            self.sources
                .iter()
                .map(|source| self.fetch_from(source, index, record)),
        )
        .await;

        let mut partials: Vec<PartialEnrichment> = Vec::new();
        let mut failures: Vec<Failure> = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(partial) => partials.push(partial),
                Err(failure) => failures.push(failure),
            }
        }

        tracing::trace!(record = index, state = %RecordStatus::Merging, "Record state");
        let status = RecordStatus::classify(partials.len(), self.sources.len());
        let enriched = EnrichedRecord {
            original: record.clone(),
            fields: self.merger.merge(&partials),
            status,
            failures,
            last_updated: Utc::now(),
        };

        self.events.emit(&EnrichmentEvent::RecordCompleted {
            record: index,
            status,
            failures: enriched.failures.len(),
        });
        enriched
    }

    fn circuit_open(source: &ConfiguredSource) -> Failure {
        Failure::new(
            source.id.clone(),
            FailureKind::CircuitOpen,
            "source disabled for this run after repeated permanent failures",
            0,
        )
    }

    async fn fetch_from(
        &self,
        source: &ConfiguredSource,
        index: usize,
        record: &RawRecord,
    ) -> std::result::Result<PartialEnrichment, Failure> {
        if source.breaker.is_open() {
            source.tally().circuit_broken += 1;
            return Err(Self::circuit_open(source));
        }

        let fingerprint = SourceFingerprint::new(record, &source.id);
        let ctx = AttemptContext {
            source: &source.id,
            record: index,
            events: self.events.as_ref(),
        };

        let resolution = source
            .cache
            .get_or_populate(&fingerprint, || async {
                // Tripped while this call was queued behind the cache or limiter
                if source.breaker.is_open() {
                    return Err(Self::circuit_open(source));
                }
                self.events.emit(&EnrichmentEvent::CacheMiss {
                    source: source.id.clone(),
                    record: index,
                });
                self.retry
                    .execute(&ctx, &source.limiter, self.config.call_timeout(), || {
                        source.tally().network_calls += 1;
                        source.client.fetch(record)
                    })
                    .await
            })
            .await;

        if resolution.hit {
            self.events.emit(&EnrichmentEvent::CacheHit {
                source: source.id.clone(),
                record: index,
                not_found: resolution.result.is_err(),
            });
            source.tally().cache_hits += 1;
        }

        match &resolution.result {
            Ok(_) => {
                if !resolution.hit {
                    source.breaker.record_success();
                }
                source.tally().succeeded += 1;
            }
            Err(failure) if failure.kind == FailureKind::CircuitOpen => {
                source.tally().circuit_broken += 1;
            }
            Err(failure) => {
                source.tally().failed += 1;
                if !resolution.hit && source.breaker.record_failure(failure.kind) {
                    self.events.emit(&EnrichmentEvent::CircuitBreakerTripped {
                        source: source.id.clone(),
                        consecutive_failures: source.breaker.consecutive_failures(),
                    });
                }
            }
        }

        resolution.result
    }
}
