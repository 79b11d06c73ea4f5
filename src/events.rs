//! Telemetry events emitted by the pipeline
//!
//! The core never formats or writes logs itself; it hands structured events to
//! an `EventSink`. `TracingEventSink` forwards them to `tracing`,
//! `RecordingEventSink` keeps them in memory.

use std::sync::Mutex;

use serde::Serialize;
use uuid::Uuid;

use crate::types::{FailureKind, RecordStatus, SourceId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EnrichmentEvent {
    AttemptStarted {
        source: SourceId,
        record: usize,
        attempt: u32,
    },
    AttemptSucceeded {
        source: SourceId,
        record: usize,
        attempt: u32,
    },
    AttemptFailed {
        source: SourceId,
        record: usize,
        attempt: u32,
        kind: FailureKind,
        message: String,
        will_retry: bool,
    },
    CacheHit {
        source: SourceId,
        record: usize,
        not_found: bool,
    },
    CacheMiss {
        source: SourceId,
        record: usize,
    },
    CircuitBreakerTripped {
        source: SourceId,
        consecutive_failures: u32,
    },
    RecordCompleted {
        record: usize,
        status: RecordStatus,
        failures: usize,
    },
    RunFinished {
        run_id: Uuid,
        done: u64,
        partial_failure: u64,
        failed: u64,
        cancelled: u64,
    },
}

/// Receiver for pipeline telemetry
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EnrichmentEvent);
}

/// Renders events as structured `tracing` records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &EnrichmentEvent) {
        match event {
            EnrichmentEvent::AttemptStarted {
                source,
                record,
                attempt,
            } => {
                tracing::debug!(source = %source, record, attempt, "Source attempt started");
            }
            EnrichmentEvent::AttemptSucceeded {
                source,
                record,
                attempt,
            } => {
                tracing::debug!(source = %source, record, attempt, "Source attempt succeeded");
            }
            EnrichmentEvent::AttemptFailed {
                source,
                record,
                attempt,
                kind,
                message,
                will_retry,
            } => {
                if *will_retry {
                    tracing::warn!(
                        source = %source,
                        record,
                        attempt,
                        kind = %kind,
                        error = %message,
                        "Source attempt failed, retrying"
                    );
                } else if *kind == FailureKind::NotFound {
                    tracing::info!(source = %source, record, "No match at source");
                } else {
                    tracing::warn!(
                        source = %source,
                        record,
                        attempt,
                        kind = %kind,
                        error = %message,
                        "Source attempt failed"
                    );
                }
            }
            EnrichmentEvent::CacheHit {
                source,
                record,
                not_found,
            } => {
                tracing::debug!(source = %source, record, not_found, "Cache hit");
            }
            EnrichmentEvent::CacheMiss { source, record } => {
                tracing::debug!(source = %source, record, "Cache miss");
            }
            EnrichmentEvent::CircuitBreakerTripped {
                source,
                consecutive_failures,
            } => {
                tracing::error!(
                    source = %source,
                    consecutive_failures,
                    "Circuit breaker tripped, source disabled for the rest of the run"
                );
            }
            EnrichmentEvent::RecordCompleted {
                record,
                status,
                failures,
            } => {
                tracing::info!(record, status = %status, failures, "Record enriched");
            }
            EnrichmentEvent::RunFinished {
                run_id,
                done,
                partial_failure,
                failed,
                cancelled,
            } => {
                tracing::info!(
                    run_id = %run_id,
                    done,
                    partial_failure,
                    failed,
                    cancelled,
                    "Enrichment run finished"
                );
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<EnrichmentEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EnrichmentEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, predicate: impl Fn(&EnrichmentEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|e| predicate(e))
            .count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &EnrichmentEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}
