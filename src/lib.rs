//! Place Enrich - multi-source enrichment for location records
//!
//! Takes records identified by `{name, location, postcode}` and fills in
//! rating, coordinates, opening hours, amenities and the like from several
//! external sources, merging the results field by field with provenance.
//!
//! ## Pipeline
//! RawRecord -> (per source: breaker -> cache -> retry -> rate limiter -> client)
//! -> Merger -> EnrichedRecord
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use place_enrich::{EnrichmentConfig, Orchestrator, PlacesClient, RawRecord};
//!
//! # async fn run() -> place_enrich::Result<()> {
//! let orchestrator = Orchestrator::builder(EnrichmentConfig::default())
//!     .source(PlacesClient::new("api-key")?)
//!     .build()?;
//!
//! let report = orchestrator
//!     .run(vec![RawRecord::new("Victoria Park", "Hackney", "E9 7BT")])
//!     .await;
//! println!("{}", report.stats);
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Record, field and provenance types
pub mod types;

// Run configuration
pub mod config;

// Per-source call plumbing
pub mod breaker;
pub mod cache;
pub mod fingerprint;
pub mod rate_limiter;
pub mod retry;

// Merge and orchestration
pub mod merge;
pub mod orchestrator;
pub mod stats;

// Telemetry
pub mod events;

// Source clients
pub mod source;

// Input/output adapters
pub mod io;

pub use cache::{CacheStore, FileCacheStore, MemoryCacheStore};
pub use config::EnrichmentConfig;
pub use error::{EnrichError, Result, SourceError};
pub use events::{EnrichmentEvent, EventSink, RecordingEventSink, TracingEventSink};
pub use merge::Merger;
pub use orchestrator::{Orchestrator, RunReport, ShutdownHandle};
pub use source::{CouncilScraper, PlacesClient, ReviewSiteClient, SourceClient};
pub use stats::RunStats;
pub use types::{
    CanonicalField, EnrichedRecord, Failure, FailureKind, FieldValue, PartialEnrichment,
    RawRecord, RecordStatus, SourceId,
};
