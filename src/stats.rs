//! Run-level tallies
//!
//! Per-record outcome counts plus per-source success, failure, circuit-broken,
//! cache-hit and network-call counts. Rendered as the run-end summary.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::types::{EnrichedRecord, RecordStatus, SourceId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceTally {
    pub succeeded: u64,
    pub failed: u64,
    /// Calls skipped because the source's breaker was open
    pub circuit_broken: u64,
    pub cache_hits: u64,
    /// Attempts that went to the network, retries included
    pub network_calls: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub total: u64,
    pub done: u64,
    pub partial_failure: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub sources: BTreeMap<SourceId, SourceTally>,
}

impl RunStats {
    pub fn record(&mut self, record: &EnrichedRecord) {
        self.total += 1;
        match record.status {
            RecordStatus::Done => self.done += 1,
            RecordStatus::PartialFailure => self.partial_failure += 1,
            RecordStatus::Failed => self.failed += 1,
            RecordStatus::Cancelled => self.cancelled += 1,
            RecordStatus::Pending | RecordStatus::Fetching | RecordStatus::Merging => {}
        }
    }

    pub fn source_mut(&mut self, source: &SourceId) -> &mut SourceTally {
        self.sources.entry(source.clone()).or_default()
    }

    pub fn source(&self, source: &SourceId) -> Option<&SourceTally> {
        self.sources.get(source)
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Records: {} total, {} done, {} partial failure, {} failed, {} cancelled",
            self.total, self.done, self.partial_failure, self.failed, self.cancelled
        )?;
        for (source, tally) in &self.sources {
            writeln!(
                f,
                "  {:<10} ok={} failed={} circuit_broken={} cache_hits={} calls={}",
                source,
                tally.succeeded,
                tally.failed,
                tally.circuit_broken,
                tally.cache_hits,
                tally.network_calls
            )?;
        }
        Ok(())
    }
}
