//! Deterministic cache keys for (record, source) pairs
//!
//! ```text
//! SHA-256(version ++ len-prefixed(source_id, name, location, postcode)) → hex
//! ```
//!
//! Record identity is normalized first (case, whitespace, postcode spacing), so
//! cosmetic differences in the input file do not defeat the cache across runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{RawRecord, SourceId};

/// Bumped whenever the normalization rules change
const FINGERPRINT_VERSION: &str = "fp-v1";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceFingerprint(String);

impl SourceFingerprint {
    pub fn new(record: &RawRecord, source: &SourceId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION.as_bytes());
        for part in [
            source.as_str().to_string(),
            normalize_text(&record.name),
            normalize_text(&record.location),
            normalize_postcode(&record.postcode),
        ] {
            // Length prefix keeps ("ab", "c") distinct from ("a", "bc")
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn normalize_postcode(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}
