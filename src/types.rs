//! Record types shared across the enrichment pipeline
//!
//! `RawRecord` is the immutable input identity, `PartialEnrichment` is what a
//! single source contributes, and `EnrichedRecord` is the merged output handed
//! to the result sink.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identities
// =============================================================================

/// Identifier of an external data source (e.g. "places", "reviews", "council")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Unenriched input record. Never mutated by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawRecord {
    pub name: String,
    pub location: String,
    pub postcode: String,
}

impl RawRecord {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        postcode: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            postcode: postcode.into(),
        }
    }

    /// Free-text query used by search-style sources
    pub fn search_query(&self) -> String {
        [
            self.name.trim(),
            self.location.trim(),
            self.postcode.trim(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
    }
}

// =============================================================================
// Canonical fields
// =============================================================================

/// How values of a field are combined across sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Single value, resolved by source priority
    Scalar,
    /// Set of values, unioned across sources
    List,
    /// Count of something, resolved by taking the maximum
    Count,
}

/// Canonical field names every source translates into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    MatchedName,
    Address,
    Coordinates,
    Rating,
    ReviewCount,
    PhotoCount,
    Phone,
    Website,
    OpeningHours,
    Amenities,
    Accessibility,
    Equipment,
    /// Advertised age range as written, e.g. "2-8" or "5+"
    AgeRange,
    /// Age-group tags: toddler_friendly, child_friendly, older_kids
    AgeGroups,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 14] = [
        Self::MatchedName,
        Self::Address,
        Self::Coordinates,
        Self::Rating,
        Self::ReviewCount,
        Self::PhotoCount,
        Self::Phone,
        Self::Website,
        Self::OpeningHours,
        Self::Amenities,
        Self::Accessibility,
        Self::Equipment,
        Self::AgeRange,
        Self::AgeGroups,
    ];

    pub fn kind(self) -> FieldKind {
        match self {
            Self::ReviewCount | Self::PhotoCount => FieldKind::Count,
            Self::Amenities | Self::Accessibility | Self::Equipment | Self::AgeGroups => {
                FieldKind::List
            }
            _ => FieldKind::Scalar,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MatchedName => "matched_name",
            Self::Address => "address",
            Self::Coordinates => "coordinates",
            Self::Rating => "rating",
            Self::ReviewCount => "review_count",
            Self::PhotoCount => "photo_count",
            Self::Phone => "phone",
            Self::Website => "website",
            Self::OpeningHours => "opening_hours",
            Self::Amenities => "amenities",
            Self::Accessibility => "accessibility",
            Self::Equipment => "equipment",
            Self::AgeRange => "age_range",
            Self::AgeGroups => "age_groups",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenStatus {
    Open,
    Closed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningHours {
    pub status: OpenStatus,
    #[serde(default)]
    pub lines: Vec<String>,
}

/// A typed field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Count(u64),
    Coordinates(Coordinates),
    Hours(OpeningHours),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            Self::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

// =============================================================================
// Per-source results
// =============================================================================

/// Sparse set of canonical fields reported by one source for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialEnrichment {
    pub source_id: SourceId,
    pub retrieved_at: DateTime<Utc>,
    #[serde(default)]
    pub fields: BTreeMap<CanonicalField, FieldValue>,
}

impl PartialEnrichment {
    pub fn new(source_id: impl Into<SourceId>) -> Self {
        Self {
            source_id: source_id.into(),
            retrieved_at: Utc::now(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: CanonicalField, value: FieldValue) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: CanonicalField, value: FieldValue) {
        self.fields.insert(field, value);
    }

    /// Insert a text value, skipping blanks
    pub fn insert_text(&mut self, field: CanonicalField, value: Option<&str>) {
        if let Some(text) = value.map(str::trim).filter(|t| !t.is_empty()) {
            self.fields.insert(field, FieldValue::Text(text.to_string()));
        }
    }

    /// Merge list items into a list field, skipping blanks and duplicates
    pub fn extend_list<I, S>(&mut self, field: CanonicalField, items: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut incoming: Vec<String> = items
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if incoming.is_empty() {
            return;
        }

        let entry = self
            .fields
            .entry(field)
            .or_insert_with(|| FieldValue::List(Vec::new()));
        if let FieldValue::List(existing) = entry {
            incoming.retain(|item| !existing.contains(item));
            existing.extend(incoming);
        }
    }

    pub fn get(&self, field: CanonicalField) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Failure category reported by a source call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    RateLimited,
    AuthError,
    NetworkError,
    ParseError,
    /// Call skipped because the source's circuit breaker is open
    CircuitOpen,
}

impl FailureKind {
    /// Transient failures are retried; everything else is terminal immediately
    pub fn is_transient(self) -> bool {
        matches!(self, Self::NetworkError | Self::RateLimited)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not-found",
            Self::RateLimited => "rate-limited",
            Self::AuthError => "auth-error",
            Self::NetworkError => "network-error",
            Self::ParseError => "parse-error",
            Self::CircuitOpen => "circuit-open",
        };
        f.write_str(s)
    }
}

/// Terminal failure of one source for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub source_id: SourceId,
    pub kind: FailureKind,
    pub message: String,
    pub attempt_count: u32,
    pub occurred_at: DateTime<Utc>,
}

impl Failure {
    pub fn new(
        source_id: SourceId,
        kind: FailureKind,
        message: impl Into<String>,
        attempt_count: u32,
    ) -> Self {
        Self {
            source_id,
            kind,
            message: message.into(),
            attempt_count,
            occurred_at: Utc::now(),
        }
    }
}

// =============================================================================
// Merged output
// =============================================================================

/// How a merged field's value was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Every reporting source agreed
    Unanimous,
    /// Sources disagreed; highest-priority reporter won
    Priority,
    /// Count field; the maximum reported value won
    Maximum,
    /// List field; union of all reported elements
    Union,
}

/// Which sources contributed a merged field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Every source that reported the field, in priority order
    pub reporters: Vec<SourceId>,
    /// Source whose value was chosen (absent for list unions)
    pub winner: Option<SourceId>,
    pub resolution: Resolution,
    /// Per-element contributors for list fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub elements: BTreeMap<String, Vec<SourceId>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedField {
    pub value: FieldValue,
    pub provenance: Provenance,
}

/// Per-record pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Fetching,
    Merging,
    /// Every configured source succeeded
    Done,
    /// Some sources succeeded, some failed
    PartialFailure,
    /// Every source failed
    Failed,
    /// Never dispatched because the run was shut down
    Cancelled,
}

impl RecordStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::PartialFailure | Self::Failed | Self::Cancelled
        )
    }

    /// Classify a record from its per-source success count
    pub fn classify(succeeded: usize, attempted: usize) -> Self {
        if attempted > 0 && succeeded == attempted {
            Self::Done
        } else if succeeded > 0 {
            Self::PartialFailure
        } else {
            Self::Failed
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Merging => "merging",
            Self::Done => "done",
            Self::PartialFailure => "partial-failure",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Final per-record output: original fields, merged fields, provenance, status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub original: RawRecord,
    #[serde(default)]
    pub fields: BTreeMap<CanonicalField, MergedField>,
    pub status: RecordStatus,
    #[serde(default)]
    pub failures: Vec<Failure>,
    pub last_updated: DateTime<Utc>,
}

impl EnrichedRecord {
    /// Record carrying only the original fields
    pub fn bare(original: RawRecord, status: RecordStatus, failures: Vec<Failure>) -> Self {
        Self {
            original,
            fields: BTreeMap::new(),
            status,
            failures,
            last_updated: Utc::now(),
        }
    }

    pub fn value(&self, field: CanonicalField) -> Option<&FieldValue> {
        self.fields.get(&field).map(|f| &f.value)
    }

    pub fn provenance(&self, field: CanonicalField) -> Option<&Provenance> {
        self.fields.get(&field).map(|f| &f.provenance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query_skips_blank_parts() {
        let record = RawRecord::new("Victoria Park", "  ", "E9 7BT");
        assert_eq!(record.search_query(), "Victoria Park E9 7BT");
    }

    #[test]
    fn test_field_kinds() {
        assert_eq!(CanonicalField::Rating.kind(), FieldKind::Scalar);
        assert_eq!(CanonicalField::ReviewCount.kind(), FieldKind::Count);
        assert_eq!(CanonicalField::Amenities.kind(), FieldKind::List);
        assert_eq!(CanonicalField::AgeRange.kind(), FieldKind::Scalar);
        assert_eq!(CanonicalField::AgeGroups.kind(), FieldKind::List);
    }

    #[test]
    fn test_extend_list_dedupes_and_skips_blanks() {
        let mut partial = PartialEnrichment::new("council");
        partial.extend_list(CanonicalField::Amenities, ["parking", " ", "toilets"]);
        partial.extend_list(CanonicalField::Amenities, ["toilets", "cafe"]);

        assert_eq!(
            partial.get(CanonicalField::Amenities),
            Some(&FieldValue::List(vec![
                "parking".to_string(),
                "toilets".to_string(),
                "cafe".to_string()
            ]))
        );
    }

    #[test]
    fn test_insert_text_skips_blank() {
        let mut partial = PartialEnrichment::new("places");
        partial.insert_text(CanonicalField::Phone, Some("   "));
        partial.insert_text(CanonicalField::Website, None);
        assert!(partial.is_empty());
    }

    #[test]
    fn test_transient_kinds() {
        assert!(FailureKind::NetworkError.is_transient());
        assert!(FailureKind::RateLimited.is_transient());
        assert!(!FailureKind::AuthError.is_transient());
        assert!(!FailureKind::NotFound.is_transient());
        assert!(!FailureKind::ParseError.is_transient());
        assert!(!FailureKind::CircuitOpen.is_transient());
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(RecordStatus::classify(3, 3), RecordStatus::Done);
        assert_eq!(RecordStatus::classify(1, 3), RecordStatus::PartialFailure);
        assert_eq!(RecordStatus::classify(0, 3), RecordStatus::Failed);
        assert!(RecordStatus::Done.is_terminal());
        assert!(!RecordStatus::Fetching.is_terminal());
    }

    #[test]
    fn test_field_value_serialization_is_tagged() {
        let json = serde_json::to_value(FieldValue::Number(4.5)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "number", "value": 4.5}));
    }
}
