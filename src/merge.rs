//! Field-level merge of per-source results
//!
//! Rules by field kind:
//! - Scalar: highest-priority reporter wins
//! - Count: maximum reported value (never summed)
//! - List: case-insensitive union, with contributors tracked per element
//!
//! Partials are put into a canonical order before anything is compared, so the
//! result depends only on the multiset of inputs and never on response order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::types::{
    CanonicalField, FieldKind, FieldValue, MergedField, PartialEnrichment, Provenance, Resolution,
    SourceId,
};

#[derive(Debug, Clone)]
pub struct Merger {
    priority: Vec<SourceId>,
}

impl Merger {
    /// `priority` lists sources highest first; unlisted sources rank after
    /// every listed one, ordered by id
    pub fn new(priority: Vec<SourceId>) -> Self {
        Self { priority }
    }

    pub fn priority(&self) -> &[SourceId] {
        &self.priority
    }

    fn rank(&self, source: &SourceId) -> usize {
        self.priority
            .iter()
            .position(|s| s == source)
            .unwrap_or(self.priority.len())
    }

    fn compare(&self, a: &PartialEnrichment, b: &PartialEnrichment) -> Ordering {
        self.rank(&a.source_id)
            .cmp(&self.rank(&b.source_id))
            .then_with(|| a.source_id.cmp(&b.source_id))
            .then_with(|| fields_key(a).cmp(&fields_key(b)))
    }

    pub fn merge(&self, partials: &[PartialEnrichment]) -> BTreeMap<CanonicalField, MergedField> {
        let mut ordered: Vec<&PartialEnrichment> = partials.iter().collect();
        ordered.sort_by(|a, b| self.compare(a, b));

        let mut merged = BTreeMap::new();
        for field in CanonicalField::ALL {
            let reports: Vec<(&SourceId, &FieldValue)> = ordered
                .iter()
                .filter_map(|p| p.get(field).map(|v| (&p.source_id, v)))
                .collect();
            if reports.is_empty() {
                continue;
            }

            let resolved = match field.kind() {
                FieldKind::Scalar => Some(merge_scalar(&reports)),
                FieldKind::Count => merge_count(&reports),
                FieldKind::List => merge_list(&reports),
            };
            if let Some(m) = resolved {
                merged.insert(field, m);
            }
        }
        merged
    }
}

fn fields_key(partial: &PartialEnrichment) -> String {
    serde_json::to_string(&partial.fields).unwrap_or_default()
}

/// Reporting sources in priority order, each listed once
fn reporters(reports: &[(&SourceId, &FieldValue)]) -> Vec<SourceId> {
    let mut out: Vec<SourceId> = Vec::new();
    for (source, _) in reports {
        if !out.contains(source) {
            out.push((*source).clone());
        }
    }
    out
}

fn merge_scalar(reports: &[(&SourceId, &FieldValue)]) -> MergedField {
    let (winner, value) = reports[0];
    let unanimous = reports.iter().all(|(_, v)| *v == value);
    MergedField {
        value: value.clone(),
        provenance: Provenance {
            reporters: reporters(reports),
            winner: Some(winner.clone()),
            resolution: if unanimous {
                Resolution::Unanimous
            } else {
                Resolution::Priority
            },
            elements: BTreeMap::new(),
        },
    }
}

fn merge_count(reports: &[(&SourceId, &FieldValue)]) -> Option<MergedField> {
    let counts: Vec<(&SourceId, u64)> = reports
        .iter()
        .filter_map(|(s, v)| v.as_count().map(|n| (*s, n)))
        .collect();
    // Reports are in priority order; keep the first of equal maxima
    let (winner, max) = counts
        .iter()
        .fold(None::<(&SourceId, u64)>, |best, &(s, n)| match best {
            Some((_, b)) if b >= n => best,
            _ => Some((s, n)),
        })?;
    let unanimous = counts.iter().all(|(_, n)| *n == max);

    Some(MergedField {
        value: FieldValue::Count(max),
        provenance: Provenance {
            reporters: reporters(reports),
            winner: Some(winner.clone()),
            resolution: if unanimous {
                Resolution::Unanimous
            } else {
                Resolution::Maximum
            },
            elements: BTreeMap::new(),
        },
    })
}

fn merge_list(reports: &[(&SourceId, &FieldValue)]) -> Option<MergedField> {
    let mut elements: BTreeMap<String, Vec<SourceId>> = BTreeMap::new();
    for (source, value) in reports {
        for item in value.as_list().unwrap_or_default() {
            let key = item.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            let contributors = elements.entry(key).or_default();
            if !contributors.contains(source) {
                contributors.push((*source).clone());
            }
        }
    }
    if elements.is_empty() {
        return None;
    }

    Some(MergedField {
        value: FieldValue::List(elements.keys().cloned().collect()),
        provenance: Provenance {
            reporters: reporters(reports),
            winner: None,
            resolution: Resolution::Union,
            elements,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn merger() -> Merger {
        Merger::new(vec!["places".into(), "reviews".into(), "council".into()])
    }

    fn list(items: &[&str]) -> FieldValue {
        FieldValue::List(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_priority_wins_scalar_conflict() {
        let places =
            PartialEnrichment::new("places").with(CanonicalField::Rating, FieldValue::Number(4.5));
        let reviews =
            PartialEnrichment::new("reviews").with(CanonicalField::Rating, FieldValue::Number(3.0));

        for input in [
            vec![places.clone(), reviews.clone()],
            vec![reviews.clone(), places.clone()],
        ] {
            let merged = merger().merge(&input);
            let rating = &merged[&CanonicalField::Rating];
            assert_eq!(rating.value, FieldValue::Number(4.5));
            assert_eq!(
                rating.provenance.reporters,
                vec![SourceId::from("places"), SourceId::from("reviews")]
            );
            assert_eq!(rating.provenance.winner, Some(SourceId::from("places")));
            assert_eq!(rating.provenance.resolution, Resolution::Priority);
        }
    }

    #[test]
    fn test_lower_priority_fills_missing_scalar() {
        let places = PartialEnrichment::new("places")
            .with(CanonicalField::Phone, FieldValue::Text("020 1234".into()));
        let council = PartialEnrichment::new("council").with(
            CanonicalField::Website,
            FieldValue::Text("https://council.example/park".into()),
        );

        let merged = merger().merge(&[council, places]);
        assert_eq!(
            merged[&CanonicalField::Website].provenance.winner,
            Some(SourceId::from("council"))
        );
        assert_eq!(
            merged[&CanonicalField::Phone].provenance.resolution,
            Resolution::Unanimous
        );
    }

    #[test]
    fn test_count_takes_maximum_not_sum() {
        let places = PartialEnrichment::new("places")
            .with(CanonicalField::ReviewCount, FieldValue::Count(120));
        let reviews = PartialEnrichment::new("reviews")
            .with(CanonicalField::ReviewCount, FieldValue::Count(340));

        let merged = merger().merge(&[places, reviews]);
        let count = &merged[&CanonicalField::ReviewCount];
        assert_eq!(count.value, FieldValue::Count(340));
        assert_eq!(count.provenance.winner, Some(SourceId::from("reviews")));
        assert_eq!(count.provenance.resolution, Resolution::Maximum);
    }

    #[test]
    fn test_equal_counts_credit_higher_priority() {
        let places = PartialEnrichment::new("places")
            .with(CanonicalField::PhotoCount, FieldValue::Count(10));
        let council = PartialEnrichment::new("council")
            .with(CanonicalField::PhotoCount, FieldValue::Count(10));

        let merged = merger().merge(&[council, places]);
        let photos = &merged[&CanonicalField::PhotoCount];
        assert_eq!(photos.provenance.winner, Some(SourceId::from("places")));
        assert_eq!(photos.provenance.resolution, Resolution::Unanimous);
    }

    #[test]
    fn test_list_union_with_element_provenance() {
        let places = PartialEnrichment::new("places")
            .with(CanonicalField::Amenities, list(&["Parking", "toilets"]));
        let council = PartialEnrichment::new("council")
            .with(CanonicalField::Amenities, list(&["toilets", "cafe", " "]));

        let merged = merger().merge(&[council, places]);
        let amenities = &merged[&CanonicalField::Amenities];
        assert_eq!(amenities.value, list(&["cafe", "parking", "toilets"]));
        assert_eq!(amenities.provenance.winner, None);
        assert_eq!(amenities.provenance.resolution, Resolution::Union);
        assert_eq!(
            amenities.provenance.elements["toilets"],
            vec![SourceId::from("places"), SourceId::from("council")]
        );
        assert_eq!(
            amenities.provenance.elements["cafe"],
            vec![SourceId::from("council")]
        );
    }

    #[test]
    fn test_unlisted_source_ranks_last() {
        let extra = PartialEnrichment::new("osm").with(
            CanonicalField::Address,
            FieldValue::Text("Grove Rd".into()),
        );
        let council = PartialEnrichment::new("council").with(
            CanonicalField::Address,
            FieldValue::Text("Grove Road, London".into()),
        );

        let merged = merger().merge(&[extra, council]);
        assert_eq!(
            merged[&CanonicalField::Address].provenance.winner,
            Some(SourceId::from("council"))
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(merger().merge(&[]).is_empty());
    }

    fn sample_partials() -> Vec<PartialEnrichment> {
        vec![
            PartialEnrichment::new("places")
                .with(CanonicalField::Rating, FieldValue::Number(4.4))
                .with(CanonicalField::ReviewCount, FieldValue::Count(88))
                .with(CanonicalField::Amenities, list(&["parking"])),
            PartialEnrichment::new("reviews")
                .with(CanonicalField::Rating, FieldValue::Number(4.0))
                .with(CanonicalField::ReviewCount, FieldValue::Count(120))
                .with(CanonicalField::Amenities, list(&["Cafe", "parking"])),
            PartialEnrichment::new("council")
                .with(CanonicalField::Phone, FieldValue::Text("020 7364 5000".into()))
                .with(CanonicalField::Equipment, list(&["swings", "zip wire"])),
            PartialEnrichment::new("council")
                .with(CanonicalField::Phone, FieldValue::Text("020 7000 0000".into())),
        ]
    }

    proptest! {
        #[test]
        fn prop_merge_is_order_independent(
            shuffled in Just(sample_partials()).prop_shuffle()
        ) {
            let m = merger();
            prop_assert_eq!(m.merge(&shuffled), m.merge(&sample_partials()));
        }
    }
}
