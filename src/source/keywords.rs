//! Keyword-based feature detection over free text
//!
//! Descriptions, review bodies and scraped page text are scanned for known
//! phrases; each matching rule contributes one feature tag to the amenities,
//! accessibility, equipment or age-group list. An advertised age range
//! ("suitable for 2-8 years", "ages 5+", "3-12 years old") is extracted as
//! written and also bucketed into age-group tags.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{CanonicalField, PartialEnrichment};

struct Rule {
    field: CanonicalField,
    tag: &'static str,
    pattern: Regex,
}

const RULES: &[(CanonicalField, &str, &[&str])] = &[
    // Equipment
    (
        CanonicalField::Equipment,
        "climbing",
        &["climbing frame", "monkey bars", "climbing wall", "rope climb"],
    ),
    (
        CanonicalField::Equipment,
        "swings",
        &["swing", "swings", "baby swing", "tire swing", "tyre swing"],
    ),
    (
        CanonicalField::Equipment,
        "slides",
        &["slide", "slides", "spiral slide", "tube slide"],
    ),
    (
        CanonicalField::Equipment,
        "activity",
        &[
            "sandbox",
            "sandpit",
            "seesaw",
            "trampoline",
            "zipline",
            "zip wire",
            "obstacle course",
        ],
    ),
    (
        CanonicalField::Equipment,
        "sports",
        &["basketball", "football", "tennis", "sports court", "muga"],
    ),
    (
        CanonicalField::Equipment,
        "water",
        &["splash pad", "water play", "fountain", "paddling pool"],
    ),
    (
        CanonicalField::Equipment,
        "sensory",
        &["musical", "sensory wall", "sensory play", "interactive play"],
    ),
    // Amenities
    (
        CanonicalField::Amenities,
        "parking",
        &["parking", "car park", "parking lot"],
    ),
    (
        CanonicalField::Amenities,
        "toilets",
        &["toilet", "toilets", "restroom", "bathroom", "changing facilities"],
    ),
    (
        CanonicalField::Amenities,
        "cafe",
        &["cafe", "café", "coffee", "refreshments", "kiosk"],
    ),
    (
        CanonicalField::Amenities,
        "seating",
        &["bench", "benches", "seating", "picnic"],
    ),
    (
        CanonicalField::Amenities,
        "shade",
        &["shade", "shelter", "covered", "canopy"],
    ),
    (
        CanonicalField::Amenities,
        "fencing",
        &["fenced", "enclosed", "gated"],
    ),
    (
        CanonicalField::Amenities,
        "bike_parking",
        &["bike rack", "bicycle parking", "cycle stand", "cycle parking"],
    ),
    (
        CanonicalField::Amenities,
        "safety_surface",
        &["rubber surface", "safety surface", "soft surface", "impact absorbing"],
    ),
    (
        CanonicalField::Amenities,
        "lighting",
        &["lighting", "floodlit", "floodlight", "floodlights"],
    ),
    (
        CanonicalField::Amenities,
        "cctv",
        &["cctv", "surveillance", "monitored"],
    ),
    (
        CanonicalField::Amenities,
        "first_aid",
        &["first aid", "defibrillator"],
    ),
    // Accessibility
    (
        CanonicalField::Accessibility,
        "wheelchair_accessible",
        &["wheelchair", "step-free", "step free"],
    ),
    (
        CanonicalField::Accessibility,
        "accessible",
        &["accessible", "disability", "disabled access"],
    ),
    (
        CanonicalField::Accessibility,
        "inclusive_play",
        &["inclusive", "inclusive play", "sen friendly"],
    ),
    // Age groups mentioned in passing
    (
        CanonicalField::AgeGroups,
        TODDLER,
        &["toddler", "toddlers", "under 5s", "under fives", "babies"],
    ),
    (
        CanonicalField::AgeGroups,
        OLDER,
        &["older kids", "older children", "teenagers", "teens"],
    ),
];

const TODDLER: &str = "toddler_friendly";
const CHILD: &str = "child_friendly";
const OLDER: &str = "older_kids";

/// Inclusive age bands behind the age-group tags; `None` is open-ended
const AGE_BANDS: &[(&str, u32, Option<u32>)] = &[
    (TODDLER, 0, Some(4)),
    (CHILD, 5, Some(8)),
    (OLDER, 9, None),
];

/// Tried in order; the first pattern that matches anywhere wins
static AGE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    const RANGE: &str = r"(\d{1,2}\s*[-–]\s*\d{1,2}|\d{1,2}\+?)";
    [
        format!(r"(?i)\bsuitable for {} years", RANGE),
        format!(r"(?i)\bages? {}", RANGE),
        format!(r"(?i)\b{} years? old", RANGE),
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static COMPILED: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    RULES
        .iter()
        .filter_map(|(field, tag, phrases)| {
            let alternation = phrases
                .iter()
                .map(|p| regex::escape(p))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))
                .ok()
                .map(|pattern| Rule {
                    field: *field,
                    tag: *tag,
                    pattern,
                })
        })
        .collect()
});

/// Feature tags found in a piece of text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextFeatures {
    pub amenities: Vec<String>,
    pub accessibility: Vec<String>,
    pub equipment: Vec<String>,
    pub age_range: Option<String>,
    pub age_groups: Vec<String>,
}

impl TextFeatures {
    pub fn is_empty(&self) -> bool {
        self.amenities.is_empty()
            && self.accessibility.is_empty()
            && self.equipment.is_empty()
            && self.age_range.is_none()
            && self.age_groups.is_empty()
    }

    /// Add the detected tags to a partial's list fields. An age range already
    /// on the partial is kept; the first text scanned wins.
    pub fn apply(&self, partial: &mut PartialEnrichment) {
        partial.extend_list(CanonicalField::Amenities, &self.amenities);
        partial.extend_list(CanonicalField::Accessibility, &self.accessibility);
        partial.extend_list(CanonicalField::Equipment, &self.equipment);
        partial.extend_list(CanonicalField::AgeGroups, &self.age_groups);
        if partial.get(CanonicalField::AgeRange).is_none() {
            partial.insert_text(CanonicalField::AgeRange, self.age_range.as_deref());
        }
    }
}

/// First advertised age range in the text, normalised to "N-M" or "N+"
pub fn extract_age_range(text: &str) -> Option<String> {
    AGE_PATTERNS.iter().find_map(|pattern| {
        pattern.captures(text).map(|caps| {
            caps[1]
                .chars()
                .filter(|c| !c.is_whitespace())
                .map(|c| if c == '–' { '-' } else { c })
                .collect()
        })
    })
}

/// Age-group tags whose band overlaps the range
pub fn categorize_age(range: &str) -> Vec<String> {
    let (low, high) = match range.split_once('-') {
        Some((lo, hi)) => match (lo.parse::<u32>(), hi.parse::<u32>()) {
            (Ok(lo), Ok(hi)) => (lo.min(hi), Some(lo.max(hi))),
            _ => return Vec::new(),
        },
        None => match range.strip_suffix('+') {
            Some(lo) => match lo.parse::<u32>() {
                Ok(lo) => (lo, None),
                Err(_) => return Vec::new(),
            },
            None => match range.parse::<u32>() {
                Ok(age) => (age, Some(age)),
                Err(_) => return Vec::new(),
            },
        },
    };

    AGE_BANDS
        .iter()
        .filter(|(_, band_low, band_high)| {
            let below_band_top = band_high.map_or(true, |top| low <= top);
            let reaches_band = high.map_or(true, |hi| hi >= *band_low);
            below_band_top && reaches_band
        })
        .map(|(tag, _, _)| tag.to_string())
        .collect()
}

pub fn detect(text: &str) -> TextFeatures {
    let mut features = TextFeatures::default();
    if text.trim().is_empty() {
        return features;
    }
    for rule in COMPILED.iter() {
        if !rule.pattern.is_match(text) {
            continue;
        }
        let target = match rule.field {
            CanonicalField::Amenities => &mut features.amenities,
            CanonicalField::Accessibility => &mut features.accessibility,
            CanonicalField::AgeGroups => &mut features.age_groups,
            _ => &mut features.equipment,
        };
        target.push(rule.tag.to_string());
    }

    features.age_range = extract_age_range(text);
    if let Some(range) = &features.age_range {
        for tag in categorize_age(range) {
            if !features.age_groups.contains(&tag) {
                features.age_groups.push(tag);
            }
        }
    }
    features
}
