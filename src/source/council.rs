//! Council parks-directory scraper
//!
//! Fetches a page from a configured URL template and reads two things from
//! it: schema.org JSON-LD blocks describing the place, and the visible page
//! text, which goes through the keyword detector. A page with neither is a
//! ParseError; a search page that reports no results is NotFound.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::{build_http_client, get_text, keywords, SourceClient};
use crate::error::{EnrichError, Result, SourceError};
use crate::types::{
    CanonicalField, Coordinates, FieldValue, OpenStatus, OpeningHours, PartialEnrichment,
    RawRecord,
};

pub const SOURCE_ID: &str = "council";

const QUERY_PLACEHOLDER: &str = "{query}";

const PLACE_TYPES: &[&str] = &[
    "Park",
    "Playground",
    "CivicStructure",
    "Place",
    "LocalBusiness",
    "TouristAttraction",
];

static JSON_LD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .unwrap()
});

static NON_CONTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>").unwrap()
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

static NO_RESULTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(no results|0 results|did not match any|nothing matched)\b").unwrap()
});

pub struct CouncilScraper {
    http: Client,
    url_template: String,
}

impl CouncilScraper {
    /// `url_template` must contain a `{query}` placeholder
    pub fn new(url_template: impl Into<String>) -> Result<Self> {
        let url_template = url_template.into();
        if !url_template.contains(QUERY_PLACEHOLDER) {
            return Err(EnrichError::Config(format!(
                "council url_template must contain {}: {}",
                QUERY_PLACEHOLDER, url_template
            )));
        }
        // Validate the template shape up front
        Url::parse(&url_template.replace(QUERY_PLACEHOLDER, "test"))?;

        Ok(Self {
            http: build_http_client()?,
            url_template,
        })
    }

    fn page_url(&self, record: &RawRecord) -> std::result::Result<Url, SourceError> {
        let query: String =
            url::form_urlencoded::byte_serialize(record.search_query().as_bytes()).collect();
        Url::parse(&self.url_template.replace(QUERY_PLACEHOLDER, &query))
            .map_err(|e| SourceError::parse(format!("Invalid council URL: {}", e)))
    }
}

#[async_trait]
impl SourceClient for CouncilScraper {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn source_name(&self) -> &'static str {
        "Council parks directory"
    }

    async fn fetch(
        &self,
        record: &RawRecord,
    ) -> std::result::Result<PartialEnrichment, SourceError> {
        let url = self.page_url(record)?;
        tracing::debug!(url = %url, "Fetching council page");
        let html = get_text(&self.http, url).await?;
        parse_page(&html)
    }
}

/// Extract canonical fields from a council page
pub fn parse_page(html: &str) -> std::result::Result<PartialEnrichment, SourceError> {
    let place = find_place_node(html)?;
    let text = visible_text(html);

    if place.is_none() && NO_RESULTS_RE.is_match(&text) {
        return Err(SourceError::not_found("Council directory returned no results"));
    }

    let mut partial = PartialEnrichment::new(SOURCE_ID);
    if let Some(node) = &place {
        apply_place_node(node, &mut partial);
    }
    keywords::detect(&text).apply(&mut partial);

    if partial.is_empty() {
        return Err(SourceError::parse(
            "Council page had no structured data or recognisable features",
        ));
    }
    Ok(partial)
}

fn find_place_node(html: &str) -> std::result::Result<Option<Value>, SourceError> {
    for capture in JSON_LD_RE.captures_iter(html) {
        let body = capture.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if body.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(body)
            .map_err(|e| SourceError::parse(format!("Malformed JSON-LD block: {}", e)))?;

        let mut candidates = Vec::new();
        flatten_nodes(value, &mut candidates);
        if let Some(node) = candidates.into_iter().find(is_place) {
            return Ok(Some(node));
        }
    }
    Ok(None)
}

fn flatten_nodes(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.into_iter().for_each(|v| flatten_nodes(v, out)),
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten_nodes(graph, out);
            }
            out.push(Value::Object(map));
        }
        _ => {}
    }
}

fn is_place(node: &Value) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => PLACE_TYPES.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| PLACE_TYPES.contains(&t)),
        _ => false,
    }
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn apply_place_node(node: &Value, partial: &mut PartialEnrichment) {
    partial.insert_text(
        CanonicalField::MatchedName,
        node.get("name").and_then(Value::as_str),
    );
    partial.insert_text(
        CanonicalField::Phone,
        node.get("telephone").and_then(Value::as_str),
    );
    partial.insert_text(CanonicalField::Website, node.get("url").and_then(Value::as_str));

    match node.get("address") {
        Some(Value::String(s)) => partial.insert_text(CanonicalField::Address, Some(s.as_str())),
        Some(Value::Object(addr)) => {
            let parts: Vec<&str> = ["streetAddress", "addressLocality", "postalCode"]
                .iter()
                .filter_map(|k| addr.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            if !parts.is_empty() {
                partial.insert_text(CanonicalField::Address, Some(parts.join(", ").as_str()));
            }
        }
        _ => {}
    }

    if let Some(geo) = node.get("geo") {
        if let (Some(lat), Some(lng)) = (as_f64(geo.get("latitude")), as_f64(geo.get("longitude")))
        {
            partial.insert(
                CanonicalField::Coordinates,
                FieldValue::Coordinates(Coordinates { lat, lng }),
            );
        }
    }

    let hours = string_list(node.get("openingHours"));
    if !hours.is_empty() {
        partial.insert(
            CanonicalField::OpeningHours,
            FieldValue::Hours(OpeningHours {
                status: OpenStatus::Unknown,
                lines: hours,
            }),
        );
    }

    if let Some(Value::Array(features)) = node.get("amenityFeature") {
        let present = features
            .iter()
            .filter(|f| f.get("value").and_then(Value::as_bool).unwrap_or(true))
            .filter_map(|f| f.get("name").and_then(Value::as_str))
            .map(|name| name.trim().to_lowercase().replace(' ', "_"));
        partial.extend_list(CanonicalField::Amenities, present);
    }
}

fn visible_text(html: &str) -> String {
    let stripped = NON_CONTENT_RE.replace_all(html, " ");
    let text = TAG_RE.replace_all(&stripped, " ");
    text.replace("&amp;", "&")
        .replace("&nbsp;", " ")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
