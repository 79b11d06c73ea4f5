//! Google Places client
//!
//! Text search for the record, then a details lookup on the top candidate.
//! The Places web service reports most failures inside a 200 response via the
//! `status` field, so both steps go through `check_api_status`. The review
//! texts returned with the details are scanned by the keyword detector.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{build_http_client, get_json, keywords, SourceClient};
use crate::error::{Result, SourceError};
use crate::types::{
    CanonicalField, Coordinates, FieldValue, OpenStatus, OpeningHours, PartialEnrichment,
    RawRecord,
};

pub const SOURCE_ID: &str = "places";

const PLACES_API_BASE: &str = "https://maps.googleapis.com/maps/api/place";

const DETAIL_FIELDS: &str = "name,formatted_address,geometry,rating,user_ratings_total,\
opening_hours,formatted_phone_number,website,photos,wheelchair_accessible_entrance,reviews";

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct TextSearchResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<PlaceCandidate>,
}

#[derive(Debug, Deserialize)]
struct PlaceCandidate {
    place_id: String,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    result: Option<PlaceDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct PlaceDetails {
    name: Option<String>,
    formatted_address: Option<String>,
    geometry: Option<Geometry>,
    rating: Option<f64>,
    user_ratings_total: Option<u64>,
    opening_hours: Option<PlaceOpeningHours>,
    formatted_phone_number: Option<String>,
    website: Option<String>,
    #[serde(default)]
    photos: Vec<serde_json::Value>,
    wheelchair_accessible_entrance: Option<bool>,
    #[serde(default)]
    reviews: Vec<PlaceReview>,
}

#[derive(Debug, Deserialize)]
struct PlaceReview {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct PlaceOpeningHours {
    open_now: Option<bool>,
    #[serde(default)]
    weekday_text: Vec<String>,
}

// =============================================================================
// Client
// =============================================================================

pub struct PlacesClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl PlacesClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            api_key: api_key.into(),
            base_url: PLACES_API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> std::result::Result<Url, SourceError> {
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("key", self.api_key.as_str()));
        Url::parse_with_params(&format!("{}/{}", self.base_url, path), all)
            .map_err(|e| SourceError::parse(format!("Invalid Places URL: {}", e)))
    }

    async fn search(&self, query: &str) -> std::result::Result<String, SourceError> {
        let url = self.endpoint("textsearch/json", &[("query", query)])?;
        let response: TextSearchResponse = get_json(&self.http, url).await?;
        check_api_status(&response.status, response.error_message.as_deref())?;

        response
            .results
            .into_iter()
            .next()
            .map(|c| c.place_id)
            .ok_or_else(|| SourceError::not_found(format!("No Places match for '{}'", query)))
    }

    async fn details(&self, place_id: &str) -> std::result::Result<PlaceDetails, SourceError> {
        let url = self.endpoint(
            "details/json",
            &[("place_id", place_id), ("fields", DETAIL_FIELDS)],
        )?;
        let response: DetailsResponse = get_json(&self.http, url).await?;
        check_api_status(&response.status, response.error_message.as_deref())?;

        response
            .result
            .ok_or_else(|| SourceError::parse("Places details response had no result"))
    }
}

#[async_trait]
impl SourceClient for PlacesClient {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn source_name(&self) -> &'static str {
        "Google Places"
    }

    fn requests_per_fetch(&self) -> u32 {
        2
    }

    async fn fetch(
        &self,
        record: &RawRecord,
    ) -> std::result::Result<PartialEnrichment, SourceError> {
        let query = text_query(record);
        let place_id = self.search(&query).await?;
        tracing::debug!(query = %query, place_id = %place_id, "Places candidate found");
        let details = self.details(&place_id).await?;
        Ok(normalize_details(details))
    }
}

/// Text-search query; "playground" is added unless the name already says so
fn text_query(record: &RawRecord) -> String {
    if record.name.to_lowercase().contains("playground") {
        return record.search_query();
    }
    RawRecord::new(
        format!("{} playground", record.name.trim()),
        record.location.clone(),
        record.postcode.clone(),
    )
    .search_query()
}

/// Map the API-level `status` field onto a failure kind
fn check_api_status(status: &str, message: Option<&str>) -> std::result::Result<(), SourceError> {
    let detail = match message {
        Some(m) => format!("{}: {}", status, m),
        None => status.to_string(),
    };
    match status {
        "OK" => Ok(()),
        "ZERO_RESULTS" | "NOT_FOUND" => Err(SourceError::not_found(detail)),
        "REQUEST_DENIED" => Err(SourceError::auth(detail)),
        "OVER_QUERY_LIMIT" => Err(SourceError::rate_limited(detail)),
        "UNKNOWN_ERROR" => Err(SourceError::network(detail)),
        _ => Err(SourceError::parse(detail)),
    }
}

fn normalize_details(details: PlaceDetails) -> PartialEnrichment {
    let mut partial = PartialEnrichment::new(SOURCE_ID);
    partial.insert_text(CanonicalField::MatchedName, details.name.as_deref());
    partial.insert_text(CanonicalField::Address, details.formatted_address.as_deref());
    partial.insert_text(CanonicalField::Phone, details.formatted_phone_number.as_deref());
    partial.insert_text(CanonicalField::Website, details.website.as_deref());

    if let Some(geometry) = details.geometry {
        partial.insert(
            CanonicalField::Coordinates,
            FieldValue::Coordinates(Coordinates {
                lat: geometry.location.lat,
                lng: geometry.location.lng,
            }),
        );
    }
    if let Some(rating) = details.rating {
        partial.insert(CanonicalField::Rating, FieldValue::Number(rating));
    }
    if let Some(total) = details.user_ratings_total {
        partial.insert(CanonicalField::ReviewCount, FieldValue::Count(total));
    }
    if !details.photos.is_empty() {
        partial.insert(
            CanonicalField::PhotoCount,
            FieldValue::Count(details.photos.len() as u64),
        );
    }
    if let Some(hours) = details.opening_hours {
        let status = match hours.open_now {
            Some(true) => OpenStatus::Open,
            Some(false) => OpenStatus::Closed,
            None => OpenStatus::Unknown,
        };
        partial.insert(
            CanonicalField::OpeningHours,
            FieldValue::Hours(OpeningHours {
                status,
                lines: hours.weekday_text,
            }),
        );
    }
    if details.wheelchair_accessible_entrance == Some(true) {
        partial.extend_list(CanonicalField::Accessibility, ["wheelchair_accessible"]);
    }
    for review in &details.reviews {
        keywords::detect(&review.text).apply(&mut partial);
    }
    partial
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureKind;

    #[test]
    fn test_normalize_details() {
        let json = r#"{
            "status": "OK",
            "result": {
                "name": "Victoria Park Playground",
                "formatted_address": "Grove Rd, London E3 5TB, UK",
                "geometry": {"location": {"lat": 51.5362, "lng": -0.0383}},
                "rating": 4.5,
                "user_ratings_total": 812,
                "opening_hours": {
                    "open_now": true,
                    "weekday_text": ["Monday: 7:00 AM – 9:00 PM"]
                },
                "formatted_phone_number": "020 7364 2494",
                "website": "https://www.towerhamlets.gov.uk/victoriapark",
                "photos": [{"photo_reference": "a"}, {"photo_reference": "b"}],
                "wheelchair_accessible_entrance": true
            }
        }"#;
        let response: DetailsResponse = serde_json::from_str(json).unwrap();
        let partial = normalize_details(response.result.unwrap());

        assert_eq!(partial.source_id.as_str(), SOURCE_ID);
        assert_eq!(
            partial.get(CanonicalField::Rating),
            Some(&FieldValue::Number(4.5))
        );
        assert_eq!(
            partial.get(CanonicalField::ReviewCount),
            Some(&FieldValue::Count(812))
        );
        assert_eq!(
            partial.get(CanonicalField::PhotoCount),
            Some(&FieldValue::Count(2))
        );
        assert_eq!(
            partial.get(CanonicalField::Coordinates),
            Some(&FieldValue::Coordinates(Coordinates {
                lat: 51.5362,
                lng: -0.0383
            }))
        );
        match partial.get(CanonicalField::OpeningHours) {
            Some(FieldValue::Hours(hours)) => {
                assert_eq!(hours.status, OpenStatus::Open);
                assert_eq!(hours.lines.len(), 1);
            }
            other => panic!("unexpected opening hours: {:?}", other),
        }
        assert_eq!(
            partial.get(CanonicalField::Accessibility),
            Some(&FieldValue::List(vec!["wheelchair_accessible".to_string()]))
        );
    }

    #[test]
    fn test_review_texts_feed_keyword_detection() {
        let json = r#"{
            "name": "London Fields Playground",
            "reviews": [
                {"rating": 5, "text": "Perfect for 1-4 years old, lots of baby swings"},
                {"rating": 2, "text": "Toilets were closed"},
                {"rating": 4}
            ]
        }"#;
        let details: PlaceDetails = serde_json::from_str(json).unwrap();
        let partial = normalize_details(details);

        assert_eq!(
            partial.get(CanonicalField::AgeRange),
            Some(&FieldValue::Text("1-4".into()))
        );
        assert_eq!(
            partial.get(CanonicalField::AgeGroups),
            Some(&FieldValue::List(vec!["toddler_friendly".to_string()]))
        );
        assert_eq!(
            partial.get(CanonicalField::Equipment),
            Some(&FieldValue::List(vec!["swings".to_string()]))
        );
        assert_eq!(
            partial.get(CanonicalField::Amenities),
            Some(&FieldValue::List(vec!["toilets".to_string()]))
        );
    }

    #[test]
    fn test_sparse_details_omit_fields() {
        let partial = normalize_details(PlaceDetails {
            name: Some("Hackney Downs".into()),
            website: Some("  ".into()),
            ..Default::default()
        });
        assert_eq!(partial.fields.len(), 1);
        assert!(partial.get(CanonicalField::Website).is_none());
    }

    #[test]
    fn test_text_query() {
        let plain = RawRecord::new("Clissold Park", "Stoke Newington", "N16 9HJ");
        assert_eq!(
            text_query(&plain),
            "Clissold Park playground Stoke Newington N16 9HJ"
        );
        let named = RawRecord::new("Diana Memorial Playground", "", "W2 2UH");
        assert_eq!(text_query(&named), "Diana Memorial Playground W2 2UH");
    }

    #[test]
    fn test_api_status_mapping() {
        assert!(check_api_status("OK", None).is_ok());
        let kind = |s: &str| check_api_status(s, Some("detail")).unwrap_err().kind;
        assert_eq!(kind("ZERO_RESULTS"), FailureKind::NotFound);
        assert_eq!(kind("REQUEST_DENIED"), FailureKind::AuthError);
        assert_eq!(kind("OVER_QUERY_LIMIT"), FailureKind::RateLimited);
        assert_eq!(kind("UNKNOWN_ERROR"), FailureKind::NetworkError);
        assert_eq!(kind("INVALID_REQUEST"), FailureKind::ParseError);
        assert_eq!(kind("SOMETHING_NEW"), FailureKind::ParseError);
    }

    #[test]
    fn test_search_response_parses_empty_results() {
        let response: TextSearchResponse =
            serde_json::from_str(r#"{"status": "ZERO_RESULTS", "results": []}"#).unwrap();
        assert!(response.results.is_empty());
        assert_eq!(
            check_api_status(&response.status, None).unwrap_err().kind,
            FailureKind::NotFound
        );
    }

    #[test]
    fn test_endpoint_encodes_query_and_key() {
        let client = PlacesClient::new("secret")
            .unwrap()
            .with_base_url("http://localhost:9999/place/");
        let url = client
            .endpoint("textsearch/json", &[("query", "Clissold Park N16 9HJ")])
            .unwrap();
        assert_eq!(url.path(), "/place/textsearch/json");
        let pairs: Vec<_> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("query".into(), "Clissold Park N16 9HJ".into())));
        assert!(pairs.contains(&("key".into(), "secret".into())));
    }
}
