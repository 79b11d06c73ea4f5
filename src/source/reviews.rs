//! Review-site client (TripAdvisor Content API)
//!
//! Location search, then details and recent reviews for the top hit. The API
//! returns numbers as strings; anything that fails to parse is a ParseError
//! rather than a silently dropped field.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{build_http_client, get_json, keywords, SourceClient};
use crate::error::{Result, SourceError};
use crate::types::{CanonicalField, Coordinates, FieldValue, PartialEnrichment, RawRecord};

pub const SOURCE_ID: &str = "reviews";

const REVIEW_API_BASE: &str = "https://api.content.tripadvisor.com/api/v1";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<LocationHit>,
}

#[derive(Debug, Deserialize)]
struct LocationHit {
    location_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct LocationDetails {
    name: Option<String>,
    description: Option<String>,
    web_url: Option<String>,
    website: Option<String>,
    phone: Option<String>,
    latitude: Option<String>,
    longitude: Option<String>,
    rating: Option<String>,
    num_reviews: Option<String>,
    address_obj: Option<AddressObj>,
    #[serde(default)]
    amenities: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AddressObj {
    address_string: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewsResponse {
    #[serde(default)]
    data: Vec<Review>,
}

#[derive(Debug, Deserialize)]
struct Review {
    #[serde(default)]
    title: String,
    #[serde(default)]
    text: String,
}

pub struct ReviewSiteClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl ReviewSiteClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            api_key: api_key.into(),
            base_url: REVIEW_API_BASE.to_string(),
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
        let mut all: Vec<(&str, &str)> = vec![("key", self.api_key.as_str()), ("language", "en")];
        all.extend_from_slice(params);
        Url::parse_with_params(&format!("{}/{}", self.base_url, path), all)
            .map_err(|e| SourceError::parse(format!("Invalid review-site URL: {}", e)))
    }

    async fn search(&self, record: &RawRecord) -> std::result::Result<String, SourceError> {
        let query = record.search_query();
        let url = self.endpoint(
            "location/search",
            &[("searchQuery", query.as_str()), ("category", "attractions")],
        )?;
        let response: SearchResponse = get_json(&self.http, url).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|hit| hit.location_id)
            .ok_or_else(|| SourceError::not_found(format!("No review-site listing for '{}'", query)))
    }
}

#[async_trait]
impl SourceClient for ReviewSiteClient {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn source_name(&self) -> &'static str {
        "TripAdvisor"
    }

    fn requests_per_fetch(&self) -> u32 {
        3
    }

    async fn fetch(
        &self,
        record: &RawRecord,
    ) -> std::result::Result<PartialEnrichment, SourceError> {
        let location_id = self.search(record).await?;

        let url = self.endpoint(&format!("location/{}/details", location_id), &[])?;
        let details: LocationDetails = get_json(&self.http, url).await?;

        let url = self.endpoint(&format!("location/{}/reviews", location_id), &[])?;
        let reviews: ReviewsResponse = get_json(&self.http, url).await?;

        tracing::debug!(
            location_id = %location_id,
            reviews = reviews.data.len(),
            "Review-site listing fetched"
        );
        normalize(details, &reviews.data)
    }
}

fn parse_number<T: std::str::FromStr>(
    field: &str,
    raw: Option<&str>,
) -> std::result::Result<Option<T>, SourceError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|_| SourceError::parse(format!("Unparseable {} '{}'", field, s))),
    }
}

fn normalize(
    details: LocationDetails,
    reviews: &[Review],
) -> std::result::Result<PartialEnrichment, SourceError> {
    let mut partial = PartialEnrichment::new(SOURCE_ID);
    partial.insert_text(CanonicalField::MatchedName, details.name.as_deref());
    partial.insert_text(CanonicalField::Phone, details.phone.as_deref());
    partial.insert_text(
        CanonicalField::Website,
        details.website.as_deref().or(details.web_url.as_deref()),
    );
    partial.insert_text(
        CanonicalField::Address,
        details
            .address_obj
            .as_ref()
            .and_then(|a| a.address_string.as_deref()),
    );

    if let Some(rating) = parse_number::<f64>("rating", details.rating.as_deref())? {
        partial.insert(CanonicalField::Rating, FieldValue::Number(rating));
    }
    if let Some(count) = parse_number::<u64>("num_reviews", details.num_reviews.as_deref())? {
        partial.insert(CanonicalField::ReviewCount, FieldValue::Count(count));
    }
    let lat = parse_number::<f64>("latitude", details.latitude.as_deref())?;
    let lng = parse_number::<f64>("longitude", details.longitude.as_deref())?;
    if let (Some(lat), Some(lng)) = (lat, lng) {
        partial.insert(
            CanonicalField::Coordinates,
            FieldValue::Coordinates(Coordinates { lat, lng }),
        );
    }

    let amenities: Vec<String> = details
        .amenities
        .iter()
        .map(|a| a.trim().to_lowercase().replace(' ', "_"))
        .collect();
    partial.extend_list(CanonicalField::Amenities, amenities);

    if let Some(description) = details.description.as_deref() {
        keywords::detect(description).apply(&mut partial);
    }
    for review in reviews {
        keywords::detect(&review.title).apply(&mut partial);
        keywords::detect(&review.text).apply(&mut partial);
    }

    Ok(partial)
}
