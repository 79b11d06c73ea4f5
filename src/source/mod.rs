//! Source clients
//!
//! Every external data source implements `SourceClient`. A client owns the
//! translation from its wire format into canonical fields and reports every
//! failure as a classified `SourceError`; pacing, retries, caching and
//! timeouts are applied around it by the orchestrator.

pub mod council;
pub mod keywords;
pub mod places;
pub mod reviews;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::error::{EnrichError, Result, SourceError};
use crate::types::{PartialEnrichment, RawRecord};

pub use council::CouncilScraper;
pub use places::PlacesClient;
pub use reviews::ReviewSiteClient;

/// A pluggable enrichment source
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Stable identifier, used for priority, cache keys and provenance
    fn source_id(&self) -> &'static str;

    /// Human-readable name
    fn source_name(&self) -> &'static str;

    /// HTTP requests issued by one `fetch` (search + details = 2)
    fn requests_per_fetch(&self) -> u32 {
        1
    }

    async fn fetch(&self, record: &RawRecord) -> std::result::Result<PartialEnrichment, SourceError>;
}

const USER_AGENT: &str = concat!("place-enrich/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client; the per-call timeout is enforced by the retry policy
pub(crate) fn build_http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(EnrichError::from)
}

/// Turn a non-success response into a classified error
async fn check_status(response: Response) -> std::result::Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();

    let err = SourceError::from_status(status, &body);
    Err(match retry_after {
        Some(delay) => err.with_retry_after(delay),
        None => err,
    })
}

/// GET a URL and decode its JSON body
pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &Client,
    url: url::Url,
) -> std::result::Result<T, SourceError> {
    let response = check_status(http.get(url).send().await?).await?;
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        SourceError::parse(format!(
            "Unexpected response shape ({}): {}",
            e,
            body.chars().take(200).collect::<String>()
        ))
    })
}

/// GET a URL and return its body as text
pub(crate) async fn get_text(
    http: &Client,
    url: url::Url,
) -> std::result::Result<String, SourceError> {
    let response = check_status(http.get(url).send().await?).await?;
    Ok(response.text().await?)
}
