//! HTTP transport for the scraping API.
//!
//! One physical call per `execute`: a bearer-authenticated POST carrying the
//! `{zone, url, format, country}` request document. Timeout enforcement and
//! retries belong to [`super::RetryingFetcher`]; this layer only reports what
//! the wire did.

use crate::config::UpstreamConfig;
use crate::error::EnrichmentError;
use crate::fetcher::{ScrapeRequest, ScrapeTransport, TransportError, TransportReply};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use std::time::Duration;

pub struct HttpScrapeTransport {
    client: reqwest::Client,
    endpoint: String,
    zone: String,
    api_token: String,
}

impl HttpScrapeTransport {
    pub fn new(upstream: &UpstreamConfig) -> Result<Self, EnrichmentError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EnrichmentError::TransportSetup(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: upstream.endpoint.clone(),
            zone: upstream.zone.clone(),
            api_token: upstream.api_token.clone(),
        })
    }
}

#[async_trait]
impl ScrapeTransport for HttpScrapeTransport {
    async fn execute(&self, request: &ScrapeRequest) -> Result<TransportReply, TransportError> {
        let payload = serde_json::json!({
            "zone": self.zone,
            "url": request.target_url,
            "format": "raw",
            "country": request.country,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    TransportError::InvalidRequest(e.to_string())
                } else {
                    TransportError::Connection(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(TransportReply {
            status,
            body,
            retry_after,
        })
    }
}
