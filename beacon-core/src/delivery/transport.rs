//! Transport seam: send bytes, get back a status code and a body
//!
//! [`HttpTransport`] is the production implementation over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::{Error, Result};

/// A fully built ingest request
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub api_key: String,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

/// Raw response to an [`OutboundRequest`]
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Delivers a request. Errors mean no response was obtained at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse>;
}

/// HTTP transport for the ingestion endpoint
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse> {
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", request.api_key))
            .map_err(|e| Error::ConfigurationMissing(format!("invalid api_key: {}", e)))?;

        let response = self
            .http_client
            .post(&request.url)
            .header(AUTHORIZATION, auth_value)
            .timeout(request.timeout)
            .body(request.body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        // A body we cannot read is treated as absent; the status still counts.
        let body = response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .unwrap_or_default();

        Ok(TransportResponse { status, body })
    }
}
