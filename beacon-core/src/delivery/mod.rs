//! Event delivery to the ingestion endpoint
//!
//! Delivery is best-effort: one POST per event, no retries, no backoff and no
//! queueing. An event that fails to deliver is reported and dropped.
//!
//! ## Request
//!
//! ```text
//! POST <endpoint>
//! Content-Type: application/json
//! Authorization: Bearer <api_key>
//!
//! {"name": ..., "description": ..., "tags": [...], "project": ...,
//!  "user_id": ..., "channels": {...}, "meta": {...}}
//! ```

mod response;
mod transport;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::event::EventRecord;

pub use response::{Completion, IngestResponse};
pub use transport::{HttpTransport, OutboundRequest, Transport, TransportResponse};

/// Builds and sends ingest requests
pub struct Delivery {
    endpoint: String,
    api_key: Option<String>,
    project: Option<String>,
    timeout: Duration,
    transport: Arc<dyn Transport>,
}

impl Delivery {
    pub fn new(config: &IngestConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.resolved_api_key().map(str::to_string),
            project: config.resolved_project(),
            timeout: Duration::from_secs(config.timeout_secs),
            transport,
        }
    }

    /// Configured project, lowercased
    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Serialize `record` into a request.
    ///
    /// Fails with [`Error::ConfigurationMissing`] when no API key is configured
    /// and [`Error::Encoding`] when the record cannot be serialized.
    pub fn build_request(&self, record: &EventRecord) -> Result<OutboundRequest> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            Error::ConfigurationMissing(
                "API key is missing (set ingest.api_key or BEACON_API_KEY)".to_string(),
            )
        })?;
        let body = serde_json::to_vec(record).map_err(Error::Encoding)?;

        Ok(OutboundRequest {
            url: self.endpoint.clone(),
            api_key,
            body,
            timeout: self.timeout,
        })
    }

    /// Send a built request and wait for the response.
    pub async fn send(&self, request: OutboundRequest) -> Result<Completion> {
        let response = self.transport.send(request).await?;
        Ok(Completion::new(response.status, &response.body))
    }
}

/// Delivery counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Requests handed to the transport
    pub dispatched: usize,
    /// Requests acknowledged with 200/201
    pub delivered: usize,
    /// Requests that got an error status or no response
    pub failed: usize,
    /// Events rejected by the throttle
    pub throttled: usize,
    /// Events dropped before dispatch (schema, encoding, missing key)
    pub dropped: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    dispatched: AtomicUsize,
    delivered: AtomicUsize,
    failed: AtomicUsize,
    throttled: AtomicUsize,
    dropped: AtomicUsize,
}

impl StatsCounters {
    pub(crate) fn dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{compose, ComposeContext, EventOptions};
    use crate::system::{DeviceKind, SystemFacts, Theme};
    use async_trait::async_trait;
    use serde_json::Map;

    struct Fixed(u16, &'static str);

    #[async_trait]
    impl Transport for Fixed {
        async fn send(&self, _request: OutboundRequest) -> Result<TransportResponse> {
            Ok(TransportResponse {
                status: self.0,
                body: self.1.as_bytes().to_vec(),
            })
        }
    }

    fn record() -> EventRecord {
        let facts = SystemFacts {
            version: None,
            architecture: "Linux (x86_64)".to_string(),
            model: "Unknown".to_string(),
            os: "Linux 6".to_string(),
            device: DeviceKind::Unknown,
            theme: Theme::Light,
            locale: None,
        };
        compose(
            "signup",
            "user signed up",
            EventOptions::new(),
            ComposeContext {
                project: Some("acme"),
                user_traits: &Map::new(),
                facts: &facts,
            },
        )
        .unwrap()
    }

    fn config(api_key: Option<&str>) -> IngestConfig {
        IngestConfig {
            api_key: api_key.map(str::to_string),
            project: Some("Acme".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_request() {
        let delivery = Delivery::new(&config(Some("en_key")), Arc::new(Fixed(200, "")));
        let request = delivery.build_request(&record()).unwrap();

        assert_eq!(request.url, crate::config::DEFAULT_ENDPOINT);
        assert_eq!(request.api_key, "en_key");
        assert_eq!(request.timeout, Duration::from_secs(60));

        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["name"], "signup");
        assert_eq!(body["project"], "acme");
        assert_eq!(delivery.project(), Some("acme"));
    }

    #[test]
    fn test_missing_api_key() {
        let delivery = Delivery::new(&config(None), Arc::new(Fixed(200, "")));
        assert!(!delivery.has_api_key());
        let err = delivery.build_request(&record()).unwrap_err();
        assert!(matches!(err, Error::ConfigurationMissing(_)));
        assert_eq!(err.status(), 422);
    }

    #[tokio::test]
    async fn test_send_returns_completion() {
        let delivery = Delivery::new(
            &config(Some("k")),
            Arc::new(Fixed(404, r#"{"message": "no such project"}"#)),
        );
        let request = delivery.build_request(&record()).unwrap();
        let completion = delivery.send(request).await.unwrap();

        assert_eq!(completion.status, 404);
        let err = completion.outcome(delivery.project()).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = StatsCounters::default();
        stats.dispatched();
        stats.dispatched();
        stats.delivered();
        stats.throttled();
        assert_eq!(
            stats.snapshot(),
            DeliveryStats {
                dispatched: 2,
                delivered: 1,
                failed: 0,
                throttled: 1,
                dropped: 0,
            }
        );
    }
}
