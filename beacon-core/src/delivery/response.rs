//! Ingest response interpretation
//!
//! Response body (all optional):
//!
//! ```json
//! {"message": "...", "detail": [{"msg": "...", "type": "..."}], "test": true}
//! ```
//!
//! `detail` is sometimes a plain string, so it is kept as a raw value.

use serde::Deserialize;
use serde_json::Value;

use crate::context::Environment;
use crate::diagnostics::is_success;
use crate::error::Error;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<Value>,
    #[serde(default)]
    pub test: Option<bool>,
}

impl IngestResponse {
    /// Parse a response body. Empty or non-JSON bodies yield `None`.
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.is_empty() {
            return None;
        }
        serde_json::from_slice(body).ok()
    }

    /// Environment hint. Absent `test` leaves the client environment alone.
    pub fn environment(&self) -> Option<Environment> {
        self.test.map(|test| {
            if test {
                Environment::Development
            } else {
                Environment::Production
            }
        })
    }

    /// Server message: `message`, else the detail string or first `detail[].msg`.
    pub fn message(&self) -> Option<String> {
        if let Some(message) = self.message.as_ref().filter(|m| !m.is_empty()) {
            return Some(message.clone());
        }
        match &self.detail {
            Some(Value::String(detail)) if !detail.is_empty() => Some(detail.clone()),
            Some(Value::Array(items)) => items
                .iter()
                .find_map(|item| item.get("msg").and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        }
    }
}

/// A response received for a dispatched event
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: u16,
    pub response: Option<IngestResponse>,
}

impl Completion {
    pub fn new(status: u16, body: &[u8]) -> Self {
        Self {
            status,
            response: IngestResponse::parse(body),
        }
    }

    pub fn environment(&self) -> Option<Environment> {
        self.response.as_ref().and_then(IngestResponse::environment)
    }

    /// Map the status to success or one of the delivery errors.
    pub fn outcome(&self, project: Option<&str>) -> std::result::Result<(), Error> {
        match self.status {
            status if is_success(status) => Ok(()),
            401 => Err(Error::Authorization),
            404 => Err(Error::NotFound {
                project: project.unwrap_or_default().to_string(),
            }),
            status => Err(Error::Server {
                status,
                message: self
                    .response
                    .as_ref()
                    .and_then(IngestResponse::message)
                    .unwrap_or_else(|| "Unknown".to_string()),
            }),
        }
    }
}
