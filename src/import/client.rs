//! HTTP transport to the normalization backend.
//!
//! The dispatcher talks to the backend through [`BatchTransport`] so that the
//! retry state machine can be driven by a scripted fake in tests. The
//! production implementation is a thin wrapper around `reqwest`.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::config::ImportConfig;
use super::types::{ImportBatch, SanitizedLeadRecord};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Failures below the HTTP status layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Network(String),
    #[error("failed to build normalizer client: {0}")]
    Build(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// A fully serialized batch, ready to be (re)sent unchanged on every attempt.
#[derive(Debug, Clone)]
pub struct OutboundBatch {
    pub body: Vec<u8>,
    pub idempotency_key: String,
    pub record_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NormalizerRequest<'a> {
    leads: Vec<&'a SanitizedLeadRecord>,
    source_name: &'a str,
}

impl OutboundBatch {
    pub fn from_batch(batch: &ImportBatch) -> Result<Self, serde_json::Error> {
        let payload = NormalizerRequest {
            leads: batch.records().collect(),
            source_name: &batch.source_name,
        };

        Ok(Self {
            body: serde_json::to_vec(&payload)?,
            idempotency_key: idempotency_key(batch),
            record_count: batch.len(),
        })
    }
}

/// Stable per-batch key: identical for every retry of the same batch so a
/// backend that honours it can drop replays.
pub fn idempotency_key(batch: &ImportBatch) -> String {
    let mut hasher = Sha256::new();
    hasher.update(batch.source_name.as_bytes());
    for record in batch.records() {
        hasher.update([0u8]);
        hasher.update(record.email.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Raw backend response: status plus undecoded body.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[rocket::async_trait]
pub trait BatchTransport: Send + Sync {
    /// Perform one POST of the batch. Must be cancel-safe: dropping the
    /// future abandons the request.
    async fn send(&self, batch: &OutboundBatch) -> Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Clone)]
pub struct HttpBatchTransport {
    http: reqwest::Client,
    url: String,
    auth_token: Option<String>,
}

impl HttpBatchTransport {
    pub fn new(config: &ImportConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.retry.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("lead-import/0.1")
            .build()
            .map_err(|err| TransportError::Build(err.to_string()))?;

        Ok(Self {
            http,
            url: config.normalizer_url.clone(),
            auth_token: config.normalizer_auth_token.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[rocket::async_trait]
impl BatchTransport for HttpBatchTransport {
    async fn send(&self, batch: &OutboundBatch) -> Result<TransportResponse, TransportError> {
        let mut request = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(IDEMPOTENCY_KEY_HEADER, &batch.idempotency_key)
            .body(batch.body.clone());

        if let Some(token) = &self.auth_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}
