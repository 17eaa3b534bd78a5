//! External text services: transcript coherence and session narratives.
//!
//! The engine depends only on the [`CoherenceScorer`] and
//! [`NarrativeGenerator`] traits. Local deterministic implementations are
//! always available. HTTP clients are built with the `remote` feature.

use crate::core::risk::{fallback_narrative, Narrative, NarrativeRequest, RiskAssessment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Service error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Server returned an error response
    Server { status: u16, message: String },
    /// JSON serialization error
    Serialization(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Config(msg) => write!(f, "Service config error: {msg}"),
            ServiceError::Network(msg) => write!(f, "Service network error: {msg}"),
            ServiceError::Server { status, message } => {
                write!(f, "Service error ({status}): {message}")
            }
            ServiceError::Serialization(msg) => write!(f, "Service serialization error: {msg}"),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Scores how faithfully a transcript reproduces a prompt, 0-100.
pub trait CoherenceScorer {
    fn score(&self, transcript: &str, prompt: &str) -> Result<u8, ServiceError>;
}

/// Produces a short status narrative for a session.
pub trait NarrativeGenerator {
    fn generate(&self, request: &NarrativeRequest) -> Result<Narrative, ServiceError>;
}

fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Deterministic coherence: share of distinct prompt words recalled.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCoherence;

impl CoherenceScorer for LocalCoherence {
    fn score(&self, transcript: &str, prompt: &str) -> Result<u8, ServiceError> {
        let expected = words(prompt);
        if expected.is_empty() {
            return Err(ServiceError::Config("prompt contains no words".to_string()));
        }
        let spoken = words(transcript);
        let recalled = expected.intersection(&spoken).count();
        Ok((recalled * 100 / expected.len()) as u8)
    }
}

/// Narrative derived from the computed status alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalNarrative;

impl NarrativeGenerator for LocalNarrative {
    fn generate(&self, request: &NarrativeRequest) -> Result<Narrative, ServiceError> {
        let lowest_score = request.scores.values().copied().min().unwrap_or(100);
        let count = request.scores.len().max(1) as f64;
        let assessment = RiskAssessment {
            lowest_score,
            average_score: request.scores.values().map(|&s| f64::from(s)).sum::<f64>() / count,
            status: request.status,
            scores: request.scores.clone(),
        };
        Ok(fallback_narrative(&assessment))
    }
}

/// Remote service location.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL, e.g. `http://127.0.0.1:8700`
    pub base_url: String,
    /// Optional bearer token
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl ServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            timeout_secs: 10,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Read `NEURO_SCREEN_SERVICE_URL` and optional `NEURO_SCREEN_SERVICE_TOKEN`.
    pub fn from_env() -> Result<Self, ServiceError> {
        let url = std::env::var("NEURO_SCREEN_SERVICE_URL").map_err(|_| {
            ServiceError::Config("NEURO_SCREEN_SERVICE_URL is not set".to_string())
        })?;
        let config = Self::new(url);
        Ok(match std::env::var("NEURO_SCREEN_SERVICE_TOKEN") {
            Ok(token) if !token.trim().is_empty() => config.with_token(token.trim()),
            _ => config,
        })
    }

    pub fn coherence_url(&self) -> String {
        format!("{}/v1/coherence", self.base_url)
    }

    pub fn narrative_url(&self) -> String {
        format!("{}/v1/narrative", self.base_url)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

/// Body of a coherence request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceRequest {
    pub transcript: String,
    pub prompt: String,
    pub device_id: String,
}

/// Coherence service reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceResponse {
    pub score: f64,
}

/// Async client for the coherence and narrative services.
#[cfg(feature = "remote")]
pub struct ServiceClient {
    config: ServiceConfig,
    client: reqwest::Client,
    device_id: String,
}

#[cfg(feature = "remote")]
impl ServiceClient {
    /// Create a new service client.
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Config(format!("Failed to create HTTP client: {e}")))?;

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let device_id = format!(
            "screen-{}-{}",
            hostname,
            &uuid::Uuid::new_v4().to_string()[..8]
        );

        Ok(Self {
            config,
            client,
            device_id,
        })
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        let request = self.client.post(url);
        match self.config.token {
            Some(ref token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ServiceError::Server {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::Serialization(e.to_string()))
    }

    /// Test connection to the service.
    pub async fn test_connection(&self) -> Result<bool, ServiceError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    /// Ask the service to score a transcript against the prompt.
    pub async fn score_coherence(&self, transcript: &str, prompt: &str) -> Result<u8, ServiceError> {
        let body = CoherenceRequest {
            transcript: transcript.to_string(),
            prompt: prompt.to_string(),
            device_id: self.device_id.clone(),
        };
        let response = self
            .post(self.config.coherence_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let reply: CoherenceResponse = Self::read_json(response).await?;
        if !reply.score.is_finite() {
            return Err(ServiceError::Serialization(format!(
                "invalid coherence score {}",
                reply.score
            )));
        }
        Ok(reply.score.clamp(0.0, 100.0).round() as u8)
    }

    /// Ask the service for a narrative.
    pub async fn generate_narrative(
        &self,
        request: &NarrativeRequest,
    ) -> Result<Narrative, ServiceError> {
        let response = self
            .post(self.config.narrative_url())
            .json(request)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Self::read_json(response).await
    }

    /// Get the device ID.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Blocking service client for use in synchronous contexts.
#[cfg(feature = "remote")]
pub struct BlockingServiceClient {
    inner: ServiceClient,
    runtime: tokio::runtime::Runtime,
}

#[cfg(feature = "remote")]
impl BlockingServiceClient {
    /// Create a new blocking client.
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ServiceError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: ServiceClient::new(config)?,
            runtime,
        })
    }

    /// Create a new blocking client from the environment.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::new(ServiceConfig::from_env()?)
    }

    /// Test connection to the service.
    pub fn test_connection(&self) -> Result<bool, ServiceError> {
        self.runtime.block_on(self.inner.test_connection())
    }

    /// Get the device ID.
    pub fn device_id(&self) -> &str {
        self.inner.device_id()
    }
}

#[cfg(feature = "remote")]
impl CoherenceScorer for BlockingServiceClient {
    fn score(&self, transcript: &str, prompt: &str) -> Result<u8, ServiceError> {
        self.runtime
            .block_on(self.inner.score_coherence(transcript, prompt))
    }
}

#[cfg(feature = "remote")]
impl NarrativeGenerator for BlockingServiceClient {
    fn generate(&self, request: &NarrativeRequest) -> Result<Narrative, ServiceError> {
        self.runtime.block_on(self.inner.generate_narrative(request))
    }
}
