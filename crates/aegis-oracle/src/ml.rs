//! ML threat-scoring oracle (§4.3): one production HTTP client plus a
//! deterministic mock for tests, registered behind the `MlModel` trait.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::features::FeatureVector;
use crate::OracleError;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MlScoreResponse {
    pub threat_score: f64,
    pub confidence: f64,
}

/// The ML oracle's contract distinguishes a transient failure (timeout,
/// connection refused, a non-2xx status) from a permanent one (the
/// response body doesn't match `MlScoreResponse`, i.e. a schema mismatch)
/// by returning `OracleError::SchemaMismatch` for the latter — the only
/// variant `score_event` treats as non-retryable (§4.3, §7).
#[async_trait]
pub trait MlModel: Send + Sync + std::fmt::Debug {
    async fn score(
        &self,
        model_version: &str,
        features: &FeatureVector,
    ) -> Result<MlScoreResponse, OracleError>;
}

/// Calls a scoring service exposing `POST {base_url}/v1/score`.
#[derive(Debug)]
pub struct HttpMlModel {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMlModel {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(3))
                .build()
                .expect("reqwest client builds"),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MlModel for HttpMlModel {
    async fn score(
        &self,
        model_version: &str,
        features: &FeatureVector,
    ) -> Result<MlScoreResponse, OracleError> {
        let url = format!("{}/v1/score", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model_version": model_version,
                "features": features,
            }))
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(format!("ml scoring request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OracleError::Unavailable(format!(
                "ml scoring service returned status {}",
                response.status()
            )));
        }

        response
            .json::<MlScoreResponse>()
            .await
            .map_err(|e| OracleError::SchemaMismatch(format!("ml scoring response was not valid json: {e}")))
    }
}

/// Failure modes a [`MockMlModel`] can simulate: a transient outage (to
/// exercise the degrade-on-exhaustion path) or a permanent schema
/// mismatch (to exercise the dead-letter path).
#[derive(Debug, Clone, Copy)]
enum MockFailure {
    Unavailable,
    SchemaMismatch,
}

/// In-memory scorer for tests: either returns a fixed score, or always
/// fails in one of the two ways the real oracle boundary can fail.
#[derive(Debug)]
pub struct MockMlModel {
    threat_score: f64,
    confidence: f64,
    failure: Option<MockFailure>,
    calls: AtomicU32,
}

impl MockMlModel {
    pub fn fixed(threat_score: f64, confidence: f64) -> Self {
        Self {
            threat_score,
            confidence,
            failure: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always_fails() -> Self {
        Self {
            threat_score: 0.0,
            confidence: 0.0,
            failure: Some(MockFailure::Unavailable),
            calls: AtomicU32::new(0),
        }
    }

    /// Always returns `OracleError::SchemaMismatch` — a permanent failure
    /// that `score_event` must route to the DLQ rather than retry.
    pub fn always_schema_mismatch() -> Self {
        Self {
            threat_score: 0.0,
            confidence: 0.0,
            failure: Some(MockFailure::SchemaMismatch),
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MlModel for MockMlModel {
    async fn score(
        &self,
        _model_version: &str,
        _features: &FeatureVector,
    ) -> Result<MlScoreResponse, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure {
            Some(MockFailure::Unavailable) => {
                return Err(OracleError::Unavailable("mock ml model unavailable".to_string()))
            }
            Some(MockFailure::SchemaMismatch) => {
                return Err(OracleError::SchemaMismatch("mock ml model returned a malformed body".to_string()))
            }
            None => {}
        }
        Ok(MlScoreResponse {
            threat_score: self.threat_score,
            confidence: self.confidence,
        })
    }
}
