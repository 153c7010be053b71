//! LLM deep-analysis oracle (§4.5): a production HTTP client and a
//! deterministic mock, registered behind the `LlmAnalyzer` trait.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;

#[async_trait]
pub trait LlmAnalyzer: Send + Sync + std::fmt::Debug {
    /// Send `prompt`, return the raw text completion. Parsing into an
    /// `AnalysisEnrichment` happens at the call site so the oracle stays
    /// agnostic to the response schema.
    async fn analyze(&self, prompt: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    text: String,
}

/// Calls a completion service exposing `POST {base_url}/v1/complete`.
#[derive(Debug)]
pub struct HttpLlmAnalyzer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLlmAnalyzer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(20))
                .build()
                .expect("reqwest client builds"),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LlmAnalyzer for HttpLlmAnalyzer {
    async fn analyze(&self, prompt: &str) -> anyhow::Result<String> {
        let url = format!("{}/v1/complete", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await
            .context("llm completion request failed")?;

        if !response.status().is_success() {
            bail!("llm completion service returned status {}", response.status());
        }

        let body: CompletionResponse = response
            .json()
            .await
            .context("llm completion response was not valid json")?;
        Ok(body.text)
    }
}

/// Deterministic analyzer for tests. Can respond with fixed text
/// (optionally after a short delay, to give a test a window to mutate
/// shared state while a `process()` call is in flight), fail, or
/// simulate a timeout by sleeping past the caller's deadline.
#[derive(Debug)]
pub enum MockLlmAnalyzer {
    Fixed(String),
    Delayed(String, std::time::Duration),
    AlwaysFails,
    AlwaysTimesOut,
}

impl MockLlmAnalyzer {
    pub fn fixed(text: impl Into<String>) -> Self {
        MockLlmAnalyzer::Fixed(text.into())
    }

    pub fn delayed(text: impl Into<String>, delay: std::time::Duration) -> Self {
        MockLlmAnalyzer::Delayed(text.into(), delay)
    }

    pub fn always_times_out() -> Self {
        MockLlmAnalyzer::AlwaysTimesOut
    }

    pub fn always_fails() -> Self {
        MockLlmAnalyzer::AlwaysFails
    }
}

#[async_trait]
impl LlmAnalyzer for MockLlmAnalyzer {
    async fn analyze(&self, _prompt: &str) -> anyhow::Result<String> {
        match self {
            MockLlmAnalyzer::Fixed(text) => Ok(text.clone()),
            MockLlmAnalyzer::Delayed(text, delay) => {
                tokio::time::sleep(*delay).await;
                Ok(text.clone())
            }
            MockLlmAnalyzer::AlwaysFails => bail!("mock llm analyzer unavailable"),
            MockLlmAnalyzer::AlwaysTimesOut => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                unreachable!("caller's timeout should fire first")
            }
        }
    }
}
