//! Remediation effector (§4.6): executes a fixed `ActionKind` against
//! whatever system owns that action. A production implementation would
//! dispatch per-kind to IAM, security-group, or secrets-manager clients;
//! here we expose the trait and a deterministic mock.

use aegis_proto::ActionKind;
use anyhow::bail;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[async_trait]
pub trait Effector: Send + Sync + std::fmt::Debug {
    async fn execute(&self, event_id: &str, action: ActionKind) -> anyhow::Result<()>;
}

/// Dispatches each `ActionKind` to its own `reqwest`-backed remediation
/// endpoint on a shared control-plane host.
#[derive(Debug)]
pub struct HttpEffector {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEffector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client builds"),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Effector for HttpEffector {
    async fn execute(&self, event_id: &str, action: ActionKind) -> anyhow::Result<()> {
        let url = format!("{}/v1/actions/{}", self.base_url, action);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "event_id": event_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            bail!("effector returned status {}", response.status());
        }
        Ok(())
    }
}

/// Deterministic effector for tests: succeeds unconditionally, or fails
/// every call while counting attempts (used to assert the single-retry
/// behavior at the call site).
#[derive(Debug)]
pub enum MockEffector {
    AlwaysSucceeds,
    AlwaysFails(Arc<AtomicU32>),
}

impl MockEffector {
    pub fn always_succeeds() -> Self {
        MockEffector::AlwaysSucceeds
    }

    pub fn always_fails(counter: Arc<AtomicU32>) -> Self {
        MockEffector::AlwaysFails(counter)
    }
}

#[async_trait]
impl Effector for MockEffector {
    async fn execute(&self, _event_id: &str, _action: ActionKind) -> anyhow::Result<()> {
        match self {
            MockEffector::AlwaysSucceeds => Ok(()),
            MockEffector::AlwaysFails(counter) => {
                counter.fetch_add(1, Ordering::SeqCst);
                bail!("mock effector failed")
            }
        }
    }
}
