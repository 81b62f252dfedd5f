//! Single-attempt delivery of one sample to the remote sink.
//!
//! A [`Deliverer`] never retries. Retry policy belongs to the scheduler and
//! the offline queue.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use crate::error::{AgentError, DeliveryError};
use crate::sample::Sample;

/// Acknowledgement of a stored sample.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeliveryReceipt {
    /// Key assigned by the sink, when it reports one.
    pub key: Option<String>,
}

/// Pushes one sample to the remote sink, keyed by agent id.
#[async_trait]
pub trait Deliverer: Send + Sync {
    /// Issue exactly one network attempt.
    async fn send(&self, agent_id: &str, sample: &Sample) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Run one attempt under a hard deadline.
pub async fn send_bounded(
    deliverer: &dyn Deliverer,
    agent_id: &str,
    sample: &Sample,
    budget: Duration,
) -> Result<DeliveryReceipt, DeliveryError> {
    match tokio::time::timeout(budget, deliverer.send(agent_id, sample)).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::Timeout(budget)),
    }
}

// ---------------------------------------------------------------------------
// HTTP push
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PushResponse {
    name: Option<String>,
}

/// Pushes samples as `POST {base}/{root}/{agent_id}.json`.
///
/// The sink answers `{"name": "<key>"}` with a server-assigned key.
#[derive(Debug, Clone)]
pub struct HttpDeliverer {
    client: reqwest::Client,
    base_url: reqwest::Url,
    root: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpDeliverer {
    /// Build a deliverer for `base_url` (e.g. `http://127.0.0.1:8043`).
    pub fn new(base_url: &str, root: &str, timeout: Duration) -> Result<Self, AgentError> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| AgentError::Config(format!("invalid sink url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(AgentError::Config(format!(
                "sink url '{base_url}' cannot carry a path"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            root: root.trim_matches('/').to_string(),
            auth_token: None,
            timeout,
        })
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    /// Endpoint for one agent.
    pub fn endpoint(&self, agent_id: &str) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            for part in self.root.split('/').filter(|p| !p.is_empty()) {
                segments.push(part);
            }
            segments.push(&format!("{agent_id}.json"));
        }
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        url
    }
}

#[async_trait]
impl Deliverer for HttpDeliverer {
    async fn send(&self, agent_id: &str, sample: &Sample) -> Result<DeliveryReceipt, DeliveryError> {
        let url = self.endpoint(agent_id);
        let resp = self
            .client
            .post(url)
            .json(sample)
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::RemoteRejected {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let key = match resp.json::<PushResponse>().await {
            Ok(body) => body.name,
            Err(e) => {
                debug!("sink acknowledged without a key: {e}");
                None
            }
        };
        Ok(DeliveryReceipt { key })
    }
}

fn classify(err: reqwest::Error, budget: Duration) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::Timeout(budget)
    } else {
        DeliveryError::Network(err.to_string())
    }
}
