//! Best effort forwarding of calculated scores to an external http endpoint.
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::timestamp;

fn default_timeout_secs() -> u64 {
    5
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters of the score receiving endpoint.
pub struct ForwardParameters {
    /// Url the scores are posted to.
    pub url: String,
    /// Timeout for a single request in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Error)]
pub enum ForwardingError {
    #[error("could not send score: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("score endpoint answered with status {0}")]
    Status(StatusCode),
}

/// Body expected by receivers of the environmental monitoring scores.
#[derive(Serialize, Debug)]
struct ScoreMessage {
    environmental_scores: f64,
    #[serde(with = "timestamp")]
    measured_at: DateTime<Utc>,
}

pub struct Forwarder {
    client: Client,
    url: String,
}

impl Forwarder {
    pub fn new(params: &ForwardParameters) -> Result<Forwarder, ForwardingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(params.timeout_secs))
            .build()?;
        Ok(Forwarder {
            client,
            url: params.url.clone(),
        })
    }

    /// Posts a single score. Any non 2xx answer is an error.
    pub fn forward(&self, environmental_score: f64, measured_at: DateTime<Utc>) -> Result<(), ForwardingError> {
        let message = ScoreMessage {
            environmental_scores: environmental_score,
            measured_at,
        };
        let response = self.client.post(&self.url).json(&message).send()?;
        if !response.status().is_success() {
            return Err(ForwardingError::Status(response.status()));
        }
        log::debug!(target: "aqlogd::forward", "Forwarded score {} to '{}'", environmental_score, self.url);
        Ok(())
    }
}
