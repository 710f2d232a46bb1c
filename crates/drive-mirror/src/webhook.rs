//! Executor signal over HTTP: POST the populate request as JSON and treat any
//! 2xx as accepted.

use std::time::Duration;

use async_trait::async_trait;
use mirror_core::{CloneSignal, PopulateRequest, SignalError};
use reqwest::Client;
use tracing::debug;

pub struct WebhookSignal {
    client: Client,
    url: String,
}

impl WebhookSignal {
    /// `timeout` bounds the whole request; the executor only has to accept.
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl CloneSignal for WebhookSignal {
    async fn populate(&self, request: &PopulateRequest) -> Result<(), SignalError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SignalError::Timeout
                } else {
                    SignalError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("Executor accepted {} with {}", request.label, status);
            Ok(())
        } else {
            Err(SignalError::Rejected(status.as_u16()))
        }
    }
}
