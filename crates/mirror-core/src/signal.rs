//! One-way "populate this subtree" signal to an external executor.
//!
//! Success means the executor accepted the request, nothing more.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulateRequest {
    pub source_id: String,
    pub destination_id: String,
    /// Human-readable name of the subtree, used by the executor for logging.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("Executor rejected request with status {0}")]
    Rejected(u16),

    #[error("Executor did not answer in time")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait CloneSignal: Send + Sync {
    async fn populate(&self, request: &PopulateRequest) -> Result<(), SignalError>;
}
