use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HiveError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store operation timed out after {0:?}")]
    StoreTimeout(Duration),

    #[error("No nodes available in zone {zone}")]
    NoCandidateNodes { zone: String },

    #[error("Zone {zone} has {available} distinct nodes, {requested} requested")]
    InsufficientNodes {
        zone: String,
        requested: usize,
        available: usize,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Forwarding error: {0}")]
    Forward(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HiveError {
    /// True for connectivity failures of the shared store.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            HiveError::StoreUnavailable(_) | HiveError::StoreTimeout(_)
        )
    }
}

impl From<redis::RedisError> for HiveError {
    fn from(err: redis::RedisError) -> Self {
        HiveError::StoreUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HiveError>;
