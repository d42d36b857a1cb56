//! Sync errors
use oit_cache::CacheError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("SYNC/OFFLINE: device is offline")]
    Offline,

    #[error("SYNC/NETWORK: {0}")]
    Network(String),

    #[error("SYNC/REJECTED: server answered {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("SYNC/DRIFT: {0}")]
    TemplateDrift(String),

    #[error("SYNC/MALFORMED: {0}")]
    Malformed(String),

    #[error("SYNC/FILE: cannot read staged file {path}: {reason}")]
    StagedFile { path: String, reason: String },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl SyncError {
    /// Failures that leave the record pending for the next trigger
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Offline | Self::Network(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<SyncError> for oit_core::OitError {
    fn from(err: SyncError) -> Self {
        oit_core::OitError::Sync(err.to_string())
    }
}
