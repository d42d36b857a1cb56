use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("CACHE/IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("CACHE/CORRUPT: entry '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("CACHE/SERIALIZE: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<CacheError> for oit_core::OitError {
    fn from(err: CacheError) -> Self {
        oit_core::OitError::Cache(err.to_string())
    }
}
