use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("corrupt document {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("gave up writing {key} after {attempts} attempts")]
    RetriesExhausted { key: String, attempts: u32 },
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("collaborator unavailable: {0}")]
    Collaborator(#[from] anyhow::Error),
    #[error("trade not found: {0}")]
    NotFound(String),
}
