use thiserror::Error;

/// Reasons a notification's pipeline stops before acknowledgement.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("identifier {id} rejected by naming policy {pattern}")]
    Naming { id: String, pattern: String },

    #[error("download failed: {0:#}")]
    Download(anyhow::Error),

    #[error("split failed: {0:#}")]
    Split(anyhow::Error),

    #[error("convert failed: {0:#}")]
    Convert(anyhow::Error),

    #[error("destination already exists: {0}")]
    Overwrite(String),

    #[error("placement failed: {0:#}")]
    Placement(anyhow::Error),

    #[error("manifest failed: {0:#}")]
    Manifest(anyhow::Error),

    #[error("source delete failed: {0:#}")]
    SourceDelete(anyhow::Error),

    #[error("acknowledge failed: {0:#}")]
    Acknowledge(anyhow::Error),
}

/// Failure of a single HTTP exchange with the metadata service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Worth another attempt (timeouts, broken pipes, DNS, network down).
    #[error("transient transport error: {0}")]
    Transient(String),

    #[error("transport error: {0}")]
    Fatal(String),

    #[error("request returns HTTP {status}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}
