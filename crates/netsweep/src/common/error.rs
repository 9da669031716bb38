use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    /// Every job of the first batch died right after launch; the run is
    /// aborted with a distinguished exit code.
    #[error("all first-batch launches failed")]
    AllLaunchesFailed,
}

impl From<serde_json::error::Error> for NetError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}
