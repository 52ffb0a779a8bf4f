use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("metadata cache unavailable")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("a metric info already exists for metric `{metric}`")]
    DuplicateMetricInfo { metric: String },
    #[error("metadata request timed out")]
    TimedOut,
    #[error("metadata coordinator unavailable")]
    Closed,
}

impl From<CacheError> for MetadataError {
    fn from(_: CacheError) -> Self {
        MetadataError::Closed
    }
}
