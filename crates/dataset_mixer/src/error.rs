use thiserror::Error;

/// Error type for pipeline construction failures.
///
/// Every variant is raised eagerly while the pipeline is being built, before the
/// first index is drawn. Iteration itself never produces a `SamplingError`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SamplingError {
    /// A per-dataset parameter list does not line up with the number of datasets.
    #[error("'{parameter}' has {actual} entries but there are {expected} datasets")]
    ConfigMismatch {
        parameter: &'static str,
        expected: usize,
        actual: usize,
    },
    /// An input dataset has no records (before or after filtering).
    #[error("dataset '{name}' (source {source_index}) is empty")]
    EmptyDataset { name: String, source_index: usize },
    /// A configured batch size cannot be used.
    #[error("invalid batch size {size}: {reason}")]
    InvalidBatchSize { size: usize, reason: String },
    /// Any other parameter that fails validation.
    #[error("invalid value for '{parameter}': {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },
}

impl SamplingError {
    pub(crate) fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter,
            reason: reason.into(),
        }
    }
}

/// Result alias used by construction-time APIs.
pub type Result<T> = std::result::Result<T, SamplingError>;
