use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("no data for unit {unit}: {detail}")]
    DataUnavailable { unit: String, detail: String },
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("computation failed: {0}")]
    ComputationFailure(String),
}

impl EngineError {
    pub fn data_unavailable(unit: impl Into<String>, detail: impl Into<String>) -> Self {
        EngineError::DataUnavailable {
            unit: unit.into(),
            detail: detail.into(),
        }
    }

    pub fn invalid_parameters(detail: impl Into<String>) -> Self {
        EngineError::InvalidParameters(detail.into())
    }

    pub fn computation_failure(detail: impl Into<String>) -> Self {
        EngineError::ComputationFailure(detail.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::DataUnavailable { .. } => "data-unavailable",
            EngineError::InvalidParameters(_) => "invalid-parameters",
            EngineError::ComputationFailure(_) => "computation-failure",
        }
    }
}
