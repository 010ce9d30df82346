//! Domain-level error taxonomy for paramsweep.
//!
//! Every variant here is fatal to a sweep: they are raised while loading a
//! tool definition or preparing its sweep, before any compute is provisioned.

use super::stage::Stage;

/// Errors produced while loading, validating, or rendering a tool definition.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("config parse error at `{field}`: {reason}")]
    ConfigParse { field: String, reason: String },

    #[error("invalid domain for parameter `{parameter}`: {reason}")]
    InvalidDomain { parameter: String, reason: String },

    #[error("{template} template references undeclared parameter `{placeholder}`")]
    UnknownPlaceholder { template: Stage, placeholder: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SweepError {
    pub(crate) fn parse(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SweepError::ConfigParse {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn domain(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        SweepError::InvalidDomain {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for paramsweep domain operations.
pub type Result<T> = std::result::Result<T, SweepError>;
