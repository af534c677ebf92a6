//! Crate-level error type.

use crate::analysis::shape_inference::ShapeInferenceError;
use crate::runtime::backend::RuntimeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GanError>;

/// Errors surfaced by the builders, the composition check and model execution.
///
/// Every variant is returned to the caller immediately; nothing is retried or
/// patched up, since a malformed architecture has no useful fallback.
#[derive(Error, Debug)]
pub enum GanError {
    /// A non-positive or incompatible height/width/channels/latent size or layer setting.
    #[error("Invalid hyperparameter `{name}`: {reason}")]
    InvalidHyperparameter { name: String, reason: String },

    /// Two tensor interfaces disagree, or a layer would produce an empty feature map.
    #[error("Shape mismatch at {location}: {detail}")]
    ShapeMismatch { location: String, detail: String },

    /// The numerical backend rejected its configuration.
    #[error("Backend configuration rejected: {0}")]
    BackendConfiguration(String),

    #[error("Graph analysis failed: {0}")]
    ShapeInference(#[from] ShapeInferenceError),

    #[error("Graph execution failed: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Malformed configuration: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GanError {
    pub(crate) fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        GanError::InvalidHyperparameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape_mismatch(location: impl Into<String>, detail: impl Into<String>) -> Self {
        GanError::ShapeMismatch {
            location: location.into(),
            detail: detail.into(),
        }
    }
}
