//! Error types for the decide pipeline
//!
//! Configuration and shape errors recur deterministically and are never
//! retried. Device errors come from the compute backend and may succeed on a
//! later attempt; [`MindError::is_retryable`] tells the two apart.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the mind-rs library.
#[derive(Debug, Error)]
pub enum MindError {
    /// The capture stage never fired, or names no stage the model exposes.
    #[error("no activation captured for stage '{layer}'")]
    MissingActivation { layer: String },

    /// A vector or matrix width disagrees with what the consumer expects.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// Requested more top-k readings than the dictionary has features.
    #[error("top-k of {k} requested but the dictionary only has {d_sae} features")]
    InvalidTopK { k: usize, d_sae: usize },

    /// A required tensor is absent from a checkpoint.
    #[error("weight '{name}' not found")]
    MissingWeight { name: String },

    /// Refinement was requested but no capture layer is configured.
    #[error("activation capture is disabled: no capture layer configured")]
    CaptureDisabled,

    /// The request failed boundary validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The configuration is inconsistent or unreadable.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// The caller cancelled the request before generation finished.
    #[error("request cancelled")]
    Cancelled,

    /// Failure inside the tensor backend (allocation, kernel launch, transfer).
    #[error("device error: {0}")]
    Device(#[from] candle_core::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("model hub error: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),
}

impl MindError {
    /// Shorthand for a [`MindError::DimensionMismatch`].
    pub fn dimension(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Wrap an I/O failure with the path that caused it.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the same request may succeed if submitted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Device(_) | Self::Hub(_))
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, MindError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_activation_message() {
        let err = MindError::MissingActivation {
            layer: "layers.14.mlp.down_proj".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "no activation captured for stage 'layers.14.mlp.down_proj'"
        );
    }

    #[test]
    fn test_retry_policy() {
        assert!(!MindError::dimension("sae input", 2048, 4096).is_retryable());
        assert!(!MindError::CaptureDisabled.is_retryable());
        assert!(!MindError::Cancelled.is_retryable());
        let device = MindError::from(candle_core::Error::Msg("out of memory".into()));
        assert!(device.is_retryable());
    }
}
