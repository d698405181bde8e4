use crate::frame::Orientation;
use thiserror::Error;

/// Boxed error source that can travel from the worker thread to the caller.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the segmentation pipeline.
///
/// `ModelLoad` is the only variant allowed to stop the pipeline from starting.
/// `Inference` is recoverable per frame. `ModelNotLoaded` and
/// `MaskDimensionMismatch` indicate wiring defects.
#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error("Failed to load {orientation} model: {reason}")]
    ModelLoad {
        orientation: Orientation,
        reason: String,
        #[source]
        source: BoxError,
    },

    #[error("{orientation} model used before it was loaded")]
    ModelNotLoaded { orientation: Orientation },

    #[error("Inference failed: {operation}")]
    Inference {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Mask is {actual:?} but frame is {expected:?}")]
    MaskDimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Worker error: {operation}")]
    Worker {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SegmentationError>;

impl SegmentationError {
    /// Builds an `Inference` error from a message alone.
    pub fn inference(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Inference {
            operation: operation.into(),
            source: detail.into().into(),
        }
    }

    /// Builds a `ModelLoad` error from a message alone.
    pub fn model_load(orientation: Orientation, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::ModelLoad {
            orientation,
            source: reason.clone().into(),
            reason,
        }
    }

    /// True for errors that can only come from incorrect wiring, never from frame data.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::ModelNotLoaded { .. } | Self::MaskDimensionMismatch { .. }
        )
    }
}

/// ONNX Runtime failures surface during model execution.
impl From<ort::Error> for SegmentationError {
    fn from(err: ort::Error) -> Self {
        Self::Inference {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ndarray::ShapeError> for SegmentationError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Inference {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violations_are_classified() {
        assert!(SegmentationError::ModelNotLoaded {
            orientation: Orientation::Portrait
        }
        .is_contract_violation());
        assert!(SegmentationError::MaskDimensionMismatch {
            expected: (4, 4),
            actual: (2, 2)
        }
        .is_contract_violation());
        assert!(!SegmentationError::inference("run", "boom").is_contract_violation());
    }

    #[test]
    fn model_load_message_names_orientation() {
        let err = SegmentationError::model_load(Orientation::Landscape, "truncated");
        assert_eq!(err.to_string(), "Failed to load landscape model: truncated");
    }
}
