use super::preprocess::Preprocessor;
use super::registry::ModelHandle;
use super::types::ScoreBuffer;
use crate::config::ResizePolicy;
use crate::error::{Result, SegmentationError};
use crate::frame::Frame;

/// Runs one model on one frame and returns scores on the frame's pixel grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct InferenceEngine {
    resize: ResizePolicy,
}

impl InferenceEngine {
    pub fn new(resize: ResizePolicy) -> Self {
        Self { resize }
    }

    /// Segment `frame` with `model`.
    ///
    /// The frame is resized to the model input when their resolutions differ and
    /// the resulting scores are resampled back, so the buffer always has one
    /// score in [0, 1] per frame pixel.
    pub fn infer(&self, frame: &Frame, model: &ModelHandle) -> Result<ScoreBuffer> {
        let _span = tracing::debug_span!("infer", orientation = %model.orientation()).entered();
        tracing::debug!(
            "Segmenting {}x{} {} frame with {} model",
            frame.width(),
            frame.height(),
            frame.orientation(),
            model.orientation()
        );

        let preprocessor = Preprocessor::new(model.input_shape(), self.resize);
        let input = preprocessor.preprocess(frame.image());

        let _infer_span = tracing::debug_span!("inference").entered();
        let raw = model.model().run(input.view())?;
        drop(_infer_span);

        let output = model.output_shape();
        if raw.len() != output.pixel_count() {
            return Err(SegmentationError::inference(
                "output extraction",
                format!(
                    "model produced {} values, expected {}x{}",
                    raw.len(),
                    output.width,
                    output.height
                ),
            ));
        }

        // Single-channel maps are row-major in both NCHW and NHWC.
        let scores: Vec<f32> = raw.iter().copied().collect();
        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            return Err(SegmentationError::inference(
                "output extraction",
                format!("model produced non-finite score {}", bad),
            ));
        }

        let scores = Preprocessor::new(output, self.resize).postprocess_scores(
            scores,
            frame.width(),
            frame.height(),
        )?;

        ScoreBuffer::new(frame.width(), frame.height(), scores)
    }
}
