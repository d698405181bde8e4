mod compositor;
mod engine;
mod onnx;
mod preprocess;
mod registry;
pub mod types;

pub use compositor::{CompositedOutput, MaskCompositor};
pub use engine::InferenceEngine;
pub use onnx::{OnnxLoader, OnnxSegmenter};
pub use preprocess::Preprocessor;
pub use registry::{ModelHandle, ModelLoader, ModelRegistry, ModelSource};
pub use types::{ScoreBuffer, SegmentationModel, TensorLayout, TensorShape};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::frame::Frame;

/// One full pass for a frame: select model, infer, threshold, composite.
pub struct SegmentationPipeline {
    registry: ModelRegistry,
    engine: InferenceEngine,
    compositor: MaskCompositor,
}

impl SegmentationPipeline {
    pub fn new(
        registry: ModelRegistry,
        engine: InferenceEngine,
        compositor: MaskCompositor,
    ) -> Self {
        Self {
            registry,
            engine,
            compositor,
        }
    }

    /// Build engine and compositor from `config` around an already loaded registry.
    pub fn from_config(registry: ModelRegistry, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            registry,
            InferenceEngine::new(config.resize),
            MaskCompositor::new(config.threshold)?,
        ))
    }

    pub fn process(&self, frame: &Frame) -> Result<CompositedOutput> {
        let model = self.registry.get(frame.orientation())?;
        let scores = self.engine.infer(frame, model)?;
        self.compositor.composite(frame, &scores)
    }

    /// Release every model handle.
    pub fn release(&mut self) {
        self.registry.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SegmentationError;
    use crate::frame::Orientation;
    use crate::mocks::{mock_model_bytes, MockLoader};
    use image::{Rgb, RgbImage};

    fn pipeline(fill: f32) -> SegmentationPipeline {
        let mut registry = ModelRegistry::new(MockLoader::new(fill))
            .with_source(Orientation::Portrait, ModelSource::Bytes(mock_model_bytes(2, 4)));
        registry.load(Orientation::Portrait).unwrap();
        SegmentationPipeline::from_config(registry, &PipelineConfig::default()).unwrap()
    }

    #[test]
    fn background_frame_becomes_transparent() -> Result<()> {
        let frame = Frame::from_image(RgbImage::from_pixel(3, 6, Rgb([9, 9, 9])))?;
        let output = pipeline(0.9).process(&frame)?;

        assert_eq!(output.dimensions(), (3, 6));
        assert_eq!(output.transparent_count(), 18);
        assert_eq!(output.orientation(), Orientation::Portrait);
        Ok(())
    }

    #[test]
    fn unloaded_orientation_is_reported() {
        let frame = Frame::from_image(RgbImage::new(6, 3)).unwrap();
        assert!(matches!(
            pipeline(0.1).process(&frame),
            Err(SegmentationError::ModelNotLoaded {
                orientation: Orientation::Landscape
            })
        ));
    }

    #[test]
    fn invalid_threshold_rejects_config() {
        let registry = ModelRegistry::new(MockLoader::new(0.0));
        let config = PipelineConfig {
            threshold: 2.0,
            ..PipelineConfig::default()
        };
        assert!(SegmentationPipeline::from_config(registry, &config).is_err());
    }
}
