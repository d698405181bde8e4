use super::registry::ModelLoader;
use super::types::{SegmentationModel, TensorShape};
use crate::error::{Result, SegmentationError};
use crate::frame::Orientation;
use anyhow::Context;
use ndarray::{ArrayD, ArrayView4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;

/// Builds ONNX Runtime sessions from in-memory model artifacts.
#[derive(Debug, Clone, Copy)]
pub struct OnnxLoader {
    intra_threads: usize,
}

impl Default for OnnxLoader {
    fn default() -> Self {
        Self { intra_threads: 4 }
    }
}

impl OnnxLoader {
    pub fn new(intra_threads: usize) -> Self {
        Self {
            intra_threads: intra_threads.max(1),
        }
    }

    fn build_session(&self, bytes: &[u8]) -> anyhow::Result<Session> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.intra_threads)?
            .commit_from_memory(bytes)
            .context("Failed to parse model")?;
        Ok(session)
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&self, orientation: Orientation, bytes: &[u8]) -> Result<Box<dyn SegmentationModel>> {
        let session = self.build_session(bytes).map_err(|e| SegmentationError::ModelLoad {
            orientation,
            reason: "cannot build ONNX session".to_string(),
            source: e.into(),
        })?;

        let input_dims: Option<Vec<i64>> = session
            .inputs
            .first()
            .and_then(|i| i.input_type.tensor_shape())
            .map(|shape| shape.iter().copied().collect());
        let output_dims: Option<Vec<i64>> = session
            .outputs
            .first()
            .and_then(|o| o.output_type.tensor_shape())
            .map(|shape| shape.iter().copied().collect());

        let input = declared_shape(orientation, input_dims, "model input", 3)?;
        let output = declared_shape(orientation, output_dims, "model output", 1)?;

        tracing::debug!(
            "{} model declares input {:?} and output {:?}",
            orientation,
            input.dims(),
            output.dims()
        );

        Ok(Box::new(OnnxSegmenter {
            session: Mutex::new(session),
            input,
            output,
        }))
    }
}

fn declared_shape(
    orientation: Orientation,
    dims: Option<Vec<i64>>,
    what: &str,
    channels: u32,
) -> Result<TensorShape> {
    let dims = dims.ok_or_else(|| {
        SegmentationError::model_load(orientation, format!("{} is not a tensor", what))
    })?;
    TensorShape::parse(&dims, channels)
        .map_err(|reason| SegmentationError::model_load(orientation, format!("{}: {}", what, reason)))
}

/// A single-input, single-output segmentation network run through ONNX Runtime.
pub struct OnnxSegmenter {
    session: Mutex<Session>,
    input: TensorShape,
    output: TensorShape,
}

impl SegmentationModel for OnnxSegmenter {
    fn input_shape(&self) -> TensorShape {
        self.input
    }

    fn output_shape(&self) -> TensorShape {
        self.output
    }

    fn run(&self, input: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        let input = input.as_standard_layout();
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(&input)?])?;
        let scores = outputs[0].try_extract_array::<f32>()?.to_owned();
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_fail_to_load() {
        let result = OnnxLoader::default().load(Orientation::Portrait, b"not an onnx graph");
        assert!(matches!(
            result,
            Err(SegmentationError::ModelLoad {
                orientation: Orientation::Portrait,
                ..
            })
        ));
    }

    #[test]
    fn dynamic_spatial_dims_are_rejected() {
        let result = declared_shape(
            Orientation::Landscape,
            Some(vec![1, 3, -1, -1]),
            "model input",
            3,
        );
        assert!(matches!(result, Err(SegmentationError::ModelLoad { .. })));
        assert!(declared_shape(Orientation::Landscape, None, "model output", 1).is_err());
    }

    #[test]
    fn selfie_segmenter_shapes_parse() -> Result<()> {
        let input = declared_shape(
            Orientation::Portrait,
            Some(vec![1, 256, 256, 3]),
            "model input",
            3,
        )?;
        let output = declared_shape(
            Orientation::Portrait,
            Some(vec![1, 256, 256, 1]),
            "model output",
            1,
        )?;
        assert_eq!(input, TensorShape::nhwc(256, 256, 3));
        assert_eq!(output, TensorShape::nhwc(256, 256, 1));
        Ok(())
    }
}
