use super::types::{TensorLayout, TensorShape};
use crate::config::ResizePolicy;
use crate::error::{Result, SegmentationError};
use image::{imageops, ImageBuffer, Luma, RgbImage};
use ndarray::Array4;
use std::borrow::Cow;

/// Preprocessor for converting RGB frames to model input tensors
pub struct Preprocessor {
    target: TensorShape,
    resize: ResizePolicy,
}

impl Preprocessor {
    pub fn new(target: TensorShape, resize: ResizePolicy) -> Self {
        Self { target, resize }
    }

    /// Preprocess an RGB image into a normalized tensor
    ///
    /// Steps:
    /// 1. Stretch to the model's input resolution (no letterbox)
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Lay out as NCHW or NHWC, matching the model
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let (width, height) = (self.target.width, self.target.height);
        let resized = if image.dimensions() != (width, height) {
            Cow::Owned(imageops::resize(
                image,
                width,
                height,
                self.resize.filter(),
            ))
        } else {
            Cow::Borrowed(image)
        };

        let [_, d1, d2, d3] = self.target.dims();
        let mut tensor = Array4::<f32>::zeros((1, d1, d2, d3));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for (c, &value) in pixel.0.iter().enumerate() {
                let value = value as f32 / 255.0;
                match self.target.layout {
                    TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                    TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                }
            }
        }

        tensor
    }

    /// Map a score map at model resolution back onto the frame's pixel grid
    ///
    /// Uses the same filter as the forward resize. Returns row-major scores.
    pub fn postprocess_scores(
        &self,
        scores: Vec<f32>,
        target_width: u32,
        target_height: u32,
    ) -> Result<Vec<f32>> {
        let _span = tracing::debug_span!("postprocess").entered();

        let (width, height) = (self.target.width, self.target.height);
        if (width, height) == (target_width, target_height) {
            return Ok(scores);
        }

        let len = scores.len();
        let map = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(width, height, scores).ok_or_else(
            || SegmentationError::inference(
                "score resampling",
                format!("{} scores do not fill a {}x{} map", len, width, height),
            ),
        )?;

        Ok(imageops::resize(&map, target_width, target_height, self.resize.filter()).into_raw())
    }
}
