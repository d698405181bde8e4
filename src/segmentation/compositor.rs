use super::types::ScoreBuffer;
use crate::config::{validate_threshold, DEFAULT_THRESHOLD};
use crate::error::{Result, SegmentationError};
use crate::frame::{Frame, Orientation};
use image::{Rgb, RgbImage, RgbaImage};

const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

/// A background-removed frame. Same dimensions as its source frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositedOutput {
    image: RgbaImage,
    orientation: Orientation,
}

impl CompositedOutput {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn transparent_count(&self) -> usize {
        self.image.pixels().filter(|p| p.0[3] == 0).count()
    }

    /// Replace transparent pixels with `background`, for sinks without an alpha channel.
    pub fn flatten(&self, background: Rgb<u8>) -> RgbImage {
        let (width, height) = self.image.dimensions();
        RgbImage::from_fn(width, height, |x, y| {
            let [r, g, b, a] = self.image.get_pixel(x, y).0;
            if a == 0 {
                background
            } else {
                Rgb([r, g, b])
            }
        })
    }
}

/// Applies a thresholded score buffer to a frame.
///
/// A pixel whose score is strictly above the threshold becomes fully
/// transparent; every other pixel is copied from the source unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskCompositor {
    threshold: f32,
}

impl Default for MaskCompositor {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl MaskCompositor {
    pub fn new(threshold: f32) -> Result<Self> {
        validate_threshold(threshold)?;
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn composite(&self, frame: &Frame, scores: &ScoreBuffer) -> Result<CompositedOutput> {
        let _span = tracing::debug_span!("composite").entered();

        if scores.dimensions() != frame.dimensions() || scores.len() != frame.pixel_count() {
            return Err(SegmentationError::MaskDimensionMismatch {
                expected: frame.dimensions(),
                actual: scores.dimensions(),
            });
        }

        let pixels = frame
            .image()
            .pixels()
            .zip(scores.as_slice())
            .flat_map(|(&Rgb([r, g, b]), &score)| {
                if score > self.threshold {
                    TRANSPARENT
                } else {
                    [r, g, b, u8::MAX]
                }
            })
            .collect::<Vec<u8>>();

        let (width, height) = frame.dimensions();
        let image = RgbaImage::from_raw(width, height, pixels).ok_or(
            SegmentationError::MaskDimensionMismatch {
                expected: (width, height),
                actual: scores.dimensions(),
            },
        )?;

        Ok(CompositedOutput {
            image,
            orientation: frame.orientation(),
        })
    }
}
