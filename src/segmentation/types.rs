use crate::error::{Result, SegmentationError};
use ndarray::{ArrayD, ArrayView4};

/// Memory layout of a 4-D image tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[batch, channels, height, width]`
    Nchw,
    /// `[batch, height, width, channels]`
    Nhwc,
}

/// Spatial shape of a model input or output, fixed at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub layout: TensorLayout,
}

impl TensorShape {
    pub const fn nchw(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
            layout: TensorLayout::Nchw,
        }
    }

    pub const fn nhwc(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
            layout: TensorLayout::Nhwc,
        }
    }

    /// Parses a declared tensor shape, expecting `channels` planes.
    ///
    /// Accepts `[N, C, H, W]`, `[N, H, W, C]` and, for single-channel tensors,
    /// `[N, H, W]`. The batch dimension may be dynamic (`-1`) but must otherwise be 1.
    pub fn parse(dims: &[i64], channels: u32) -> std::result::Result<Self, String> {
        let spatial = |h: i64, w: i64| -> std::result::Result<(u32, u32), String> {
            if h <= 0 || w <= 0 {
                return Err(format!("spatial dimensions must be fixed, got {:?}", dims));
            }
            let h = u32::try_from(h).map_err(|_| format!("height {} too large", h))?;
            let w = u32::try_from(w).map_err(|_| format!("width {} too large", w))?;
            Ok((w, h))
        };

        let batch = *dims.first().ok_or("tensor has no dimensions")?;
        if batch != 1 && batch != -1 {
            return Err(format!("batch dimension must be 1, got {}", batch));
        }

        let c = i64::from(channels);
        match *dims {
            [_, d1, d2, d3] if d3 == c => {
                let (width, height) = spatial(d1, d2)?;
                Ok(Self::nhwc(width, height, channels))
            }
            [_, d1, d2, d3] if d1 == c => {
                let (width, height) = spatial(d2, d3)?;
                Ok(Self::nchw(width, height, channels))
            }
            [_, d1, d2] if channels == 1 => {
                let (width, height) = spatial(d1, d2)?;
                Ok(Self::nchw(width, height, channels))
            }
            _ => Err(format!(
                "cannot find {} channel(s) in declared shape {:?}",
                channels, dims
            )),
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Full 4-D dimensions with a batch of one.
    pub fn dims(&self) -> [usize; 4] {
        let (c, h, w) = (
            self.channels as usize,
            self.height as usize,
            self.width as usize,
        );
        match self.layout {
            TensorLayout::Nchw => [1, c, h, w],
            TensorLayout::Nhwc => [1, h, w, c],
        }
    }
}

/// Trait for segmentation models
/// Allows swapping between different backends (ONNX Runtime, test doubles)
pub trait SegmentationModel: Send + Sync {
    /// Shape the model expects for its RGB input
    fn input_shape(&self) -> TensorShape;

    /// Shape of the single-channel score map the model produces
    fn output_shape(&self) -> TensorShape;

    /// Run the model on a preprocessed input tensor
    ///
    /// Returns the raw output tensor; values are not yet range-checked.
    fn run(&self, input: ArrayView4<f32>) -> Result<ArrayD<f32>>;
}

/// Per-pixel model score on a frame's pixel grid, row-major.
///
/// Every score lies in [0, 1]; values are clamped on construction. Pixels
/// scoring above the compositor threshold are removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBuffer {
    width: u32,
    height: u32,
    scores: Vec<f32>,
}

impl ScoreBuffer {
    pub fn new(width: u32, height: u32, mut scores: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if scores.len() != expected {
            // A flat buffer of the wrong length is reported as `len x 1`.
            return Err(SegmentationError::MaskDimensionMismatch {
                expected: (width, height),
                actual: (u32::try_from(scores.len()).unwrap_or(u32::MAX), 1),
            });
        }
        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            return Err(SegmentationError::inference(
                "score validation",
                format!("model produced non-finite score {}", bad),
            ));
        }
        for score in &mut scores {
            *score = score.clamp(0.0, 1.0);
        }
        Ok(Self {
            width,
            height,
            scores,
        })
    }

    /// A buffer where every pixel has the same score.
    pub fn filled(width: u32, height: u32, score: f32) -> Self {
        Self {
            width,
            height,
            scores: vec![score.clamp(0.0, 1.0); width as usize * height as usize],
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.scores
    }
}
