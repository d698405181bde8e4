use crate::error::{Result, SegmentationError};
use image::RgbImage;
use std::fmt;

/// Capture orientation; selects which model variant segments a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub const ALL: [Orientation; 2] = [Orientation::Portrait, Orientation::Landscape];

    /// Taller-than-wide is portrait; square frames count as landscape.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if height > width {
            Self::Portrait
        } else {
            Self::Landscape
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Portrait => 0,
            Self::Landscape => 1,
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Portrait => f.write_str("portrait"),
            Self::Landscape => f.write_str("landscape"),
        }
    }
}

/// One captured image. The pixel buffer is owned and never mutated after capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
    orientation: Orientation,
}

impl Frame {
    pub fn new(image: RgbImage, orientation: Orientation) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(SegmentationError::InvalidFrame {
                reason: format!("frame has zero-sized dimensions {}x{}", width, height),
            });
        }
        Ok(Self { image, orientation })
    }

    /// Tags the frame from its own aspect ratio.
    pub fn from_image(image: RgbImage) -> Result<Self> {
        let orientation = Orientation::from_dimensions(image.width(), image.height());
        Self::new(image, orientation)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}
