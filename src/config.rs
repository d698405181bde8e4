use crate::error::{Result, SegmentationError};
use crate::frame::Orientation;
use clap::ValueEnum;
use image::imageops::FilterType;
use image::Rgb;

/// Default mask threshold. Scores strictly above it are treated as background.
///
/// Raising the threshold classifies fewer pixels as background (less aggressive
/// removal); lowering it removes more.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Chroma-key green used to fill removed pixels on opaque outputs.
pub const DEFAULT_BACKGROUND: Rgb<u8> = Rgb([0, 177, 64]);

/// How frames are resampled to the model input, and scores back to the frame grid.
///
/// Frames are stretched to the model resolution without letterboxing, so the
/// mapping back is the same filter applied in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ResizePolicy {
    Nearest,
    #[default]
    Bilinear,
}

impl ResizePolicy {
    pub fn filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
        }
    }
}

/// How captured frames are tagged with an orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OrientationMode {
    /// Derive from the frame's aspect ratio
    #[default]
    Auto,
    Portrait,
    Landscape,
}

impl OrientationMode {
    pub fn resolve(self, width: u32, height: u32) -> Orientation {
        match self {
            Self::Auto => Orientation::from_dimensions(width, height),
            Self::Portrait => Orientation::Portrait,
            Self::Landscape => Orientation::Landscape,
        }
    }
}

/// What to do when a model variant fails to load at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LoadPolicy {
    /// Refuse to start unless every configured variant loads
    #[default]
    Strict,
    /// Start with whatever loaded; frames for a missing variant are dropped
    Degraded,
}

/// Startup configuration for the segmentation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub threshold: f32,
    pub resize: ResizePolicy,
    pub orientation: OrientationMode,
    pub load_policy: LoadPolicy,
    pub background: Rgb<u8>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            resize: ResizePolicy::default(),
            orientation: OrientationMode::default(),
            load_policy: LoadPolicy::default(),
            background: DEFAULT_BACKGROUND,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.threshold)
    }
}

pub fn validate_threshold(threshold: f32) -> Result<()> {
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
        return Err(SegmentationError::Configuration {
            message: format!("threshold must be within [0, 1], got {}", threshold),
        });
    }
    Ok(())
}

/// Parses an `R,G,B` triple such as `0,177,64`.
pub fn parse_rgb(s: &str) -> std::result::Result<Rgb<u8>, String> {
    let parts = s
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("`{}` is not an R,G,B colour: {}", s, e))?;

    match parts.as_slice() {
        [r, g, b] => Ok(Rgb([*r, *g, *b])),
        _ => Err(format!(
            "`{}` is not an R,G,B colour: expected 3 components, got {}",
            s,
            parts.len()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.resize, ResizePolicy::Bilinear);
        assert_eq!(config.load_policy, LoadPolicy::Strict);
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        for threshold in [-0.1, 1.5, f32::NAN] {
            let config = PipelineConfig {
                threshold,
                ..PipelineConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(SegmentationError::Configuration { .. })
            ));
        }
    }

    #[test]
    fn parses_background_colour() {
        assert_eq!(parse_rgb("0,177,64"), Ok(Rgb([0, 177, 64])));
        assert_eq!(parse_rgb(" 255, 0 ,1"), Ok(Rgb([255, 0, 1])));
        assert!(parse_rgb("1,2").is_err());
        assert!(parse_rgb("1,2,300").is_err());
        assert!(parse_rgb("green").is_err());
    }

    #[test]
    fn orientation_mode_resolution() {
        assert_eq!(OrientationMode::Auto.resolve(480, 640), Orientation::Portrait);
        assert_eq!(OrientationMode::Auto.resolve(640, 480), Orientation::Landscape);
        assert_eq!(
            OrientationMode::Portrait.resolve(640, 480),
            Orientation::Portrait
        );
    }
}
