//! Real-time background removal for webcam streams.
//!
//! Frames from a [`capture::CaptureSource`] are handed to a [`FrameScheduler`],
//! which runs them through a [`SegmentationPipeline`] on a single worker and
//! drops anything that arrives while a frame is in flight. Each pipeline pass
//! selects the portrait or landscape model by frame orientation, scores every
//! pixel and makes background pixels transparent.

pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod mocks;
pub mod output;
pub mod scheduler;
pub mod segmentation;

pub use config::{LoadPolicy, OrientationMode, PipelineConfig, ResizePolicy};
pub use error::{Result, SegmentationError};
pub use frame::{Frame, Orientation};
pub use scheduler::{FrameScheduler, SchedulerState, SchedulerStats, Submission};
pub use segmentation::{CompositedOutput, ModelRegistry, ModelSource, SegmentationPipeline};
