mod loopback;

pub use loopback::V4L2Output;

use crate::segmentation::CompositedOutput;
use anyhow::Result;

/// Trait for output destinations
///
/// Sinks are driven from the segmentation worker thread, so implementations
/// must be `Send`. A failed write is reported and the next frame still arrives.
pub trait OutputSink: Send {
    /// Write a composited frame to the output
    fn write_frame(&mut self, frame: &CompositedOutput) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}
