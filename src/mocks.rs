//! Test doubles for the model, loader and output sink seams.

use crate::error::{Result, SegmentationError};
use crate::frame::Orientation;
use crate::output::OutputSink;
use crate::segmentation::{CompositedOutput, ModelLoader, SegmentationModel, TensorShape};
use ndarray::{ArrayD, ArrayView4, IxDyn};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Serializes a mock model artifact: little-endian width then height.
pub fn mock_model_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8);
    bytes.extend_from_slice(&width.to_le_bytes());
    bytes.extend_from_slice(&height.to_le_bytes());
    bytes
}

#[derive(Debug, Default)]
struct ProbeState {
    calls: Vec<Orientation>,
    failing: HashSet<usize>,
    held: bool,
}

/// Shared observer of mock model runs.
///
/// Records which orientation served each call, can hold callers inside `run`
/// until released, and can fail selected calls by index.
#[derive(Debug, Default)]
pub struct MockProbe {
    state: Mutex<ProbeState>,
    changed: Condvar,
}

impl MockProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the `index`-th call (zero-based, across all models) fail.
    pub fn fail_call(&self, index: usize) {
        self.state.lock().failing.insert(index);
    }

    /// Block subsequent runs until `release` is called.
    pub fn hold(&self) {
        self.state.lock().held = true;
    }

    pub fn release(&self) {
        self.state.lock().held = false;
        self.changed.notify_all();
    }

    pub fn calls(&self) -> Vec<Orientation> {
        self.state.lock().calls.clone()
    }

    /// Wait until at least `count` runs have started.
    pub fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.calls.len() < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.calls.len() >= count;
            }
        }
        true
    }

    fn enter(&self, orientation: Orientation) -> Result<()> {
        let mut state = self.state.lock();
        let index = state.calls.len();
        state.calls.push(orientation);
        self.changed.notify_all();

        while state.held {
            self.changed.wait(&mut state);
        }

        if state.failing.contains(&index) {
            return Err(SegmentationError::inference(
                "mock run",
                format!("forced failure on call {}", index),
            ));
        }
        Ok(())
    }
}

/// Mock model that returns a constant score map
pub struct MockSegmentationModel {
    orientation: Orientation,
    input: TensorShape,
    output: TensorShape,
    fill: f32,
    probe: Arc<MockProbe>,
}

impl MockSegmentationModel {
    pub fn new(orientation: Orientation, width: u32, height: u32, fill: f32) -> Self {
        Self {
            orientation,
            input: TensorShape::nchw(width, height, 3),
            output: TensorShape::nchw(width, height, 1),
            fill,
            probe: MockProbe::new(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<MockProbe>) -> Self {
        self.probe = probe;
        self
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn input_shape(&self) -> TensorShape {
        self.input
    }

    fn output_shape(&self) -> TensorShape {
        self.output
    }

    fn run(&self, input: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        if input.shape() != self.input.dims() {
            return Err(SegmentationError::inference(
                "mock run",
                format!("unexpected input shape {:?}", input.shape()),
            ));
        }
        self.probe.enter(self.orientation)?;
        Ok(ArrayD::from_elem(IxDyn(&self.output.dims()), self.fill))
    }
}

/// Loader for artifacts produced by [`mock_model_bytes`].
#[derive(Debug, Clone)]
pub struct MockLoader {
    fill: f32,
    probe: Arc<MockProbe>,
}

impl MockLoader {
    pub fn new(fill: f32) -> Self {
        Self {
            fill,
            probe: MockProbe::new(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<MockProbe>) -> Self {
        self.probe = probe;
        self
    }
}

impl ModelLoader for MockLoader {
    fn load(&self, orientation: Orientation, bytes: &[u8]) -> Result<Box<dyn SegmentationModel>> {
        let header: [u8; 8] = bytes
            .get(..8)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| {
                SegmentationError::model_load(
                    orientation,
                    format!("truncated header: {} of 8 bytes", bytes.len()),
                )
            })?;

        let width = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let height = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let dims = [1, 3, i64::from(height), i64::from(width)];
        TensorShape::parse(&dims, 3)
            .map_err(|reason| SegmentationError::model_load(orientation, reason))?;

        Ok(Box::new(
            MockSegmentationModel::new(orientation, width, height, self.fill)
                .with_probe(Arc::clone(&self.probe)),
        ))
    }
}

/// Output sink that forwards every frame to a channel.
pub struct ChannelSink {
    sender: Sender<CompositedOutput>,
    failures_left: usize,
}

impl ChannelSink {
    pub fn channel() -> (Self, Receiver<CompositedOutput>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender,
                failures_left: 0,
            },
            receiver,
        )
    }

    /// Fail the first `count` writes, as if the display surface went away.
    pub fn failing_first(mut self, count: usize) -> Self {
        self.failures_left = count;
        self
    }
}

impl OutputSink for ChannelSink {
    fn write_frame(&mut self, frame: &CompositedOutput) -> anyhow::Result<()> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            anyhow::bail!("display surface unavailable");
        }
        self.sender
            .send(frame.clone())
            .map_err(|_| anyhow::anyhow!("receiver dropped"))
    }

    fn resolution(&self) -> (u32, u32) {
        (0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_parses_header() -> Result<()> {
        let model = MockLoader::new(0.3).load(Orientation::Portrait, &mock_model_bytes(16, 32))?;
        assert_eq!(model.input_shape(), TensorShape::nchw(16, 32, 3));
        assert_eq!(model.output_shape(), TensorShape::nchw(16, 32, 1));
        Ok(())
    }

    #[test]
    fn loader_rejects_bad_artifacts() {
        let loader = MockLoader::new(0.0);
        assert!(loader.load(Orientation::Portrait, &[0; 7]).is_err());
        assert!(loader
            .load(Orientation::Portrait, &mock_model_bytes(0, 4))
            .is_err());
    }

    #[test]
    fn probe_fails_selected_call() {
        let probe = MockProbe::new();
        probe.fail_call(1);
        let model = MockSegmentationModel::new(Orientation::Landscape, 2, 2, 0.0)
            .with_probe(Arc::clone(&probe));
        let input = ndarray::Array4::<f32>::zeros((1, 3, 2, 2));

        assert!(model.run(input.view()).is_ok());
        assert!(model.run(input.view()).is_err());
        assert!(model.run(input.view()).is_ok());
        assert_eq!(probe.calls().len(), 3);
    }
}
