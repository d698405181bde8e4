//! Drop-newest frame scheduler.
//!
//! Frames are handed to a single worker thread through a one-slot channel. A
//! frame arriving while the worker is busy is rejected on the spot, so the
//! capture path never blocks and at most one frame is ever in flight.

use crate::error::{Result, SegmentationError};
use crate::frame::Frame;
use crate::output::OutputSink;
use crate::segmentation::SegmentationPipeline;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Outcome of handing a frame to the scheduler.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Processing,
}

/// Snapshot of the scheduler's frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub accepted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
    pub sink_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    sink_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    /// `true` while a frame is in flight. Only ever set by a successful compare-exchange.
    busy: AtomicBool,
    cancelled: AtomicBool,
    idle_lock: Mutex<()>,
    idle: Condvar,
    counters: Counters,
}

impl Shared {
    fn finish_job(&self) {
        self.busy.store(false, Ordering::Release);
        let _guard = self.idle_lock.lock();
        self.idle.notify_all();
    }
}

/// Runs the segmentation pipeline on a dedicated worker, one frame at a time.
pub struct FrameScheduler {
    shared: Arc<Shared>,
    slot: Option<SyncSender<Frame>>,
    worker: Option<JoinHandle<()>>,
}

impl FrameScheduler {
    /// Start the worker thread. The pipeline and sink move onto it.
    pub fn spawn(pipeline: SegmentationPipeline, sink: impl OutputSink + 'static) -> Result<Self> {
        let (slot, inbox) = mpsc::sync_channel(1);
        let shared = Arc::new(Shared::default());

        let worker = thread::Builder::new()
            .name("segmentation-worker".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                let sink: Box<dyn OutputSink> = Box::new(sink);
                move || run_worker(inbox, shared, pipeline, sink)
            })
            .map_err(|e| SegmentationError::Worker {
                operation: "spawn segmentation worker".to_string(),
                source: e,
            })?;

        tracing::info!("Segmentation worker started");

        Ok(Self {
            shared,
            slot: Some(slot),
            worker: Some(worker),
        })
    }

    /// Offer a frame without blocking.
    ///
    /// The frame is accepted only if no other frame is in flight; otherwise it
    /// is dropped and the in-flight job is unaffected.
    pub fn submit(&self, frame: Frame) -> Submission {
        let shared = &self.shared;
        let Some(slot) = self.slot.as_ref() else {
            Counters::bump(&shared.counters.dropped);
            return Submission::Dropped;
        };

        if shared.cancelled.load(Ordering::Acquire)
            || shared
                .busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            Counters::bump(&shared.counters.dropped);
            tracing::trace!("Worker busy, dropping {} frame", frame.orientation());
            return Submission::Dropped;
        }

        match slot.try_send(frame) {
            Ok(()) => {
                Counters::bump(&shared.counters.accepted);
                Submission::Accepted
            }
            Err(TrySendError::Full(_)) => {
                // The slot is drained before the busy flag clears, so this means a wiring bug.
                tracing::error!("Hand-off slot occupied while worker idle, dropping frame");
                shared.finish_job();
                Counters::bump(&shared.counters.dropped);
                Submission::Dropped
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("Segmentation worker has stopped, dropping frame");
                shared.finish_job();
                Counters::bump(&shared.counters.dropped);
                Submission::Dropped
            }
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.shared.busy.load(Ordering::Acquire) {
            SchedulerState::Processing
        } else {
            SchedulerState::Idle
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state() == SchedulerState::Idle
    }

    /// Block until no frame is in flight or `timeout` elapses. Returns whether idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.idle_lock.lock();
        while self.shared.busy.load(Ordering::Acquire) {
            if self.shared.idle.wait_until(&mut guard, deadline).timed_out() {
                return !self.shared.busy.load(Ordering::Acquire);
            }
        }
        true
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.counters.snapshot()
    }

    /// Abandon the in-flight job, if any, without waiting for it.
    ///
    /// Its result is discarded when it completes and no further frames are accepted.
    pub fn cancel(&self) {
        if !self.shared.cancelled.swap(true, Ordering::AcqRel) {
            tracing::info!("Cancelling segmentation worker");
        }
    }

    /// Cancel, close the hand-off slot and wait for the worker to release its models.
    pub fn shutdown(mut self) -> SchedulerStats {
        self.stop();
        self.stats()
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.cancel();
        self.slot.take();
        if worker.join().is_err() {
            tracing::error!("Segmentation worker panicked during shutdown");
        }

        let stats = self.stats();
        tracing::info!(
            "Scheduler stopped: accepted={}, dropped={}, completed={}, failed={}, sink_errors={}",
            stats.accepted,
            stats.dropped,
            stats.completed,
            stats.failed,
            stats.sink_errors
        );
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Returns the scheduler to Idle when the current job ends, however it ends.
struct JobGuard<'a>(&'a Shared);

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.0.finish_job();
    }
}

fn run_worker(
    inbox: Receiver<Frame>,
    shared: Arc<Shared>,
    mut pipeline: SegmentationPipeline,
    mut sink: Box<dyn OutputSink>,
) {
    while let Ok(frame) = inbox.recv() {
        let _job = JobGuard(&shared);
        if shared.cancelled.load(Ordering::Acquire) {
            break;
        }

        let _span = tracing::debug_span!("frame", orientation = %frame.orientation()).entered();
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| pipeline.process(&frame)))
            .unwrap_or_else(|payload| {
                Err(SegmentationError::inference(
                    "model execution panicked",
                    panic_message(payload.as_ref()),
                ))
            });

        if shared.cancelled.load(Ordering::Acquire) {
            tracing::debug!("Discarding result of abandoned job");
            break;
        }

        match result {
            Ok(output) => {
                Counters::bump(&shared.counters.completed);
                tracing::debug!(
                    "Frame composited in {:.1}ms",
                    started.elapsed().as_secs_f64() * 1000.0
                );
                let written = panic::catch_unwind(AssertUnwindSafe(|| sink.write_frame(&output)))
                    .unwrap_or_else(|payload| {
                        Err(anyhow::anyhow!(
                            "sink panicked: {}",
                            panic_message(payload.as_ref())
                        ))
                    });
                if let Err(e) = written {
                    Counters::bump(&shared.counters.sink_errors);
                    tracing::warn!("Output sink failed: {:#}", e);
                }
            }
            Err(e) => {
                Counters::bump(&shared.counters.failed);
                if e.is_contract_violation() {
                    tracing::error!("Dropping {} frame: {}", frame.orientation(), e);
                } else {
                    tracing::warn!("Dropping {} frame: {}", frame.orientation(), e);
                }
            }
        }
    }

    pipeline.release();
    tracing::info!("Segmentation worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::frame::Orientation;
    use crate::mocks::{mock_model_bytes, ChannelSink, MockLoader, MockProbe};
    use crate::segmentation::{CompositedOutput, ModelRegistry, ModelSource};
    use image::RgbImage;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn scheduler(probe: &Arc<MockProbe>) -> (FrameScheduler, Receiver<CompositedOutput>) {
        let mut registry = ModelRegistry::new(MockLoader::new(0.1).with_probe(Arc::clone(probe)))
            .with_source(Orientation::Landscape, ModelSource::Bytes(mock_model_bytes(4, 2)));
        registry.load(Orientation::Landscape).unwrap();
        let pipeline =
            SegmentationPipeline::from_config(registry, &PipelineConfig::default()).unwrap();
        let (sink, outputs) = ChannelSink::channel();
        (FrameScheduler::spawn(pipeline, sink).unwrap(), outputs)
    }

    fn landscape() -> Frame {
        Frame::from_image(RgbImage::new(8, 4)).unwrap()
    }

    #[test]
    fn starts_idle() {
        let probe = MockProbe::new();
        let (scheduler, _outputs) = scheduler(&probe);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.stats(), SchedulerStats::default());
    }

    #[test]
    fn busy_worker_rejects_new_frames() {
        let probe = MockProbe::new();
        probe.hold();
        let (scheduler, outputs) = scheduler(&probe);

        assert_eq!(scheduler.submit(landscape()), Submission::Accepted);
        assert!(probe.wait_for_calls(1, TIMEOUT));
        assert_eq!(scheduler.state(), SchedulerState::Processing);
        assert_eq!(scheduler.submit(landscape()), Submission::Dropped);

        probe.release();
        assert!(outputs.recv_timeout(TIMEOUT).is_ok());
        assert!(scheduler.wait_idle(TIMEOUT));

        let stats = scheduler.stats();
        assert_eq!((stats.accepted, stats.dropped, stats.completed), (1, 1, 1));
    }

    #[test]
    fn cancelled_scheduler_drops_everything() {
        let probe = MockProbe::new();
        let (scheduler, _outputs) = scheduler(&probe);

        scheduler.cancel();
        assert_eq!(scheduler.submit(landscape()), Submission::Dropped);
        let stats = scheduler.shutdown();
        assert_eq!(stats.accepted, 0);
        assert!(probe.calls().is_empty());
    }

    #[test]
    fn panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
