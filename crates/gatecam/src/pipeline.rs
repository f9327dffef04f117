//! Per-mode production loop.

use crate::cache::{CacheSlot, FrameError};
use crate::config::ModeConfig;
use crate::detector::{filter_confident, ObjectDetector, DEFAULT_CONFIDENCE};
use crate::frame::Detection;
use crate::processor::FrameProcessor;
use crate::source::Source;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Producing,
    Exited,
}

/// Result of one tick
#[derive(Debug)]
pub(crate) enum Tick {
    Frame {
        bytes: Vec<u8>,
        detections: Option<Vec<Detection>>,
    },
    Failed(FrameError),
    /// No frame and no error; the slot is left untouched
    Skipped,
}

/// Acquire, detect and process one frame. Blocking.
pub(crate) fn produce(
    source: &Source,
    processor: &dyn FrameProcessor,
    mode: &ModeConfig,
    detector: Option<&dyn ObjectDetector>,
) -> Tick {
    let frame = match source.acquire() {
        Ok(Some(frame)) => frame,
        Ok(None) => return Tick::Skipped,
        Err(err) => return Tick::Failed(FrameError::Capture(err.to_string())),
    };

    let detections = detector.map(|detector| match detector.detect(&frame) {
        Ok(found) => filter_confident(found, DEFAULT_CONFIDENCE),
        Err(err) => {
            log::debug!("[{}] detection failed: {}", source.name(), err);
            Vec::new()
        }
    });

    match processor.process(&frame, mode, detections.as_deref().unwrap_or(&[])) {
        Ok(bytes) => Tick::Frame { bytes, detections },
        Err(err) => Tick::Failed(FrameError::Processing(err.to_string())),
    }
}

/// Drives one (camera, mode) pair until the camera's running flag drops
pub(crate) struct ModePipeline {
    pub mode: ModeConfig,
    pub source: Arc<Source>,
    pub processor: Arc<dyn FrameProcessor>,
    pub detector: Option<Arc<dyn ObjectDetector>>,
    pub detections: Arc<RwLock<Vec<Detection>>>,
    pub slot: Arc<CacheSlot>,
    pub running: Arc<AtomicBool>,
    pub state: watch::Sender<PipelineState>,
}

impl ModePipeline {
    /// Tick at the mode's frame rate. The flag is checked once per tick, so
    /// exit lags a stop by at most one interval. Overrunning ticks are not
    /// compensated; the next tick is simply delayed.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.mode.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.state.send_replace(PipelineState::Producing);
        log::debug!(
            "[{}] {} pipeline started at {} fps",
            self.source.name(),
            self.mode.kind,
            self.mode.frame_rate
        );

        loop {
            ticker.tick().await;
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            self.tick().await;
        }

        self.state.send_replace(PipelineState::Exited);
        log::debug!("[{}] {} pipeline exited", self.source.name(), self.mode.kind);
    }

    async fn tick(&self) {
        let source = self.source.clone();
        let processor = self.processor.clone();
        let detector = self.detector.clone();
        let mode = self.mode.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            produce(&source, &*processor, &mode, detector.as_deref())
        })
        .await;

        match outcome {
            Ok(Tick::Frame { bytes, detections }) => {
                if let Some(detections) = detections {
                    *self
                        .detections
                        .write()
                        .unwrap_or_else(PoisonError::into_inner) = detections;
                }
                self.slot.write(Ok(Bytes::from(bytes)));
            }
            Ok(Tick::Failed(err)) => {
                log::debug!("[{}] {} tick failed: {}", self.source.name(), self.mode.kind, err);
                self.slot.write(Err(err));
            }
            Ok(Tick::Skipped) => {}
            Err(err) => {
                log::error!("[{}] {} tick panicked: {}", self.source.name(), self.mode.kind, err);
                self.slot.write(Err(FrameError::Processing(err.to_string())));
            }
        }
    }
}
