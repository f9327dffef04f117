//! A camera: one source feeding a pipeline and a cache slot per mode.
//!
//! Lifecycle is `NotStarted -> Running -> Stopped`. `Stopped` is terminal; a
//! stopped camera cannot be restarted, build a new one instead.

use crate::cache::{CacheSlot, ReadError, Snapshot};
use crate::capture::{self, CaptureError};
use crate::config::{CameraConfig, ConfigError, ModeConfig, ModeKind};
use crate::detector::ObjectDetector;
use crate::frame::Detection;
use crate::pipeline::{ModePipeline, PipelineState};
use crate::processor::FrameProcessor;
use crate::source::{Source, SourceKind};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("failed to initialise camera '{0}': {1}")]
    Init(String, #[source] CaptureError),
    #[error("invalid configuration for camera '{0}': {1}")]
    Config(String, #[source] ConfigError),
    #[error("camera '{0}' was stopped and cannot be restarted")]
    Stopped(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    NotStarted,
    Running,
    Stopped,
}

struct ModeEntry {
    config: ModeConfig,
    slot: Arc<CacheSlot>,
    state: watch::Sender<PipelineState>,
}

struct Control {
    lifecycle: Lifecycle,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Camera {
    name: String,
    order: Option<u32>,
    access_key_env: Option<String>,
    frame_rate: u32,
    source: Arc<Source>,
    modes: BTreeMap<ModeKind, ModeEntry>,
    processor: Arc<dyn FrameProcessor>,
    detector: Option<Arc<dyn ObjectDetector>>,
    detections: Arc<RwLock<Vec<Detection>>>,
    running: Arc<AtomicBool>,
    control: Mutex<Control>,
}

impl Camera {
    /// Build a camera with the backend selected by its configuration
    pub fn open(
        config: &CameraConfig,
        processor: Arc<dyn FrameProcessor>,
        detector: Option<Arc<dyn ObjectDetector>>,
    ) -> Result<Self, CameraError> {
        let kind = capture::source_kind_for(config)
            .map_err(|e| CameraError::Init(config.name.clone(), e))?;
        Self::new(config, kind, processor, detector)
    }

    /// Build a camera over an explicit source
    pub fn new(
        config: &CameraConfig,
        kind: SourceKind,
        processor: Arc<dyn FrameProcessor>,
        detector: Option<Arc<dyn ObjectDetector>>,
    ) -> Result<Self, CameraError> {
        config
            .validate()
            .map_err(|e| CameraError::Config(config.name.clone(), e))?;
        let desired = (config.frame_width, config.frame_height);
        let source = Source::open(config.name.clone(), kind, desired)
            .map_err(|e| CameraError::Init(config.name.clone(), e))?;
        let native = source
            .actual_resolution()
            .map_err(|e| CameraError::Init(config.name.clone(), e))?;

        let modes = config
            .resolve_modes(native)
            .into_iter()
            .map(|mode| {
                let (state, _) = watch::channel(PipelineState::Idle);
                let entry = ModeEntry {
                    config: mode,
                    slot: Arc::new(CacheSlot::new()),
                    state,
                };
                (entry.config.kind, entry)
            })
            .collect();

        let camera = Self {
            name: config.name.clone(),
            order: config.order,
            access_key_env: config.access_key_env.clone(),
            frame_rate: config.frame_rate,
            source: Arc::new(source),
            modes,
            processor,
            detector,
            detections: Arc::new(RwLock::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            control: Mutex::new(Control {
                lifecycle: Lifecycle::NotStarted,
                tasks: Vec::new(),
            }),
        };
        camera.log_summary(native);
        Ok(camera)
    }

    fn log_summary(&self, native: (u32, u32)) {
        log::info!(
            "Camera '{}' ({}{}): {} fps, {}x{}",
            self.name,
            self.source.kind().label(),
            self.order.map(|o| format!(", order {}", o)).unwrap_or_default(),
            self.frame_rate,
            native.0,
            native.1
        );
        for entry in self.modes.values() {
            let mode = &entry.config;
            log::info!(
                "  {}: {}x{} @ {} fps, rotate {}, flip {:?}, brightness {}, contrast {}, saturation {}, quality {}",
                mode.kind,
                mode.width,
                mode.height,
                mode.frame_rate,
                u16::from(mode.rotation),
                mode.flip,
                mode.brightness,
                mode.contrast,
                mode.saturation,
                mode.quality
            );
        }
        if self.modes.is_empty() {
            log::warn!("Camera '{}' has no modes configured", self.name);
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn one pipeline task per mode. Starting a running camera is a
    /// no-op; starting a stopped one is an error.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), CameraError> {
        let mut control = self.control();
        match control.lifecycle {
            Lifecycle::Running => return Ok(()),
            Lifecycle::Stopped => return Err(CameraError::Stopped(self.name.clone())),
            Lifecycle::NotStarted => {}
        }

        self.running.store(true, Ordering::Release);
        for entry in self.modes.values() {
            let pipeline = ModePipeline {
                mode: entry.config.clone(),
                source: self.source.clone(),
                processor: self.processor.clone(),
                detector: match entry.config.kind {
                    ModeKind::JpegStream => self.detector.clone(),
                    _ => None,
                },
                detections: self.detections.clone(),
                slot: entry.slot.clone(),
                running: self.running.clone(),
                state: entry.state.clone(),
            };
            control.tasks.push(tokio::spawn(pipeline.run()));
        }
        control.lifecycle = Lifecycle::Running;
        log::info!("Camera '{}' started {} mode(s)", self.name, self.modes.len());
        Ok(())
    }

    /// Stop producing and release the source. Returns false when the camera
    /// was already stopped.
    ///
    /// Pipelines notice on their next tick; a tick already in flight may
    /// finish but its result is discarded. Releasing the source waits for that
    /// tick's acquisition, so this can block for as long as the device read.
    pub fn stop(&self) -> bool {
        let mut control = self.control();
        if control.lifecycle == Lifecycle::Stopped {
            return false;
        }
        control.lifecycle = Lifecycle::Stopped;
        drop(control);

        self.running.store(false, Ordering::Release);
        for entry in self.modes.values() {
            entry.slot.seal();
        }
        self.source.release();
        log::info!("Camera '{}' stopped", self.name);
        true
    }

    /// Wait for every pipeline task to exit
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut self.control().tasks);
        for task in tasks {
            if let Err(e) = task.await {
                log::error!("Camera '{}' pipeline task error: {}", self.name, e);
            }
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.control().lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Latest frame produced for `mode`
    pub fn read_frame(&self, mode: ModeKind) -> Result<Bytes, ReadError> {
        self.modes
            .get(&mode)
            .ok_or(ReadError::UnknownMode(mode))?
            .slot
            .read()
            .into_result()
    }

    /// Follow a mode's slot; `None` when the mode is not configured
    pub fn subscribe(&self, mode: ModeKind) -> Option<watch::Receiver<Snapshot>> {
        self.modes.get(&mode).map(|entry| entry.slot.subscribe())
    }

    pub fn pipeline_state(&self, mode: ModeKind) -> Option<PipelineState> {
        self.modes.get(&mode).map(|entry| *entry.state.borrow())
    }

    pub fn mode_config(&self, mode: ModeKind) -> Option<&ModeConfig> {
        self.modes.get(&mode).map(|entry| &entry.config)
    }

    pub fn modes(&self) -> impl Iterator<Item = ModeKind> + '_ {
        self.modes.keys().copied()
    }

    /// Detections from the most recent stream frame
    pub fn detections(&self) -> Vec<Detection> {
        self.detections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_desired_resolution(&self, width: u32, height: u32) {
        self.source.set_desired_resolution(width, height);
    }

    pub fn actual_resolution(&self) -> Result<(u32, u32), CaptureError> {
        self.source.actual_resolution()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> Option<u32> {
        self.order
    }

    /// Access secret, read from the configured environment variable on every
    /// call. `None` when unset or empty.
    pub fn access_key(&self) -> Option<String> {
        read_secret(self.access_key_env.as_deref())
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn read_secret(env: Option<&str>) -> Option<String> {
    let value = std::env::var(env?).ok()?;
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
