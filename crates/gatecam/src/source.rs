//! Exclusive owner of a camera's capture handle.
//!
//! Every mode pipeline of a camera acquires frames through the same [`Source`].
//! The handle is not safe for concurrent use, so all access goes through one
//! lock: one grab at a time, recovery included. Nothing else may touch the
//! handle or its open state.

use crate::capture::{CaptureDevice, CaptureError, DeviceOpener, DisplayCapture};
use crate::frame::RawFrame;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Where a source gets its frames
#[derive(Clone)]
pub enum SourceKind {
    /// Persistent device handle, reopened through the opener on disconnect
    Device(Arc<dyn DeviceOpener>),
    /// Stateless screen capture
    Display(Arc<dyn DisplayCapture>),
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Device(_) => "device",
            SourceKind::Display(_) => "display",
        }
    }
}

struct SourceState {
    handle: Option<Box<dyn CaptureDevice>>,
    desired: (u32, u32),
    released: bool,
}

pub struct Source {
    name: String,
    kind: SourceKind,
    state: Mutex<SourceState>,
}

impl Source {
    /// Open the source once. A device that cannot be opened here fails the
    /// whole camera; later disconnects are recovered by [`Source::acquire`].
    pub fn open(
        name: impl Into<String>,
        kind: SourceKind,
        desired: (u32, u32),
    ) -> Result<Self, CaptureError> {
        let name = name.into();
        let handle = match &kind {
            SourceKind::Device(opener) => Some(connect(opener.as_ref(), desired)?),
            SourceKind::Display(display) => {
                let (w, h) = display.bounds()?;
                log::debug!("[{}] display bounds {}x{}", name, w, h);
                None
            }
        };
        Ok(Self {
            name,
            kind,
            state: Mutex::new(SourceState {
                handle,
                desired,
                released: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn is_display(&self) -> bool {
        matches!(self.kind, SourceKind::Display(_))
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Grab one frame.
    ///
    /// `Ok(None)` means no frame this tick: the source was released, a
    /// reconnect failed, or a display capture missed. Read failures on an open
    /// handle are returned as errors.
    pub fn acquire(&self) -> Result<Option<RawFrame>, CaptureError> {
        let mut state = self.lock();
        if state.released {
            return Ok(None);
        }

        match &self.kind {
            SourceKind::Display(display) => display.grab(),
            SourceKind::Device(opener) => {
                if !state.handle.as_ref().is_some_and(|h| h.is_open()) {
                    if let Some(mut stale) = state.handle.take() {
                        stale.close();
                    }
                    log::warn!("[{}] capture device closed, reconnecting", self.name);
                    match connect(opener.as_ref(), state.desired) {
                        Ok(handle) => {
                            log::info!("[{}] capture device reconnected", self.name);
                            state.handle = Some(handle);
                        }
                        Err(err) => {
                            log::error!("[{}] reconnect failed: {}", self.name, err);
                            return Ok(None);
                        }
                    }
                }
                match state.handle.as_mut() {
                    Some(handle) => handle.read().map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    /// Close the handle. Returns false when the source was already released.
    pub fn release(&self) -> bool {
        let mut state = self.lock();
        if state.released {
            return false;
        }
        state.released = true;
        if let Some(mut handle) = state.handle.take() {
            handle.close();
            log::debug!("[{}] capture device released", self.name);
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    /// Request a capture resolution, also applied on every reconnect.
    /// Displays always capture at their bounds.
    pub fn set_desired_resolution(&self, width: u32, height: u32) {
        if self.is_display() {
            log::debug!("[{}] resolution is fixed by the display", self.name);
            return;
        }
        let mut state = self.lock();
        state.desired = (width, height);
        if let Some(handle) = state.handle.as_mut() {
            handle.set_resolution(width, height);
        }
    }

    /// Negotiated capture resolution, or the display bounds for displays
    pub fn actual_resolution(&self) -> Result<(u32, u32), CaptureError> {
        match &self.kind {
            SourceKind::Display(display) => display.bounds(),
            SourceKind::Device(_) => self
                .lock()
                .handle
                .as_ref()
                .map(|h| h.resolution())
                .ok_or_else(|| CaptureError::Unavailable(format!("{} not connected", self.name))),
        }
    }
}

/// Open with the desired resolution negotiated by the opener. A device that
/// settles on another size is kept as is; it is not reopened.
fn connect(
    opener: &dyn DeviceOpener,
    desired: (u32, u32),
) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    opener.open(desired)
}
