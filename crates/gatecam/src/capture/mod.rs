//! Capture backends.
//!
//! A camera's frames come from one of two kinds of source:
//! - a capture device with a persistent, non-thread-safe handle
//!   ([`CaptureDevice`], opened through a [`DeviceOpener`])
//! - a display, captured statelessly on every call ([`DisplayCapture`])
//!
//! Backends:
//! - synthetic test pattern (always available)
//! - V4L2 devices (feature: v4l2)
//! - screen capture (feature: screen)

#[cfg(feature = "screen")]
pub mod screen;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use crate::config::{BackendKind, CameraConfig, SourceSpec};
use crate::frame::RawFrame;
use crate::source::SourceKind;
use std::sync::Arc;
use thiserror::Error;

pub use synthetic::{SyntheticDisplay, SyntheticOpener};

/// Resolution used by generated sources when the config leaves it open
pub const DEFAULT_RESOLUTION: (u32, u32) = (640, 480);

/// Errors raised by capture backends
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("failed to open {0}: {1}")]
    Open(String, String),
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("empty frame")]
    EmptyFrame,
    #[error("{0} support not compiled in (enable the '{1}' feature)")]
    Unsupported(&'static str, &'static str),
}

/// An open capture handle. Not safe for concurrent use; callers serialize
/// access through [`crate::source::Source`].
pub trait CaptureDevice: Send {
    /// False once the device disconnected or was closed
    fn is_open(&self) -> bool;

    /// Blocking read of the next frame
    fn read(&mut self) -> Result<RawFrame, CaptureError>;

    /// Request a capture resolution; the device may pick the closest one
    fn set_resolution(&mut self, width: u32, height: u32);

    /// Resolution the device actually delivers
    fn resolution(&self) -> (u32, u32);

    fn close(&mut self);
}

/// Opens (and re-opens after a disconnect) a capture device
pub trait DeviceOpener: Send + Sync {
    /// Open and negotiate `resolution` in one go. A zero dimension means the
    /// opener's own default. The device may settle on the closest size it
    /// supports; callers read it back with [`CaptureDevice::resolution`].
    fn open(&self, resolution: (u32, u32)) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

impl<F> DeviceOpener for F
where
    F: Fn((u32, u32)) -> Result<Box<dyn CaptureDevice>, CaptureError> + Send + Sync,
{
    fn open(&self, resolution: (u32, u32)) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        self(resolution)
    }
}

/// Stateless screen capture
pub trait DisplayCapture: Send + Sync {
    /// Display bounds in pixels
    fn bounds(&self) -> Result<(u32, u32), CaptureError>;

    /// Capture the display. `Ok(None)` means a transient miss: no frame, no error.
    fn grab(&self) -> Result<Option<RawFrame>, CaptureError>;
}

/// Pick the backend for a camera entry
pub fn source_kind_for(config: &CameraConfig) -> Result<SourceKind, CaptureError> {
    let desired = desired_resolution(config);
    match (config.backend, config.source()) {
        (BackendKind::Synthetic, SourceSpec::Device(_)) => {
            Ok(SourceKind::Device(Arc::new(SyntheticOpener::new(desired))))
        }
        (BackendKind::Synthetic, SourceSpec::Display(_)) => {
            Ok(SourceKind::Display(Arc::new(SyntheticDisplay::new(desired))))
        }
        (BackendKind::Auto, SourceSpec::Device(index)) => device_backend(index, config),
        (BackendKind::Auto, SourceSpec::Display(index)) => display_backend(index),
    }
}

fn desired_resolution(config: &CameraConfig) -> (u32, u32) {
    if config.frame_width > 0 && config.frame_height > 0 {
        (config.frame_width, config.frame_height)
    } else {
        DEFAULT_RESOLUTION
    }
}

#[cfg(feature = "v4l2")]
fn device_backend(index: u32, config: &CameraConfig) -> Result<SourceKind, CaptureError> {
    Ok(SourceKind::Device(Arc::new(v4l2::V4l2Opener::new(
        index,
        config.frame_width,
        config.frame_height,
        config.frame_rate,
    ))))
}

#[cfg(not(feature = "v4l2"))]
fn device_backend(_index: u32, _config: &CameraConfig) -> Result<SourceKind, CaptureError> {
    Err(CaptureError::Unsupported("V4L2 capture", "v4l2"))
}

#[cfg(feature = "screen")]
fn display_backend(index: u32) -> Result<SourceKind, CaptureError> {
    Ok(SourceKind::Display(Arc::new(screen::ScreenCapture::new(
        index,
    )?)))
}

#[cfg(not(feature = "screen"))]
fn display_backend(_index: u32) -> Result<SourceKind, CaptureError> {
    Err(CaptureError::Unsupported("screen capture", "screen"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(yaml: &str) -> CameraConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_synthetic_device_backend() {
        let config = camera("{ name: gate, backend: synthetic, frame_width: 320, frame_height: 240 }");
        let kind = source_kind_for(&config).unwrap();
        let SourceKind::Device(opener) = kind else {
            panic!("expected a device source");
        };
        let mut device = opener.open((0, 0)).unwrap();
        assert!(device.is_open());
        assert_eq!(device.resolution(), (320, 240));
        assert_eq!(opener.open((64, 48)).unwrap().resolution(), (64, 48));
        let frame = device.read().unwrap();
        assert_eq!(frame.data.len(), frame.expected_len());
    }

    #[test]
    fn test_synthetic_display_backend() {
        let config = camera("{ name: desk, backend: synthetic, is_display: true }");
        let SourceKind::Display(display) = source_kind_for(&config).unwrap() else {
            panic!("expected a display source");
        };
        assert_eq!(display.bounds().unwrap(), DEFAULT_RESOLUTION);
        assert!(display.grab().unwrap().is_some());
    }

    #[cfg(not(feature = "v4l2"))]
    #[test]
    fn test_auto_device_without_v4l2() {
        let config = camera("{ name: gate, device: 0 }");
        assert!(matches!(
            source_kind_for(&config),
            Err(CaptureError::Unsupported(_, "v4l2"))
        ));
    }

    #[test]
    fn test_closure_opener() {
        let opener = |_: (u32, u32)| -> Result<Box<dyn CaptureDevice>, CaptureError> {
            Err(CaptureError::Open("mock".into(), "busy".into()))
        };
        assert!(opener.open((0, 0)).is_err());
    }
}
