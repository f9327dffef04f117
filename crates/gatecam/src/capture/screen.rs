//! Screen capture through `xcap`.
//!
//! Displays have no persistent handle: monitors are enumerated and captured on
//! every grab, so a display that was unplugged simply yields no frame.

use super::{CaptureError, DisplayCapture};
use crate::frame::RawFrame;
use std::sync::atomic::{AtomicU32, Ordering};
use xcap::Monitor;

pub struct ScreenCapture {
    index: u32,
    sequence: AtomicU32,
}

impl ScreenCapture {
    pub fn new(index: u32) -> Result<Self, CaptureError> {
        let capture = Self {
            index,
            sequence: AtomicU32::new(0),
        };
        // Fail bring-up early when the display does not exist.
        capture.monitor()?;
        Ok(capture)
    }

    fn monitor(&self) -> Result<Monitor, CaptureError> {
        let monitors = Monitor::all()
            .map_err(|e| CaptureError::Unavailable(format!("monitor enumeration: {}", e)))?;
        monitors.into_iter().nth(self.index as usize).ok_or_else(|| {
            CaptureError::Open(
                format!("display {}", self.index),
                "no such display".to_string(),
            )
        })
    }
}

impl DisplayCapture for ScreenCapture {
    fn bounds(&self) -> Result<(u32, u32), CaptureError> {
        let monitor = self.monitor()?;
        Ok((monitor.width(), monitor.height()))
    }

    fn grab(&self) -> Result<Option<RawFrame>, CaptureError> {
        let monitor = match self.monitor() {
            Ok(monitor) => monitor,
            Err(err) => {
                log::debug!("display {} unavailable: {}", self.index, err);
                return Ok(None);
            }
        };
        let image = match monitor.capture_image() {
            Ok(image) => image,
            Err(err) => {
                log::debug!("display {} capture failed: {}", self.index, err);
                return Ok(None);
            }
        };

        let (width, height) = (image.width(), image.height());
        let rgba = image.into_raw();
        let mut rgb = Vec::with_capacity(width as usize * height as usize * RawFrame::CHANNELS);
        for pixel in rgba.chunks_exact(4) {
            rgb.extend_from_slice(&pixel[..3]);
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(Some(RawFrame::new(rgb, width, height, sequence)))
    }
}
