//! Generated test-pattern sources.
//!
//! Used for development without hardware and by the test suite. The pattern is
//! a diagonal gradient that shifts every frame so consecutive frames differ.

use super::{CaptureDevice, CaptureError, DeviceOpener, DisplayCapture};
use crate::frame::RawFrame;
use std::sync::atomic::{AtomicU32, Ordering};

fn generate_pattern(width: u32, height: u32, sequence: u32) -> RawFrame {
    let (w, h) = (width as usize, height as usize);
    let shift = sequence as usize;
    let mut data = vec![0u8; w * h * RawFrame::CHANNELS];
    for y in 0..h {
        for x in 0..w {
            let offset = (y * w + x) * RawFrame::CHANNELS;
            data[offset] = ((x + shift) % 256) as u8;
            data[offset + 1] = ((y + shift) % 256) as u8;
            data[offset + 2] = ((x + y) % 256) as u8;
        }
    }
    RawFrame::new(data, width, height, sequence)
}

/// Opens [`SyntheticDevice`] handles
#[derive(Debug, Clone)]
pub struct SyntheticOpener {
    resolution: (u32, u32),
}

impl SyntheticOpener {
    pub fn new(resolution: (u32, u32)) -> Self {
        Self { resolution }
    }
}

impl DeviceOpener for SyntheticOpener {
    fn open(&self, resolution: (u32, u32)) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let (width, height) = if resolution.0 > 0 && resolution.1 > 0 {
            resolution
        } else {
            self.resolution
        };
        log::debug!("Opening synthetic device {}x{}", width, height);
        Ok(Box::new(SyntheticDevice::new((width, height))))
    }
}

/// A capture device that is always connected
#[derive(Debug)]
pub struct SyntheticDevice {
    width: u32,
    height: u32,
    sequence: u32,
    open: bool,
}

impl SyntheticDevice {
    pub fn new((width, height): (u32, u32)) -> Self {
        Self {
            width,
            height,
            sequence: 0,
            open: true,
        }
    }
}

impl CaptureDevice for SyntheticDevice {
    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self) -> Result<RawFrame, CaptureError> {
        if !self.open {
            return Err(CaptureError::Unavailable("synthetic device closed".into()));
        }
        let frame = generate_pattern(self.width, self.height, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn set_resolution(&mut self, width: u32, height: u32) {
        if width > 0 {
            self.width = width;
        }
        if height > 0 {
            self.height = height;
        }
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// A display source producing the test pattern
#[derive(Debug)]
pub struct SyntheticDisplay {
    resolution: (u32, u32),
    sequence: AtomicU32,
}

impl SyntheticDisplay {
    pub fn new(resolution: (u32, u32)) -> Self {
        Self {
            resolution,
            sequence: AtomicU32::new(0),
        }
    }
}

impl DisplayCapture for SyntheticDisplay {
    fn bounds(&self) -> Result<(u32, u32), CaptureError> {
        Ok(self.resolution)
    }

    fn grab(&self) -> Result<Option<RawFrame>, CaptureError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(Some(generate_pattern(
            self.resolution.0,
            self.resolution.1,
            sequence,
        )))
    }
}
