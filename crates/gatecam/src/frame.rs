use std::time::SystemTime;

/// A decoded frame in packed RGB8 layout, as delivered by a capture backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture sequence number, monotonically increasing per source
    pub sequence: u32,
}

impl RawFrame {
    pub const CHANNELS: usize = 3;

    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
        }
    }

    /// A frame filled with one color
    pub fn solid(width: u32, height: u32, rgb: [u8; 3], sequence: u32) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * Self::CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height, sequence)
    }

    /// Row stride in bytes
    #[inline]
    pub fn step(&self) -> usize {
        self.width as usize * Self::CHANNELS
    }

    #[inline]
    pub fn expected_len(&self) -> usize {
        self.step() * self.height as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }
}

/// Axis-aligned rectangle in pixel coordinates (inclusive min, exclusive max)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

/// A region reported by an object detector
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub rect: Rect,
    pub confidence: f32,
    pub label: String,
    pub timestamp: SystemTime,
}
