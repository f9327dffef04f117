//! Object detection hook.
//!
//! Detection is optional and failure-tolerant: a failed run leaves the frame
//! without an overlay and never fails the tick.

use crate::frame::{Detection, RawFrame};
use image::{Rgb, RgbImage};
use thiserror::Error;

/// Minimum confidence kept by [`filter_confident`]
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OVERLAY_THICKNESS: i32 = 2;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("model error: {0}")]
    Model(String),
    #[error("invalid input: {0}")]
    Input(String),
}

/// Finds regions of interest in a raw frame
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, frame: &RawFrame) -> Result<Vec<Detection>, DetectError>;
}

/// Drop detections below `threshold`
pub fn filter_confident(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.confidence > threshold)
        .collect()
}

/// Draw each detection as a rectangle outline, clipped to the image
pub fn draw_detections(img: &mut RgbImage, detections: &[Detection]) {
    let (w, h) = (img.width() as i32, img.height() as i32);
    if w == 0 || h == 0 {
        return;
    }
    // Edges further off-image than the outline thickness never show
    let margin = OVERLAY_THICKNESS;
    let clamp_x = |v: i32| v.clamp(-margin, w + margin);
    let clamp_y = |v: i32| v.clamp(-margin, h + margin);
    for detection in detections {
        let r = detection.rect;
        let (x0, x1) = (clamp_x(r.x0.min(r.x1)), clamp_x(r.x0.max(r.x1)));
        let (y0, y1) = (clamp_y(r.y0.min(r.y1)), clamp_y(r.y0.max(r.y1)));
        for t in 0..OVERLAY_THICKNESS {
            for x in x0..x1 {
                put(img, x, y0 + t, w, h);
                put(img, x, y1 - 1 - t, w, h);
            }
            for y in y0..y1 {
                put(img, x0 + t, y, w, h);
                put(img, x1 - 1 - t, y, w, h);
            }
        }
    }
}

#[inline]
fn put(img: &mut RgbImage, x: i32, y: i32, w: i32, h: i32) {
    if (0..w).contains(&x) && (0..h).contains(&y) {
        img.put_pixel(x as u32, y as u32, OVERLAY_COLOR);
    }
}
