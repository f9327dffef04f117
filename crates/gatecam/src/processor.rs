//! Frame post-processing and encoding.
//!
//! Transform order: detection overlay, rotate, flip, brightness/contrast,
//! saturation, resize, then encode into the mode's output family.

use crate::config::{Flip, ModeConfig, ModeKind, Rotation};
use crate::detector::draw_detections;
use crate::frame::{Detection, RawFrame};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("encode error: {0}")]
    Encode(String),
}

/// Turns a raw frame into the encoded bytes of one mode
pub trait FrameProcessor: Send + Sync {
    fn process(
        &self,
        frame: &RawFrame,
        mode: &ModeConfig,
        detections: &[Detection],
    ) -> Result<Vec<u8>, ProcessError>;
}

/// [`FrameProcessor`] backed by the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageProcessor;

impl FrameProcessor for ImageProcessor {
    fn process(
        &self,
        frame: &RawFrame,
        mode: &ModeConfig,
        detections: &[Detection],
    ) -> Result<Vec<u8>, ProcessError> {
        let mut img = to_image(frame)?;
        if !detections.is_empty() {
            draw_detections(&mut img, detections);
        }
        let mut img = rotate(img, mode.rotation);
        flip(&mut img, mode.flip);
        adjust_brightness_contrast(&mut img, mode.contrast, mode.brightness);
        adjust_saturation(&mut img, mode.saturation);
        let img = scale(img, mode.width, mode.height);
        encode(&img, mode)
    }
}

fn to_image(frame: &RawFrame) -> Result<RgbImage, ProcessError> {
    if frame.is_empty() {
        return Err(ProcessError::InvalidFrame("empty frame".into()));
    }
    RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or_else(|| {
        ProcessError::InvalidFrame(format!(
            "{}x{} frame needs {} bytes, got {}",
            frame.width,
            frame.height,
            frame.expected_len(),
            frame.data.len()
        ))
    })
}

fn rotate(img: RgbImage, rotation: Rotation) -> RgbImage {
    match rotation {
        Rotation::None => img,
        Rotation::Cw90 => imageops::rotate90(&img),
        Rotation::Cw180 => imageops::rotate180(&img),
        Rotation::Cw270 => imageops::rotate270(&img),
    }
}

fn flip(img: &mut RgbImage, axis: Flip) {
    match axis {
        Flip::None => {}
        Flip::X => imageops::flip_vertical_in_place(img),
        Flip::Y => imageops::flip_horizontal_in_place(img),
        Flip::Both => imageops::rotate180_in_place(img),
    }
}

/// `|v * contrast + brightness|`, saturated to u8
fn adjust_brightness_contrast(img: &mut RgbImage, contrast: f64, brightness: f64) {
    if contrast == 1.0 && brightness == 0.0 {
        return;
    }
    for value in img.iter_mut() {
        *value = (*value as f64 * contrast + brightness)
            .abs()
            .round()
            .min(255.0) as u8;
    }
}

/// Blend every pixel towards (saturation < 1) or away from (> 1) its luma
fn adjust_saturation(img: &mut RgbImage, saturation: f64) {
    if (saturation - 1.0).abs() < f64::EPSILON {
        return;
    }
    for pixel in img.pixels_mut() {
        let [r, g, b] = pixel.0;
        let luma = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
        for channel in pixel.0.iter_mut() {
            let value = luma + (*channel as f64 - luma) * saturation;
            *channel = value.round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn scale(img: RgbImage, width: u32, height: u32) -> RgbImage {
    if (img.width(), img.height()) == (width, height) {
        return img;
    }
    imageops::resize(&img, width, height, FilterType::Triangle)
}

fn encode(img: &RgbImage, mode: &ModeConfig) -> Result<Vec<u8>, ProcessError> {
    match mode.kind {
        ModeKind::JpegStream => {
            let mut buf = Vec::new();
            JpegEncoder::new_with_quality(&mut buf, mode.quality.clamp(1, 100))
                .encode_image(img)
                .map_err(|e| ProcessError::Encode(e.to_string()))?;
            Ok(buf)
        }
        ModeKind::GrayscaleFrame => Ok(imageops::grayscale(img).into_raw()),
        ModeKind::ColorFrame => Ok(to_rgb565(img)),
    }
}

/// Pack RGB8 into big-endian RGB565
fn to_rgb565(img: &RgbImage) -> Vec<u8> {
    let mut out = Vec::with_capacity(img.width() as usize * img.height() as usize * 2);
    for pixel in img.pixels() {
        let [r, g, b] = pixel.0;
        let value: u16 = ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3);
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}
