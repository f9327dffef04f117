//! V4L2 capture devices.
//!
//! Devices are addressed by index (`/dev/video<N>`). The driver is asked for
//! packed RGB; YUYV and MJPG are converted when the driver refuses.

use super::{CaptureDevice, CaptureError, DeviceOpener};
use crate::frame::RawFrame;
use ouroboros::self_referencing;

const BUFFER_COUNT: u32 = 4;

/// Opens `/dev/video<index>` with the configured format
#[derive(Debug, Clone)]
pub struct V4l2Opener {
    index: u32,
    width: u32,
    height: u32,
    fps: u32,
}

impl V4l2Opener {
    pub fn new(index: u32, width: u32, height: u32, fps: u32) -> Self {
        Self {
            index,
            width,
            height,
            fps,
        }
    }
}

impl DeviceOpener for V4l2Opener {
    fn open(&self, resolution: (u32, u32)) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let desired = if resolution.0 > 0 && resolution.1 > 0 {
            resolution
        } else {
            (self.width, self.height)
        };
        let mut device = V4l2Device {
            index: self.index,
            desired,
            fps: self.fps,
            state: None,
            active_width: desired.0,
            active_height: desired.1,
            fourcc: PixelLayout::Rgb3,
            sequence: 0,
        };
        device.connect()?;
        Ok(Box::new(device))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelLayout {
    Rgb3,
    Yuyv,
    Mjpg,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Device {
    index: u32,
    desired: (u32, u32),
    fps: u32,
    state: Option<V4l2State>,
    active_width: u32,
    active_height: u32,
    fourcc: PixelLayout,
    sequence: u32,
}

impl V4l2Device {
    fn path(&self) -> String {
        format!("/dev/video{}", self.index)
    }

    fn connect(&mut self) -> Result<(), CaptureError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let path = self.path();
        let open_err = |e: std::io::Error| CaptureError::Open(path.clone(), e.to_string());

        let device = v4l::Device::new(self.index as usize).map_err(open_err)?;
        let mut format = device.format().map_err(open_err)?;
        if self.desired.0 > 0 && self.desired.1 > 0 {
            format.width = self.desired.0;
            format.height = self.desired.1;
        }
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("{}: failed to set format: {}", path, err);
                device.format().map_err(open_err)?
            }
        };

        self.fourcc = match &format.fourcc.repr {
            b"RGB3" => PixelLayout::Rgb3,
            b"YUYV" => PixelLayout::Yuyv,
            b"MJPG" => PixelLayout::Mjpg,
            other => {
                return Err(CaptureError::Open(
                    path,
                    format!("unsupported pixel format {}", String::from_utf8_lossy(other)),
                ))
            }
        };

        if self.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("{}: failed to set fps: {}", path, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
            },
        }
        .try_build()
        .map_err(open_err)?;
        self.state = Some(state);

        log::info!(
            "{}: connected ({}x{}, {:?})",
            path,
            self.active_width,
            self.active_height,
            self.fourcc
        );
        Ok(())
    }

    fn to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CaptureError> {
        let (w, h) = (self.active_width as usize, self.active_height as usize);
        match self.fourcc {
            PixelLayout::Rgb3 => {
                let expected = w * h * RawFrame::CHANNELS;
                if buf.len() < expected {
                    return Err(CaptureError::Read(format!(
                        "short RGB frame: expected {}, got {}",
                        expected,
                        buf.len()
                    )));
                }
                Ok(buf[..expected].to_vec())
            }
            PixelLayout::Yuyv => yuyv_to_rgb(buf, w, h),
            PixelLayout::Mjpg => {
                let decoded =
                    image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                        .map_err(|e| CaptureError::Read(format!("MJPG decode: {}", e)))?;
                Ok(decoded.to_rgb8().into_raw())
            }
        }
    }
}

impl CaptureDevice for V4l2Device {
    fn is_open(&self) -> bool {
        self.state.is_some()
    }

    fn read(&mut self) -> Result<RawFrame, CaptureError> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| CaptureError::Unavailable(format!("{} not connected", self.index)))?;
        let buf = match state.with_mut(|fields| fields.stream.next().map(|(buf, _)| buf.to_vec())) {
            Ok(buf) => buf,
            Err(err) => {
                // A failed dequeue usually means the device went away; drop the
                // stream so the owning source reconnects on its next tick.
                self.state = None;
                return Err(CaptureError::Read(err.to_string()));
            }
        };
        if buf.is_empty() {
            return Err(CaptureError::EmptyFrame);
        }

        let data = self.to_rgb(&buf)?;
        let frame = RawFrame::new(data, self.active_width, self.active_height, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn set_resolution(&mut self, width: u32, height: u32) {
        if width > 0 {
            self.desired.0 = width;
        }
        if height > 0 {
            self.desired.1 = height;
        }
        // The stream borrows the device, so a format change needs a fresh handle.
        self.state = None;
        if let Err(err) = self.connect() {
            log::error!("{}: reconnect after resolution change failed: {}", self.path(), err);
        }
    }

    fn resolution(&self) -> (u32, u32) {
        (self.active_width, self.active_height)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::debug!("{}: closed", self.path());
        }
    }
}

fn yuyv_to_rgb(buf: &[u8], width: usize, height: usize) -> Result<Vec<u8>, CaptureError> {
    let expected = width * height * 2;
    if buf.len() < expected {
        return Err(CaptureError::Read(format!(
            "short YUYV frame: expected {}, got {}",
            expected,
            buf.len()
        )));
    }
    let mut rgb = Vec::with_capacity(width * height * RawFrame::CHANNELS);
    for chunk in buf[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            rgb.extend_from_slice(&yuv_to_rgb(y, u, v));
        }
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let clamp = |value: f32| value.round().clamp(0.0, 255.0) as u8;
    [
        clamp(y + 1.402 * v),
        clamp(y - 0.344_136 * u - 0.714_136 * v),
        clamp(y + 1.772 * u),
    ]
}
