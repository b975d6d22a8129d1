/// Camera frame sampling
///
/// Owns the V4L2 capture device and turns the current video frame into a
/// small, aggressively-compressed JPEG still for upload. Resolution and
/// frame-rate requests are hints; the driver reports back what it actually
/// negotiated.

use std::time::{SystemTime, UNIX_EPOCH};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use thiserror::Error;
use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::parameters::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::constants::capture::{JPEG_QUALITY, TARGET_WIDTH};

#[derive(Error, Debug)]
pub enum CameraError {
    /// Permission denied, no device, or the device went away mid-run
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    /// The stream has not produced a usable frame yet; transient
    #[error("camera has not produced a usable frame yet")]
    NotReady,

    /// The device delivered bytes we could not turn into an image
    #[error("frame decode failed: {0}")]
    Decode(String),
}

/// Downscaling and device-hint policy for captured frames
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Width the still is resampled to; height is derived from the source
    /// aspect ratio
    pub target_width: u32,
    /// JPEG quality (1-100) for the uploaded still
    pub jpeg_quality: u8,
    /// Preferred capture resolution hint
    pub preferred_width: u32,
    pub preferred_height: u32,
    /// Preferred capture rate hint, frames per second
    pub frame_rate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            target_width: TARGET_WIDTH,
            jpeg_quality: JPEG_QUALITY,
            preferred_width: 640,
            preferred_height: 480,
            frame_rate: 15,
        }
    }
}

/// One encoded still image, produced per capture and consumed by exactly one
/// inference call
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    /// Capture time, millis since epoch
    pub captured_at_ms: u64,
}

/// Seam between the analysis loop and the physical camera
///
/// `start` acquires the device, `capture` produces a still, `stop` releases
/// everything and is a no-op when nothing is active.
pub trait FrameSource {
    fn start(&mut self) -> Result<(), CameraError>;
    fn capture(&mut self) -> Result<Frame, CameraError>;
    fn stop(&mut self);
}

/// V4L2-backed camera
pub struct Camera {
    device_path: String,
    config: CaptureConfig,
    device: Option<Device>,
    negotiated: Option<(u32, u32, FourCC)>,
}

impl Camera {
    pub fn new(device_path: impl Into<String>, config: CaptureConfig) -> Self {
        Camera {
            device_path: device_path.into(),
            config,
            device: None,
            negotiated: None,
        }
    }

    /// The format the driver actually agreed to, if the camera is active
    pub fn negotiated_format(&self) -> Option<(u32, u32, FourCC)> {
        self.negotiated
    }

    fn negotiate(&self, device: &Device) -> Result<(u32, u32, FourCC), CameraError> {
        let mut format = device
            .format()
            .map_err(|e| CameraError::Unavailable(e.to_string()))?;
        format.width = self.config.preferred_width;
        format.height = self.config.preferred_height;

        // Prefer MJPG (decodes straight off the wire), fall back to YUYV
        format.fourcc = FourCC::new(b"MJPG");
        let mut negotiated = device
            .set_format(&format)
            .map_err(|e| CameraError::Unavailable(e.to_string()))?;
        if negotiated.fourcc != FourCC::new(b"MJPG") {
            format.fourcc = FourCC::new(b"YUYV");
            negotiated = device
                .set_format(&format)
                .map_err(|e| CameraError::Unavailable(e.to_string()))?;
        }

        // Rate is a hint; drivers are free to ignore it
        let _ = device.set_params(&Parameters::with_fps(self.config.frame_rate));

        Ok((negotiated.width, negotiated.height, negotiated.fourcc))
    }
}

/// Decode one device buffer into RGB according to the negotiated pixel format
fn decode_frame(buf: &[u8], width: u32, height: u32, fourcc: FourCC) -> Result<RgbImage, CameraError> {
    if fourcc == FourCC::new(b"MJPG") {
        let img = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
            .map_err(|e| CameraError::Decode(e.to_string()))?;
        Ok(img.to_rgb8())
    } else if fourcc == FourCC::new(b"YUYV") {
        yuyv_to_rgb(buf, width, height)
    } else {
        Err(CameraError::Decode(format!(
            "unsupported pixel format {}",
            fourcc
        )))
    }
}

impl FrameSource for Camera {
    fn start(&mut self) -> Result<(), CameraError> {
        if self.device.is_some() {
            return Ok(());
        }

        let device = Device::with_path(&self.device_path).map_err(|e| {
            CameraError::Unavailable(format!("{}: {}", self.device_path, e))
        })?;
        let negotiated = self.negotiate(&device)?;

        info!(
            device = %self.device_path,
            width = negotiated.0,
            height = negotiated.1,
            format = %negotiated.2,
            "camera acquired"
        );

        self.negotiated = Some(negotiated);
        self.device = Some(device);
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        let (width, height, fourcc) = self.negotiated.ok_or(CameraError::NotReady)?;

        // A format without a valid intrinsic size means the stream has not
        // settled; retry later instead of uploading garbage
        if width == 0 || height == 0 {
            return Err(CameraError::NotReady);
        }

        let device = self.device.as_ref().ok_or(CameraError::NotReady)?;
        let mut stream = Stream::with_buffers(device, Type::VideoCapture, 4)
            .map_err(|e| CameraError::Unavailable(e.to_string()))?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::Unavailable(e.to_string()))?;

        if buf.is_empty() || meta.bytesused == 0 {
            return Err(CameraError::NotReady);
        }

        let used = (meta.bytesused as usize).min(buf.len());
        let rgb = decode_frame(&buf[..used], width, height, fourcc)?;
        let frame = encode_still(&rgb, &self.config)?;
        debug!(
            bytes = frame.data.len(),
            width = frame.width,
            height = frame.height,
            "frame captured"
        );
        Ok(frame)
    }

    fn stop(&mut self) {
        if self.device.take().is_some() {
            info!(device = %self.device_path, "camera released");
        }
        self.negotiated = None;
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Downscale to the configured width (aspect-preserving) and encode as JPEG
pub fn encode_still(rgb: &RgbImage, config: &CaptureConfig) -> Result<Frame, CameraError> {
    let (src_w, src_h) = rgb.dimensions();
    if src_w == 0 || src_h == 0 {
        return Err(CameraError::NotReady);
    }

    let target_w = config.target_width.min(src_w);
    let target_h = ((target_w as u64 * src_h as u64) / src_w as u64).max(1) as u32;

    let resized = DynamicImage::ImageRgb8(rgb.clone()).resize_exact(
        target_w,
        target_h,
        FilterType::Triangle,
    );

    let mut data = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut data, config.jpeg_quality);
    resized
        .write_with_encoder(encoder)
        .map_err(|e| CameraError::Decode(e.to_string()))?;

    Ok(Frame {
        data,
        mime_type: "image/jpeg",
        width: target_w,
        height: target_h,
        captured_at_ms: now_millis(),
    })
}

/// Convert a packed YUYV 4:2:2 buffer to RGB
fn yuyv_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, CameraError> {
    let expected = (width as usize) * (height as usize) * 2;
    if buf.len() < expected {
        return Err(CameraError::Decode(format!(
            "YUYV buffer too short: {} < {}",
            buf.len(),
            expected
        )));
    }

    let mut rgb = vec![0u8; (width as usize) * (height as usize) * 3];
    for (i, chunk) in buf[..expected].chunks_exact(4).enumerate() {
        let y0 = chunk[0] as f32;
        let u = chunk[1] as f32 - 128.0;
        let y1 = chunk[2] as f32;
        let v = chunk[3] as f32 - 128.0;

        let px = i * 2;
        for (j, y) in [y0, y1].into_iter().enumerate() {
            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
            let offset = (px + j) * 3;
            rgb[offset] = r;
            rgb[offset + 1] = g;
            rgb[offset + 2] = b;
        }
    }

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| CameraError::Decode("YUYV conversion produced a short buffer".to_string()))
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_still_downscales_and_derives_height() {
        let rgb = RgbImage::from_pixel(640, 480, image::Rgb([40, 120, 200]));
        let config = CaptureConfig::default();

        let frame = encode_still(&rgb, &config).unwrap();

        assert_eq!(frame.width, 480);
        assert_eq!(frame.height, 360); // 480 * 480 / 640, aspect preserved
        assert_eq!(frame.mime_type, "image/jpeg");
        assert!(!frame.data.is_empty());
        // JPEG magic bytes
        assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn encode_still_never_upscales() {
        let rgb = RgbImage::from_pixel(320, 240, image::Rgb([0, 0, 0]));
        let config = CaptureConfig::default();

        let frame = encode_still(&rgb, &config).unwrap();

        assert_eq!(frame.width, 320);
        assert_eq!(frame.height, 240);
    }

    #[test]
    fn yuyv_gray_converts_to_gray() {
        // Y=128, U=V=128 is mid gray in YUYV
        let buf = vec![128u8; 2 * 2 * 2];
        let rgb = yuyv_to_rgb(&buf, 2, 2).unwrap();

        for pixel in rgb.pixels() {
            assert_eq!(pixel.0, [128, 128, 128]);
        }
    }

    #[test]
    fn yuyv_short_buffer_is_rejected() {
        let buf = vec![0u8; 7];
        assert!(matches!(
            yuyv_to_rgb(&buf, 2, 2),
            Err(CameraError::Decode(_))
        ));
    }
}
