use anyhow::{Context, Result, anyhow};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    utils::{CameraIndex, RequestedFormat, RequestedFormatType},
};
use rayon::prelude::*;

use super::source::FrameSource;
use crate::types::Frame;

fn requested_formats() -> [RequestedFormat<'static>; 2] {
    [
        // Prefer higher FPS; some drivers reject very low default rates.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

/// Blocking camera capture: one decoded frame per call.
pub struct CameraSource {
    camera: Camera,
    index: u32,
}

impl CameraSource {
    pub fn open(index: u32) -> Result<Self> {
        let camera = build_camera(CameraIndex::Index(index))
            .with_context(|| format!("failed to open camera {index}"))?;
        log::info!("using camera {index}: {}", camera.info().human_name());
        Ok(Self { camera, index })
    }
}

impl FrameSource for CameraSource {
    fn capture_frame(&mut self) -> Result<Frame> {
        let buffer = self
            .camera
            .frame()
            .with_context(|| format!("camera {} frame read failed", self.index))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .context("failed to decode camera frame")?;

        let (width, height) = decoded.dimensions();
        let rgb = decoded.into_raw();
        if rgb.is_empty() {
            return Err(anyhow!("camera {} returned an empty frame", self.index));
        }

        // Expand RGB to RGBA for the overlay pipeline.
        let mut rgba = vec![0u8; rgb.len() / 3 * 4];
        rgba.par_chunks_mut(4)
            .zip(rgb.par_chunks_exact(3))
            .for_each(|(dst, src)| {
                dst[..3].copy_from_slice(src);
                dst[3] = 255;
            });

        Ok(Frame::new(rgba, width, height))
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(err) = self.camera.stop_stream() {
            log::debug!("failed to stop camera {}: {err}", self.index);
        }
    }
}
