use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use rayon::prelude::*;

use crate::types::Frame;

/// Anything that can hand out the next frame on demand.
pub trait FrameSource {
    fn capture_frame(&mut self) -> Result<Frame>;
}

impl<F: FrameSource + ?Sized> FrameSource for Box<F> {
    fn capture_frame(&mut self) -> Result<Frame> {
        (**self).capture_frame()
    }
}

/// Scrolling color gradient, for running without a camera.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    tick: u32,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            tick: 0,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn capture_frame(&mut self) -> Result<Frame> {
        let (width, height, tick) = (self.width, self.height, self.tick);
        self.tick = self.tick.wrapping_add(4);

        let mut rgba = vec![0u8; width as usize * height as usize * 4];
        rgba.par_chunks_mut(width as usize * 4)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    let shifted = (x as u32).wrapping_add(tick) % width;
                    px[0] = (shifted * 255 / width) as u8;
                    px[1] = (y as u32 * 255 / height) as u8;
                    px[2] = 128;
                    px[3] = 255;
                }
            });
        Ok(Frame::new(rgba, width, height))
    }
}

/// Cycles through the PNG/JPEG images of a directory, in name order.
pub struct ImageDirSource {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageDirSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("failed to read image directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_supported_image(path))
            .collect();
        paths.sort();
        if paths.is_empty() {
            bail!("no PNG or JPEG images found in {}", dir.display());
        }
        Ok(Self { paths, next: 0 })
    }
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    fn capture_frame(&mut self) -> Result<Frame> {
        let path = &self.paths[self.next % self.paths.len()];
        self.next = (self.next + 1) % self.paths.len();
        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgba8();
        let (width, height) = image.dimensions();
        Ok(Frame::new(image.into_raw(), width, height))
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    #[test]
    fn synthetic_frames_are_well_formed_and_move() {
        let mut source = SyntheticSource::new(32, 16);
        let a = source.capture_frame().unwrap();
        let b = source.capture_frame().unwrap();
        assert!(a.is_well_formed());
        assert_eq!((a.width, a.height), (32, 16));
        assert_ne!(a.rgba, b.rgba);
    }

    #[test]
    fn image_dir_cycles_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(4, 2, Rgba([255, 0, 0, 255]))
            .save(dir.path().join("a.png"))
            .unwrap();
        RgbaImage::from_pixel(2, 2, Rgba([0, 255, 0, 255]))
            .save(dir.path().join("b.png"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageDirSource::open(dir.path()).unwrap();
        let widths: Vec<u32> = (0..3).map(|_| source.capture_frame().unwrap().width).collect();
        assert_eq!(widths, vec![4, 2, 4]);
    }

    #[test]
    fn empty_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageDirSource::open(dir.path()).is_err());
    }
}
