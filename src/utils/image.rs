//! Image utility functions

use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, RgbaImage};

/// Interleaved RGBA pixels with their dimensions
#[derive(Debug, Clone)]
pub struct RgbaFrame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

/// Read and decode an image file (JPEG, PNG) into an RGBA frame
pub fn load_rgba(path: &Path) -> Result<RgbaFrame> {
    let image = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(to_frame(image))
}

/// Write an RGBA frame to `path`; the format follows the file extension
pub fn save_rgba(path: &Path, frame: &RgbaFrame) -> Result<()> {
    let image = RgbaImage::from_raw(frame.width as u32, frame.height as u32, frame.pixels.clone())
        .context("Pixel buffer does not match frame dimensions")?;
    let image = DynamicImage::ImageRgba8(image);

    // JPEG has no alpha channel
    let is_jpeg = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false);
    if is_jpeg {
        DynamicImage::ImageRgb8(image.to_rgb8()).save(path)?;
    } else {
        image.save(path)?;
    }
    Ok(())
}

fn to_frame(image: DynamicImage) -> RgbaFrame {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    RgbaFrame {
        width: width as usize,
        height: height as usize,
        pixels: rgba.into_raw(),
    }
}
