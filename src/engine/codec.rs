//! Pixel-Tensor Codec
//!
//! Converts between the caller's interleaved 8-bit RGBA pixel grid and the
//! planar f32 NCHW tensors the model consumes and produces. Values are copied
//! as raw byte magnitudes, no normalization.

use image::{ImageBuffer, Rgba};
use ndarray::{ArrayView4, ArrayViewMut4};
use serde::Deserialize;

use crate::error::{BridgeError, Result};

pub const RGBA_CHANNELS: usize = 4;
pub const RGB_CHANNELS: usize = 3;

pub type TensorView<'a> = ArrayView4<'a, f32>;
pub type TensorViewMut<'a> = ArrayViewMut4<'a, f32>;

/// What the alpha channel holds after inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlphaPolicy {
    /// Alpha is rebuilt at full opacity
    #[default]
    Opaque,
    /// Alpha keeps the value it had before the call
    Preserve,
}

/// Number of bytes an RGBA buffer of `width` x `height` must hold
pub fn rgba_len(width: usize, height: usize) -> usize {
    width * height * RGBA_CHANNELS
}

/// Check that `len` matches the configured grid exactly
pub fn check_rgba_len(len: usize, width: usize, height: usize) -> Result<()> {
    let expected = rgba_len(width, height);
    if len != expected {
        return Err(BridgeError::BufferSizeMismatch {
            expected,
            actual: len,
        });
    }
    Ok(())
}

/// Wrap a flat request buffer as a (1, C, H, W) view
pub fn nchw_view<'a>(name: &str, dims: &[usize], data: &'a [f32]) -> Result<TensorView<'a>> {
    let shape = rank4(name, dims)?;
    Ok(ArrayView4::from_shape(shape, data)?)
}

/// Mutable counterpart of [`nchw_view`]
pub fn nchw_view_mut<'a>(name: &str, dims: &[usize], data: &'a mut [f32]) -> Result<TensorViewMut<'a>> {
    let shape = rank4(name, dims)?;
    Ok(ArrayViewMut4::from_shape(shape, data)?)
}

fn rank4(name: &str, dims: &[usize]) -> Result<(usize, usize, usize, usize)> {
    match *dims {
        [n, c, h, w] => Ok((n, c, h, w)),
        _ => Err(BridgeError::UnsupportedInputRank {
            name: name.to_string(),
            rank: dims.len(),
        }),
    }
}

/// Pack an interleaved RGBA buffer into the planar RGB tensor of input
/// `port`, dropping alpha.
///
/// `tensor[0, c, y, x] = rgba[(y * W + x) * 4 + c]` for `c < 3`.
pub fn encode(rgba: &[u8], port: &str, mut tensor: TensorViewMut<'_>) -> Result<()> {
    let (_, channels, height, width) = tensor.dim();
    if channels != RGB_CHANNELS {
        return Err(BridgeError::UnsupportedChannels {
            name: port.to_string(),
            channels,
        });
    }
    check_rgba_len(rgba.len(), width, height)?;

    for (p, pixel) in rgba.chunks_exact(RGBA_CHANNELS).enumerate() {
        let (y, x) = (p / width, p % width);
        for c in 0..RGB_CHANNELS {
            tensor[[0, c, y, x]] = pixel[c] as f32;
        }
    }
    Ok(())
}

/// Unpack a planar (1, 3, H, W) tensor into the RGB channels of an RGBA buffer.
///
/// Every value is clamped to [0, 255] before narrowing. Alpha bytes are left
/// untouched.
pub fn decode(tensor: TensorView<'_>, rgba: &mut [u8], width: usize, height: usize) -> Result<()> {
    let expected = [1, RGB_CHANNELS, height, width];
    if tensor.shape() != &expected[..] {
        return Err(BridgeError::OutputShapeMismatch {
            expected,
            actual: tensor.shape().to_vec(),
        });
    }
    check_rgba_len(rgba.len(), width, height)?;

    let mut image: ImageBuffer<Rgba<u8>, &mut [u8]> =
        ImageBuffer::from_raw(width as u32, height as u32, rgba)
            .ok_or(BridgeError::InvalidDimensions { width, height })?;

    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..RGB_CHANNELS {
            pixel[c] = clamp_to_u8(tensor[[0, c, y, x]]);
        }
    }
    Ok(())
}

/// Clamp a model output value into a byte.
///
/// Bounds are compared on the float before narrowing, one bound at a time.
/// NaN maps to 0; infinities map to the bound they exceed.
pub fn clamp_to_u8(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    let mut v = value;
    if v < 0.0 {
        v = 0.0;
    }
    if v > 255.0 {
        v = 255.0;
    }
    v as u8
}

/// Rebuild the alpha channel of an RGBA buffer according to `policy`
pub fn restore_alpha(rgba: &mut [u8], policy: AlphaPolicy) {
    match policy {
        AlphaPolicy::Opaque => {
            for pixel in rgba.chunks_exact_mut(RGBA_CHANNELS) {
                pixel[3] = u8::MAX;
            }
        }
        AlphaPolicy::Preserve => {}
    }
}
