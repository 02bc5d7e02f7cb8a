// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The pixel format of every image: RGBA, 8 bits per channel, premultiplied alpha.

Buffers are tightly packed rows with no padding.
*/

pub(crate) mod png_support;

/// Bytes per pixel.
pub const BYTES_PER_PIXEL: usize = 4;

#[inline]
pub(crate) fn unorm_to_f32(v: u8) -> f32 {
    v as f32 / 255.0
}

#[inline]
pub(crate) fn f32_to_unorm(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// A buffer filled with a single premultiplied color.
///
/// ```
/// use restorable_images::pixel_formats::solid;
/// let red = solid([255, 0, 0, 255], 2);
/// assert_eq!(red, vec![255, 0, 0, 255, 255, 0, 0, 255]);
/// ```
pub fn solid(rgba: [u8; 4], pixel_count: usize) -> Vec<u8> {
    rgba.repeat(pixel_count)
}

/// Converts premultiplied pixels to straight alpha in place.
pub fn unpremultiply(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
        let a = pixel[3];
        if a == 0 || a == 255 {
            continue;
        }
        for c in &mut pixel[..3] {
            *c = ((*c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8;
        }
    }
}

/// Composites premultiplied pixels over opaque black in place.
pub fn composite_on_black(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
        pixel[3] = 255;
    }
}
