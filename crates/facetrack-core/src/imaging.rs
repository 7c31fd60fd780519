//! Pixel primitives shared by the detector and the descriptor extractor.

use crate::types::PixelRect;
use image::{GrayImage, Luma, RgbImage};

// BT.601 luma weights in 14-bit fixed point (sum = 1 << 14).
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

/// One output coordinate's source neighbours along an axis.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tap {
    i0: usize,
    i1: usize,
    /// Weight of `i1`; `i0` gets `1 - w1`.
    w1: f32,
}

/// Half-pixel-centre linear taps. Positions left of the first sample clamp
/// to it with zero weight; positions at or past the last sample replicate it.
fn linear_taps(src_len: u32, dst_len: u32) -> Vec<Tap> {
    let scale = f64::from(src_len) / f64::from(dst_len);
    let last = (src_len - 1) as usize;

    (0..dst_len)
        .map(|d| {
            let pos = (f64::from(d) + 0.5) * scale - 0.5;
            let floor = pos.floor();
            let (i0, frac) = if floor < 0.0 {
                (0, 0.0)
            } else if floor as usize >= last {
                (last, 0.0)
            } else {
                (floor as usize, pos - floor)
            };
            Tap {
                i0,
                i1: (i0 + 1).min(last),
                w1: frac as f32,
            }
        })
        .collect()
}

/// Resize an RGB image with bilinear interpolation.
///
/// Deterministic for identical input. An empty source yields a black image.
pub fn resize_bilinear(src: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_w, src_h) = src.dimensions();
    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
        return RgbImage::new(width, height);
    }

    let xs = linear_taps(src_w, width);
    let ys = linear_taps(src_h, height);
    let mut out = RgbImage::new(width, height);

    for (y, ty) in ys.iter().enumerate() {
        let fy = ty.w1;
        for (x, tx) in xs.iter().enumerate() {
            let fx = tx.w1;
            let tl = src.get_pixel(tx.i0 as u32, ty.i0 as u32).0;
            let tr = src.get_pixel(tx.i1 as u32, ty.i0 as u32).0;
            let bl = src.get_pixel(tx.i0 as u32, ty.i1 as u32).0;
            let br = src.get_pixel(tx.i1 as u32, ty.i1 as u32).0;

            let mut px = [0u8; 3];
            for c in 0..3 {
                let val = f32::from(tl[c]) * (1.0 - fx) * (1.0 - fy)
                    + f32::from(tr[c]) * fx * (1.0 - fy)
                    + f32::from(bl[c]) * (1.0 - fx) * fy
                    + f32::from(br[c]) * fx * fy;
                px[c] = val.round().clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(x as u32, y as u32, image::Rgb(px));
        }
    }

    out
}

/// Single-channel intensity using BT.601 weights with round-half-up.
pub fn to_intensity(src: &RgbImage) -> GrayImage {
    let (w, h) = src.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let [r, g, b] = src.get_pixel(x, y).0;
        let acc = u32::from(r) * LUMA_R
            + u32::from(g) * LUMA_G
            + u32::from(b) * LUMA_B
            + (1 << (LUMA_SHIFT - 1));
        Luma([(acc >> LUMA_SHIFT) as u8])
    })
}

/// Copy a rectangle out of an image. `rect` must lie inside the image.
pub fn crop(src: &RgbImage, rect: PixelRect) -> RgbImage {
    image::imageops::crop_imm(src, rect.x, rect.y, rect.width, rect.height).to_image()
}
