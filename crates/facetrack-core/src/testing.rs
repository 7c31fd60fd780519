//! Test doubles and fixtures shared by the unit tests.

use crate::detector::{DetectorError, FaceDetector};
use crate::types::BoundingBox;
use image::{Rgb, RgbImage};
use std::path::Path;

type Respond = Box<dyn FnMut(&RgbImage) -> Vec<BoundingBox> + Send>;

/// Detector that answers from a closure instead of a model.
pub struct ScriptedDetector {
    respond: Respond,
    calls: usize,
}

impl ScriptedDetector {
    pub fn new(respond: impl FnMut(&RgbImage) -> Vec<BoundingBox> + Send + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: 0,
        }
    }

    /// Report the same boxes for every image.
    pub fn always(boxes: Vec<BoundingBox>) -> Self {
        Self::new(move |_| boxes.clone())
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        self.calls += 1;
        Ok((self.respond)(image))
    }
}

/// Deterministic noise image, never fully black.
pub fn patterned_image(width: u32, height: u32, seed: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let h = x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663) ^ seed.wrapping_mul(83_492_791);
        Rgb([
            (h % 251) as u8 + 4,
            ((h >> 8) % 251) as u8 + 4,
            ((h >> 16) % 251) as u8 + 4,
        ])
    })
}

/// Gray `level` on one half, black on the other.
pub fn half_lit_image(width: u32, height: u32, left_lit: bool, level: u8) -> RgbImage {
    RgbImage::from_fn(width, height, |x, _| {
        if (x < width / 2) == left_lit {
            Rgb([level; 3])
        } else {
            Rgb([0; 3])
        }
    })
}

pub fn write_png(path: &Path, image: &RgbImage) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    image.save_with_format(path, image::ImageFormat::Png).unwrap();
}
