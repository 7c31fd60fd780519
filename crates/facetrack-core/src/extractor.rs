//! Intensity descriptor extraction.
//!
//! A face crop is resized to the canonical 200×200, reduced to one intensity
//! channel, scaled to [0, 1] and flattened row-major.

use crate::detector::{DetectorError, FaceDetector};
use crate::imaging;
use crate::types::{BoundingBox, Encoding, CANONICAL_HEIGHT, CANONICAL_WIDTH};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face region has no area ({width}x{height})")]
    DegenerateCrop { width: u32, height: u32 },
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

/// Encode an image that is already the face region.
pub fn encode_face(face: &RgbImage) -> Result<Encoding, ExtractError> {
    let (width, height) = face.dimensions();
    if width == 0 || height == 0 {
        return Err(ExtractError::DegenerateCrop { width, height });
    }

    let resized = imaging::resize_bilinear(face, CANONICAL_WIDTH, CANONICAL_HEIGHT);
    let gray = imaging::to_intensity(&resized);
    let values: Vec<f32> = gray.as_raw().iter().map(|&p| f32::from(p) / 255.0).collect();

    if tracing::enabled!(tracing::Level::TRACE) {
        let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / values.len() as f64;
        tracing::trace!(len = values.len(), mean, src_width = width, src_height = height, "encoding computed");
    }

    Ok(Encoding::new(values))
}

/// Crop `image` to a relative box and encode the crop.
pub fn encode_region(image: &RgbImage, bbox: &BoundingBox) -> Result<Encoding, ExtractError> {
    let (width, height) = image.dimensions();
    let rect = bbox
        .to_pixels(width, height)
        .ok_or(ExtractError::DegenerateCrop { width: 0, height: 0 })?;
    encode_face(&imaging::crop(image, rect))
}

/// Detects the primary face in whole images and encodes it.
pub struct DescriptorExtractor<D> {
    detector: D,
}

impl<D: FaceDetector> DescriptorExtractor<D> {
    pub fn new(detector: D) -> Self {
        Self { detector }
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    /// Encode the first face the detector reports. Other faces are ignored.
    pub fn extract(&mut self, image: &RgbImage) -> Result<Encoding, ExtractError> {
        let faces = self.detector.detect(image)?;
        let face = faces.first().ok_or(ExtractError::NoFaceDetected)?;
        encode_region(image, face)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{patterned_image, ScriptedDetector};
    use crate::types::ENCODING_LEN;
    use image::Rgb;

    #[test]
    fn test_encode_face_length_and_range() {
        let img = patterned_image(123, 77, 3);
        let enc = encode_face(&img).unwrap();
        assert_eq!(enc.len(), ENCODING_LEN);
        assert!(enc.values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_encode_face_uniform_red() {
        let img = RgbImage::from_pixel(40, 60, Rgb([255, 0, 0]));
        let enc = encode_face(&img).unwrap();
        let expected = 76.0f32 / 255.0;
        assert!(enc.values.iter().all(|&v| v == expected));
    }

    #[test]
    fn test_encode_face_deterministic() {
        let img = patterned_image(311, 257, 9);
        let a = encode_face(&img).unwrap();
        let b = encode_face(&img).unwrap();
        assert_eq!(a.values, b.values);
    }

    #[test]
    fn test_encode_face_row_major() {
        // Top half white, bottom half black: first row bright, last row dark
        let img = RgbImage::from_fn(200, 200, |_, y| if y < 100 { Rgb([255; 3]) } else { Rgb([0; 3]) });
        let enc = encode_face(&img).unwrap();
        assert_eq!(enc.values[0], 1.0);
        assert_eq!(enc.values[199], 1.0);
        assert_eq!(enc.values[ENCODING_LEN - 1], 0.0);
    }

    #[test]
    fn test_encode_face_empty() {
        let img = RgbImage::new(0, 10);
        assert!(matches!(
            encode_face(&img),
            Err(ExtractError::DegenerateCrop { width: 0, height: 10 })
        ));
    }

    #[test]
    fn test_encode_region_degenerate_box() {
        let img = patterned_image(50, 50, 1);
        let bbox = BoundingBox { x: 1.2, y: 0.0, width: 0.3, height: 0.3, confidence: 0.9 };
        assert!(matches!(encode_region(&img, &bbox), Err(ExtractError::DegenerateCrop { .. })));
    }

    #[test]
    fn test_encode_region_matches_manual_crop() {
        let img = patterned_image(100, 80, 5);
        let bbox = BoundingBox { x: 0.25, y: 0.25, width: 0.5, height: 0.5, confidence: 0.9 };
        let rect = bbox.to_pixels(100, 80).unwrap();
        let manual = encode_face(&imaging::crop(&img, rect)).unwrap();
        assert_eq!(encode_region(&img, &bbox).unwrap(), manual);
    }

    #[test]
    fn test_extract_uses_first_detection() {
        let img = patterned_image(120, 90, 2);
        let first = BoundingBox { x: 0.0, y: 0.0, width: 0.5, height: 0.5, confidence: 0.9 };
        let second = BoundingBox { x: 0.5, y: 0.5, width: 0.5, height: 0.5, confidence: 0.8 };
        let mut extractor = DescriptorExtractor::new(ScriptedDetector::always(vec![first.clone(), second]));

        let enc = extractor.extract(&img).unwrap();
        assert_eq!(enc, encode_region(&img, &first).unwrap());
        assert_eq!(extractor.detector_mut().calls(), 1);
    }

    #[test]
    fn test_extract_no_face() {
        let img = patterned_image(64, 64, 4);
        let mut extractor = DescriptorExtractor::new(ScriptedDetector::always(vec![]));
        assert!(matches!(extractor.extract(&img), Err(ExtractError::NoFaceDetected)));
    }
}
