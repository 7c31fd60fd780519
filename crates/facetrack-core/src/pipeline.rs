//! Per-frame orchestration: detect → crop → encode → match.

use crate::detector::{DetectorError, FaceDetector};
use crate::extractor::{self, DescriptorExtractor, ExtractError};
use crate::gallery::{BuildReport, GalleryBuilder, GalleryError, GalleryHandle};
use crate::imaging;
use crate::matcher::{CosineMatcher, Matcher};
use crate::types::{Encoding, FaceMatch, MatchOutcome, MatchResult};
use image::RgbImage;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
}

/// Recognises faces in whole images against a shared gallery.
///
/// Owns its detector; calls run to completion synchronously. The gallery is
/// read through a snapshot per call, so a concurrent reload never exposes a
/// partially built gallery.
pub struct FramePipeline<D> {
    extractor: DescriptorExtractor<D>,
    gallery: GalleryHandle,
    matcher: CosineMatcher,
    threshold: f32,
}

impl<D: FaceDetector> FramePipeline<D> {
    pub fn new(detector: D, gallery: GalleryHandle, threshold: f32) -> Self {
        Self {
            extractor: DescriptorExtractor::new(detector),
            gallery,
            matcher: CosineMatcher,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Match every detected face in `image`.
    ///
    /// Detections that clamp to an empty region are dropped. A face whose
    /// crop cannot be encoded is reported as unknown with similarity 0.
    pub fn process(&mut self, image: &RgbImage) -> Result<Vec<FaceMatch>, PipelineError> {
        let started = Instant::now();
        let gallery = self.gallery.snapshot();
        let (width, height) = image.dimensions();

        let boxes = self.extractor.detector_mut().detect(image)?;
        let mut matches = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            let Some(region) = bbox.to_pixels(width, height) else {
                tracing::trace!(?bbox, "dropping detection with empty region");
                continue;
            };

            let result = if gallery.is_empty() {
                MatchResult::unknown(MatchOutcome::EmptyGallery, 0.0)
            } else {
                match extractor::encode_face(&imaging::crop(image, region)) {
                    Ok(query) => self.matcher.compare(&query, &gallery, self.threshold),
                    Err(e) => {
                        tracing::debug!(error = %e, "face crop could not be encoded");
                        MatchResult::unknown(MatchOutcome::NoFace, 0.0)
                    }
                }
            };

            matches.push(FaceMatch { bbox, region, result });
        }

        tracing::debug!(
            faces = matches.len(),
            known = matches.iter().filter(|m| m.result.is_known()).count(),
            gallery = gallery.len(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "frame processed"
        );

        Ok(matches)
    }

    /// Match only the primary face of `image`.
    ///
    /// An image without a usable face yields `("Unknown", 0.0)`.
    pub fn identify(&mut self, image: &RgbImage) -> Result<MatchResult, PipelineError> {
        let gallery = self.gallery.snapshot();
        match self.extractor.extract(image) {
            Ok(query) => Ok(self.matcher.compare(&query, &gallery, self.threshold)),
            Err(ExtractError::Detector(e)) => Err(e.into()),
            Err(e) => {
                tracing::debug!(error = %e, "no usable face in query image");
                Ok(MatchResult::unknown(MatchOutcome::NoFace, 0.0))
            }
        }
    }

    /// Encode the primary face of `image`.
    pub fn encode(&mut self, image: &RgbImage) -> Result<Encoding, ExtractError> {
        self.extractor.extract(image)
    }

    /// Rebuild the gallery from `root` and publish it.
    ///
    /// The current gallery stays in place if the build fails.
    pub fn reload(&mut self, root: &Path, builder: &GalleryBuilder) -> Result<BuildReport, PipelineError> {
        let (gallery, report) = builder.build(root, &mut self.extractor)?;
        let previous = self.gallery.publish(gallery);
        tracing::info!(
            previous = previous.len(),
            current = report.loaded,
            "gallery reloaded"
        );
        Ok(report)
    }
}
