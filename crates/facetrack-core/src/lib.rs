//! facetrack-core: face recognition by intensity descriptors.
//!
//! Faces are located with SCRFD (ONNX Runtime), reduced to a normalized
//! 200×200 intensity vector and matched against a gallery of labelled
//! vectors by cosine similarity.

pub mod detector;
pub mod extractor;
pub mod gallery;
pub mod imaging;
pub mod matcher;
pub mod pipeline;
pub mod source;
pub mod types;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

pub use detector::{FaceDetector, ScrfdDetector};
pub use gallery::{BuildReport, Gallery, GalleryBuilder, GalleryHandle, GalleryRecord};
pub use matcher::{CosineMatcher, Matcher};
pub use pipeline::{FramePipeline, PipelineError};
pub use types::{BoundingBox, Encoding, FaceMatch, Label, MatchOutcome, MatchResult};

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";

/// Default model directory: `$XDG_DATA_HOME/facetrack/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facetrack/models")
}
