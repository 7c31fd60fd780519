//! Gallery of labelled encodings.
//!
//! Galleries are built once, either by scanning a directory with one
//! subfolder per identity or from externally stored records, and are
//! immutable afterwards. Reloading builds a fresh gallery and publishes it
//! through a [`GalleryHandle`].

use crate::detector::{DetectorError, FaceDetector};
use crate::extractor::{DescriptorExtractor, ExtractError};
use crate::source;
use crate::types::{Encoding, Label};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery root not found: {0}")]
    RootNotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid gallery record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
    #[error("malformed gallery payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

/// One stored encoding and the identity it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub label: Label,
    pub encoding: Encoding,
}

/// Wire form of a gallery entry as kept by an external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GalleryRecord {
    pub label: Label,
    pub encoding: Vec<f32>,
}

impl GalleryRecord {
    fn validate(&self) -> Result<(), String> {
        if self.encoding.is_empty() {
            return Err("encoding is empty".to_string());
        }
        if let Some(pos) = self
            .encoding
            .iter()
            .position(|v| !v.is_finite() || !(0.0..=1.0).contains(v))
        {
            return Err(format!(
                "encoding value {} at position {pos} is outside [0, 1]",
                self.encoding[pos]
            ));
        }
        Ok(())
    }
}

/// Ordered, immutable collection of gallery entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    /// Build from external records, rejecting malformed ones.
    ///
    /// Encodings whose length differs from the canonical one are accepted;
    /// the matcher compares over the shared prefix.
    pub fn from_records(records: Vec<GalleryRecord>) -> Result<Self, GalleryError> {
        let mut entries = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            record
                .validate()
                .map_err(|reason| GalleryError::InvalidRecord { index, reason })?;
            entries.push(GalleryEntry {
                label: record.label,
                encoding: Encoding::new(record.encoding),
            });
        }
        Ok(Self { entries })
    }

    /// Parse a JSON array of [`GalleryRecord`]s.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, GalleryError> {
        let records: Vec<GalleryRecord> = serde_json::from_slice(bytes)?;
        Self::from_records(records)
    }

    pub fn to_records(&self) -> Vec<GalleryRecord> {
        self.entries
            .iter()
            .map(|e| GalleryRecord {
                label: e.label.clone(),
                encoding: e.encoding.values.clone(),
            })
            .collect()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GalleryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct labels.
    pub fn identity_count(&self) -> usize {
        self.entries.iter().map(|e| &e.label).collect::<HashSet<_>>().len()
    }
}

/// Counters from a directory scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Images that contributed an encoding.
    pub loaded: usize,
    /// Image files that could not be decoded.
    pub decode_failures: usize,
    /// Decoded images without a usable face.
    pub no_face: usize,
    /// Identity folders that contributed at least one encoding.
    pub identities: usize,
    /// Identity folders that contributed nothing.
    pub empty_identities: usize,
}

/// Builds a gallery from `<root>/<label>/<image>` layouts.
#[derive(Debug, Clone, Default)]
pub struct GalleryBuilder {
    legacy_names: bool,
}

impl GalleryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `_` with spaces in folder names, as older display names did.
    pub fn legacy_names(mut self, enabled: bool) -> Self {
        self.legacy_names = enabled;
        self
    }

    /// Scan `root` and encode the primary face of every image.
    ///
    /// Undecodable images and images without a face are skipped and counted.
    /// Subfolders and files are visited in name order.
    pub fn build<D: FaceDetector>(
        &self,
        root: &Path,
        extractor: &mut DescriptorExtractor<D>,
    ) -> Result<(Gallery, BuildReport), GalleryError> {
        if !root.is_dir() {
            return Err(GalleryError::RootNotFound(root.to_path_buf()));
        }

        let mut entries = Vec::new();
        let mut report = BuildReport::default();

        for person_dir in sorted_children(root)?.into_iter().filter(|p| p.is_dir()) {
            let Some(folder) = person_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let name = if self.legacy_names {
                folder.replace('_', " ")
            } else {
                folder
            };
            let label = match Label::try_from(name) {
                Ok(label) => label,
                Err(reason) => {
                    tracing::warn!(folder = %person_dir.display(), %reason, "skipping identity folder");
                    report.empty_identities += 1;
                    continue;
                }
            };

            let images = match sorted_children(&person_dir) {
                Ok(children) => children.into_iter().filter(|p| p.is_file() && is_image(p)),
                Err(e) => {
                    tracing::warn!(error = %e, %label, "skipping unreadable identity folder");
                    report.empty_identities += 1;
                    continue;
                }
            };

            let before = entries.len();
            for path in images {
                let image = match source::open_image(&path) {
                    Ok(image) => image,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "could not read image");
                        report.decode_failures += 1;
                        continue;
                    }
                };

                match extractor.extract(&image) {
                    Ok(encoding) => {
                        tracing::debug!(path = %path.display(), %label, "loaded gallery image");
                        entries.push(GalleryEntry {
                            label: label.clone(),
                            encoding,
                        });
                        report.loaded += 1;
                    }
                    Err(ExtractError::Detector(e)) => return Err(e.into()),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), reason = %e, "no face found in image");
                        report.no_face += 1;
                    }
                }
            }

            if entries.len() > before {
                report.identities += 1;
            } else {
                tracing::warn!(%label, "no valid faces found for identity");
                report.empty_identities += 1;
            }
        }

        tracing::info!(
            root = %root.display(),
            encodings = report.loaded,
            identities = report.identities,
            decode_failures = report.decode_failures,
            no_face = report.no_face,
            "gallery built"
        );

        Ok((Gallery::new(entries), report))
    }
}

fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>, GalleryError> {
    let io_err = |source| GalleryError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut children = std::fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    children.sort();
    Ok(children)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Shared, swappable reference to the current gallery.
///
/// Readers take a snapshot for the duration of a matching pass; a reload
/// publishes a fully built replacement in one step.
#[derive(Debug, Clone, Default)]
pub struct GalleryHandle {
    current: Arc<RwLock<Arc<Gallery>>>,
}

impl GalleryHandle {
    pub fn new(gallery: Gallery) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(gallery))),
        }
    }

    pub fn snapshot(&self) -> Arc<Gallery> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the gallery, returning the previous one.
    pub fn publish(&self, gallery: Gallery) -> Arc<Gallery> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(gallery))
    }
}
