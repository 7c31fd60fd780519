use serde::{Deserialize, Serialize};
use std::fmt;

/// Side length of the canonical face crop the descriptor is computed from.
pub const CANONICAL_WIDTH: u32 = 200;
pub const CANONICAL_HEIGHT: u32 = 200;

/// Number of values in an encoding produced by this crate.
pub const ENCODING_LEN: usize = (CANONICAL_WIDTH * CANONICAL_HEIGHT) as usize;

/// Default cosine similarity a match must reach to be reported as known.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// Label reported for faces that did not resolve to an identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Identity label (student number, folder name, ...).
///
/// Accepts a JSON string or a non-negative integer at the boundary and is
/// always carried as a string internally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawLabel", into = "String")]
pub struct Label(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLabel {
    Text(String),
    Number(u64),
}

impl TryFrom<RawLabel> for Label {
    type Error = String;

    fn try_from(raw: RawLabel) -> Result<Self, Self::Error> {
        match raw {
            RawLabel::Text(s) => Self::try_from(s),
            RawLabel::Number(n) => Self::try_from(n.to_string()),
        }
    }
}

impl TryFrom<String> for Label {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err("label must not be empty".to_string());
        }
        Ok(Self(value))
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0
    }
}

impl Label {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Face descriptor: normalized intensities of the canonical crop, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity over the shared prefix of both encodings.
    ///
    /// Returns a value in [-1, 1]; 0.0 when either prefix has zero norm.
    /// Callers must check for an empty overlap themselves, since an empty
    /// prefix is also reported as 0.0 here.
    pub fn similarity(&self, other: &Encoding) -> f32 {
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&a, &b) in self.values.iter().zip(other.values.iter()) {
            let (a, b) = (f64::from(a), f64::from(b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            ((dot / denom) as f32).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    /// Number of leading values both encodings share.
    pub fn overlap(&self, other: &Encoding) -> usize {
        self.values.len().min(other.values.len())
    }
}

/// Face bounding box in coordinates relative to the source image (0..1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score for this box.
    pub confidence: f32,
}

impl BoundingBox {
    /// Box covering the whole image.
    pub fn full_frame() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            confidence: 1.0,
        }
    }

    /// Convert to absolute pixels, clamped to the image.
    ///
    /// Returns `None` when the clamped box has no area.
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> Option<PixelRect> {
        let scale = |v: f32, extent: u32| (f64::from(v) * f64::from(extent)).round() as i64;

        let x = scale(self.x, image_width).max(0);
        let y = scale(self.y, image_height).max(0);
        let width = scale(self.width, image_width).min(i64::from(image_width) - x);
        let height = scale(self.height, image_height).min(i64::from(image_height) - y);

        if width <= 0 || height <= 0 {
            return None;
        }

        Some(PixelRect {
            x: x as u32,
            y: y as u32,
            width: width as u32,
            height: height as u32,
        })
    }
}

/// Absolute, in-bounds pixel rectangle with positive area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Why a match resolved the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Best similarity reached the threshold.
    Matched,
    /// Gallery had comparable entries but none reached the threshold.
    BelowThreshold,
    /// Gallery had no entries.
    EmptyGallery,
    /// Every gallery entry had an empty overlap with the query.
    NoComparableEntries,
    /// No usable face region in the query image.
    NoFace,
}

/// Result of matching one query against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Matched identity; `None` is reported as "Unknown".
    pub label: Option<Label>,
    /// Cosine similarity of the best candidate, even when it is below threshold.
    pub similarity: f32,
    pub outcome: MatchOutcome,
}

impl MatchResult {
    pub fn unknown(outcome: MatchOutcome, similarity: f32) -> Self {
        Self {
            label: None,
            similarity,
            outcome,
        }
    }

    pub fn is_known(&self) -> bool {
        self.outcome == MatchOutcome::Matched && self.label.is_some()
    }

    pub fn display_label(&self) -> &str {
        self.label.as_ref().map_or(UNKNOWN_LABEL, Label::as_str)
    }
}

/// One detected face in a frame and what it matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub bbox: BoundingBox,
    pub region: PixelRect,
    pub result: MatchResult,
}
