//! Face detection.
//!
//! [`FaceDetector`] is the seam the rest of the crate depends on; the shipped
//! implementation is [`ScrfdDetector`], which runs the SCRFD model through
//! ONNX Runtime with 3-stride anchor decoding and NMS post-processing.

use crate::imaging;
use crate::types::BoundingBox;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Minimum detector score a box needs to be reported.
pub const DEFAULT_DETECTION_CONFIDENCE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download det_10g.onnx from insightface and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in an image.
///
/// Boxes are relative to the image (0..1) and sorted by descending score.
/// Inference sessions are stateful, hence `&mut self`; give each concurrent
/// caller its own instance.
pub trait FaceDetector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Pixel-space detection before normalisation to the source image.
#[derive(Debug, Clone, PartialEq)]
struct PixelBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    score: f32,
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    input_size: usize,
    confidence_threshold: f32,
    /// Per-stride output indices [(score, bbox)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, confidence_threshold: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            confidence_threshold,
            "loaded SCRFD model"
        );

        // score + bbox per stride; keypoint outputs are present but unused here
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_size: SCRFD_INPUT_SIZE,
            confidence_threshold,
            stride_indices,
        })
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let (input, info) = letterbox(image, self.input_size);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                self.input_size,
                &info,
                self.confidence_threshold,
            ));
        }

        let kept = nms(all_detections, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = kept.len(), width, height, "SCRFD detection complete");

        Ok(kept
            .into_iter()
            .map(|b| to_relative(&b, width, height))
            .collect())
    }
}

/// Letterbox an RGB image into a `size`×`size` NCHW float tensor.
///
/// The image keeps its aspect ratio and is centred; padding offsets are whole
/// pixels so [`decode_stride`] maps back to exactly where pixels were placed.
fn letterbox(image: &RgbImage, size: usize) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = image.dimensions();

    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = imaging::resize_bilinear(image, new_w as u32, new_h as u32);

    // Padding stays at 0.0, i.e. SCRFD_MEAN after normalisation.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in resized.enumerate_pixels() {
        let tx = pad_x + x as usize;
        let ty = pad_y + y as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (f32::from(px.0[c]) - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    let info = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (tensor, info)
}

fn to_relative(b: &PixelBox, width: u32, height: u32) -> BoundingBox {
    let (w, h) = (width as f32, height as f32);
    BoundingBox {
        x: b.x / w,
        y: b.y / h,
        width: b.width / w,
        height: b.height / h,
        confidence: b.score,
    }
}

/// Discover output tensor ordering by name.
///
/// Exports name tensors either "score_8", "bbox_16", ... or with generic
/// numbers. Unrecognised names fall back to the standard positional layout
/// [0-2] = scores, [3-5] = bboxes (strides 8, 16, 32).
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(found) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [found[0], found[1], found[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
            );
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level into source-image pixels.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<PixelBox> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score < threshold {
            continue;
        }

        let bbox_off = idx * 4;
        let Some(d) = bboxes.get(bbox_off..bbox_off + 4) else {
            continue;
        };

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * step;
        let anchor_cy = (anchor_idx / grid) as f32 * step;

        // Distances to the four edges, in stride units
        let x1 = (anchor_cx - d[0] * step - letterbox.pad_x) / letterbox.scale;
        let y1 = (anchor_cy - d[1] * step - letterbox.pad_y) / letterbox.scale;
        let x2 = (anchor_cx + d[2] * step - letterbox.pad_x) / letterbox.scale;
        let y2 = (anchor_cy + d[3] * step - letterbox.pad_y) / letterbox.scale;

        detections.push(PixelBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            score,
        });
    }

    detections
}

/// Non-Maximum Suppression; output is sorted by descending score.
fn nms(mut detections: Vec<PixelBox>, iou_threshold: f32) -> Vec<PixelBox> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<PixelBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &PixelBox, b: &PixelBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(x: f32, y: f32, w: f32, h: f32, score: f32) -> PixelBox {
        PixelBox { x, y, width: w, height: h, score }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_box(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_box(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_box(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap 50, union 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_box(5.0, 5.0, 100.0, 100.0, 0.8),
            make_box(200.0, 200.0, 50.0, 50.0, 0.7),
            make_box(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].score - 0.9).abs() < 1e-6);
        assert!((result[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_decode_stride_maps_through_letterbox() {
        // 2x2 grid, 2 anchors per cell
        let input_size = 64;
        let stride = 32;
        let mut scores = vec![0.0f32; 8];
        scores[6] = 0.9; // anchor cell 3 -> (cx=1, cy=1)
        let mut bboxes = vec![0.0f32; 32];
        bboxes[24..28].copy_from_slice(&[0.5, 0.5, 0.5, 0.5]);

        let letterbox = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 8.0 };
        let dets = decode_stride(&scores, &bboxes, stride, input_size, &letterbox, 0.5);

        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        // Anchor (32, 32), edges ±16 -> [16, 48] in letterbox space
        assert!((d.x - 8.0).abs() < 1e-5);
        assert!((d.y - 4.0).abs() < 1e-5);
        assert!((d.width - 16.0).abs() < 1e-5);
        assert!((d.height - 16.0).abs() < 1e-5);
        assert!((d.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        // 256x192 into 64x64: scale 0.25, 64x48 content, 8 rows of padding top and bottom
        let image = RgbImage::from_pixel(256, 192, image::Rgb([255, 255, 255]));
        let (tensor, info) = letterbox(&image, 64);

        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!(info.scale, 0.25);
        assert_eq!((info.pad_x, info.pad_y), (0.0, 8.0));
        let white = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert_eq!(tensor[[0, 0, 7, 10]], 0.0);
        assert_eq!(tensor[[0, 1, 8, 10]], white);
        assert_eq!(tensor[[0, 2, 55, 63]], white);
        assert_eq!(tensor[[0, 0, 56, 10]], 0.0);

        // Box [16, 48] in letterbox space decodes to source pixels (64, 32)..(192, 192)
        let mut scores = vec![0.0f32; 8];
        scores[6] = 0.9;
        let mut bboxes = vec![0.0f32; 32];
        bboxes[24..28].copy_from_slice(&[0.5, 0.5, 0.5, 0.5]);
        let dets = decode_stride(&scores, &bboxes, 32, 64, &info, 0.5);

        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - 64.0).abs() < 1e-4);
        assert!((d.y - 32.0).abs() < 1e-4);
        assert!((d.width - 128.0).abs() < 1e-4);
        assert!((d.height - 128.0).abs() < 1e-4);

        // And the decoded source corner maps forward onto the letterbox corner
        assert_eq!(d.x * info.scale + info.pad_x, 16.0);
        assert_eq!(d.y * info.scale + info.pad_y, 16.0);
    }

    #[test]
    fn test_decode_stride_respects_threshold() {
        let scores = vec![0.3f32; 8];
        let bboxes = vec![1.0f32; 32];
        let letterbox = LetterboxInfo { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        assert!(decode_stride(&scores, &bboxes, 32, 64, &letterbox, 0.5).is_empty());
        assert_eq!(decode_stride(&scores, &bboxes, 32, 64, &letterbox, 0.3).len(), 8);
    }

    #[test]
    fn test_to_relative() {
        let b = make_box(32.0, 24.0, 64.0, 48.0, 0.8);
        let rel = to_relative(&b, 320, 240);
        assert!((rel.x - 0.1).abs() < 1e-6);
        assert!((rel.y - 0.1).abs() < 1e-6);
        assert!((rel.width - 0.2).abs() < 1e-6);
        assert!((rel.height - 0.2).abs() < 1e-6);
        assert_eq!(rel.confidence, 0.8);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(2, 0), (5, 3), (8, 6)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }
}
