//! ONNX face detector.
//!
//! Runs a single-output face detection model (one `[x1, y1, x2, y2, score]`
//! row per candidate, coordinates normalized to the frame) and applies
//! greedy non-maximum suppression to the surviving candidates.

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DETECTOR_INPUT_SIZE: u32 = 640;
const DETECTION_ROW_LEN: usize = 5;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ONNX-backed face detector.
pub struct FaceDetector {
    session: Session,
    confidence_threshold: f32,
}

impl FaceDetector {
    /// Load the detection model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face detection model"
        );

        Ok(Self {
            session,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        })
    }

    /// Override the detection confidence threshold.
    pub fn with_confidence(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Detect faces in a grayscale frame.
    ///
    /// Returns bounding boxes in frame pixel coordinates, sorted by
    /// descending confidence. An empty vector means no face was found.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let gray = GrayImage::from_raw(width, height, frame.to_vec())
            .ok_or_else(|| DetectorError::InferenceFailed("frame buffer too short".into()))?;
        let input = preprocess(&gray);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detection output: {e}")))?;

        let candidates =
            decode_detections(raw, self.confidence_threshold, width as f32, height as f32);
        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Resize a grayscale frame to the model input and expand it into a
/// 3-channel NCHW tensor scaled to [0, 1].
fn preprocess(gray: &GrayImage) -> Array4<f32> {
    let size = DETECTOR_INPUT_SIZE;
    let resized = image::imageops::resize(gray, size, size, FilterType::Triangle);

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let value = pixel.0[0] as f32 / 255.0;
        for channel in 0..3 {
            tensor[[0, channel, y as usize, x as usize]] = value;
        }
    }
    tensor
}

/// Decode raw `[x1, y1, x2, y2, score]` rows into frame-space boxes.
///
/// Coordinates are normalized to [0, 1]; rows below the confidence
/// threshold and degenerate boxes are dropped.
fn decode_detections(
    raw: &[f32],
    confidence_threshold: f32,
    frame_width: f32,
    frame_height: f32,
) -> Vec<BoundingBox> {
    let mut boxes = Vec::new();

    for row in raw.chunks_exact(DETECTION_ROW_LEN) {
        let score = row[4];
        if score < confidence_threshold {
            continue;
        }

        let x1 = row[0].clamp(0.0, 1.0);
        let y1 = row[1].clamp(0.0, 1.0);
        let x2 = row[2].clamp(0.0, 1.0);
        let y2 = row[3].clamp(0.0, 1.0);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        boxes.push(BoundingBox {
            x: x1 * frame_width,
            y: y1 * frame_height,
            width: (x2 - x1) * frame_width,
            height: (y2 - y1) * frame_height,
            confidence: score,
        });
    }

    boxes
}

/// Greedy non-maximum suppression: keep the highest-confidence box of
/// each overlapping cluster.
fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_filters_by_confidence() {
        // Two rows: one confident, one not.
        let raw = [
            0.1, 0.1, 0.3, 0.3, 0.9, //
            0.5, 0.5, 0.7, 0.7, 0.2,
        ];
        let boxes = decode_detections(&raw, 0.5, 640.0, 480.0);
        assert_eq!(boxes.len(), 1);
        assert!((boxes[0].x - 64.0).abs() < 1e-3);
        assert!((boxes[0].y - 48.0).abs() < 1e-3);
        assert!((boxes[0].width - 128.0).abs() < 1e-3);
        assert!((boxes[0].height - 96.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_drops_degenerate_boxes() {
        let raw = [0.5, 0.5, 0.5, 0.7, 0.9]; // zero width
        assert!(decode_detections(&raw, 0.5, 640.0, 480.0).is_empty());
    }

    #[test]
    fn test_decode_clamps_out_of_range_coordinates() {
        let raw = [-0.1, -0.1, 1.2, 1.2, 0.9];
        let boxes = decode_detections(&raw, 0.5, 100.0, 100.0);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].x, 0.0);
        assert_eq!(boxes[0].width, 100.0);
    }

    #[test]
    fn test_decode_empty_output() {
        assert!(decode_detections(&[], 0.5, 640.0, 480.0).is_empty());
    }

    #[test]
    fn test_iou_disjoint_boxes() {
        let a = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence: 1.0,
        };
        let b = BoundingBox {
            x: 20.0,
            y: 20.0,
            width: 10.0,
            height: 10.0,
            confidence: 1.0,
        };
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_identical_boxes() {
        let a = BoundingBox {
            x: 5.0,
            y: 5.0,
            width: 10.0,
            height: 10.0,
            confidence: 1.0,
        };
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping_lower_confidence() {
        let strong = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence: 0.9,
        };
        let overlapping = BoundingBox {
            x: 1.0,
            y: 1.0,
            width: 10.0,
            height: 10.0,
            confidence: 0.8,
        };
        let separate = BoundingBox {
            x: 100.0,
            y: 100.0,
            width: 10.0,
            height: 10.0,
            confidence: 0.7,
        };

        let kept = non_max_suppression(vec![overlapping, separate, strong], 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let gray = GrayImage::from_raw(4, 4, vec![255u8; 16]).unwrap();
        let tensor = preprocess(&gray);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        let value = tensor[[0, 0, 0, 0]];
        assert!((value - 1.0).abs() < 1e-6);
        // All three channels carry the same grayscale value.
        assert_eq!(tensor[[0, 0, 0, 0]], tensor[[0, 2, 0, 0]]);
    }
}
