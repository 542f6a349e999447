//! ArcFace descriptor extraction.
//!
//! Crops a detected face out of the frame, resizes it to the canonical
//! 112×112 input, and runs the w600k_r50 ArcFace model to produce an
//! L2-normalized 512-dimensional descriptor.

use crate::types::{BoundingBox, Descriptor};
use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ENCODER_INPUT_SIZE: u32 = 112;
const ENCODER_MEAN: f32 = 127.5;
const ENCODER_STD: f32 = 127.5;
const DESCRIPTOR_DIM: usize = 512;
/// Extra context around the detection box, as a fraction of its size.
const CROP_MARGIN: f32 = 0.125;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is empty (box outside the frame)")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based descriptor encoder.
pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EncoderError> {
        if !Path::new(model_path).exists() {
            return Err(EncoderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded face encoder model");

        Ok(Self { session })
    }

    /// Extract a descriptor for one detected face in a grayscale frame.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Descriptor, EncoderError> {
        let (cx, cy, cw, ch) = crop_region(face, width, height);
        if cw == 0 || ch == 0 {
            return Err(EncoderError::EmptyCrop);
        }

        let gray = GrayImage::from_raw(width, height, frame.to_vec())
            .ok_or_else(|| EncoderError::InferenceFailed("frame buffer too short".into()))?;
        let crop = image::imageops::crop_imm(&gray, cx, cy, cw, ch).to_image();
        let aligned = image::imageops::resize(
            &crop,
            ENCODER_INPUT_SIZE,
            ENCODER_INPUT_SIZE,
            FilterType::Triangle,
        );

        let input = preprocess(&aligned);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != DESCRIPTOR_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        Ok(Descriptor::new(l2_normalize(raw)))
    }
}

/// Expand the detection box by the crop margin and clamp it to the frame.
/// Returns `(x, y, width, height)` in whole pixels.
fn crop_region(face: &BoundingBox, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
    let margin_x = face.width * CROP_MARGIN;
    let margin_y = face.height * CROP_MARGIN;

    let x1 = (face.x - margin_x).max(0.0);
    let y1 = (face.y - margin_y).max(0.0);
    let x2 = (face.x + face.width + margin_x).min(frame_width as f32);
    let y2 = (face.y + face.height + margin_y).min(frame_height as f32);

    let x = x1.floor() as u32;
    let y = y1.floor() as u32;
    let w = (x2 - x1).floor().max(0.0) as u32;
    let h = (y2 - y1).floor().max(0.0) as u32;
    (x, y, w, h)
}

/// Preprocess a 112×112 grayscale crop into a 3-channel NCHW tensor with
/// symmetric (p − 127.5) / 127.5 normalization.
fn preprocess(aligned: &GrayImage) -> Array4<f32> {
    let side = ENCODER_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));

    for (x, y, pixel) in aligned.enumerate_pixels() {
        let normalized = (pixel.0[0] as f32 - ENCODER_MEAN) / ENCODER_STD;
        for channel in 0..3 {
            tensor[[0, channel, y as usize, x as usize]] = normalized;
        }
    }
    tensor
}

/// L2-normalize a raw embedding. Zero vectors are returned unchanged.
fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
