//! Detection + encoding pipeline shared by enrollment and live capture.

use crate::detector::{DetectorError, FaceDetector};
use crate::encoder::{EncoderError, FaceEncoder};
use crate::types::{BoundingBox, Descriptor};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
}

/// Face detection and descriptor extraction over one pair of ONNX models.
pub struct FacePipeline {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl FacePipeline {
    pub fn new(detector: FaceDetector, encoder: FaceEncoder) -> Self {
        Self { detector, encoder }
    }

    /// Load both models, failing fast on either.
    pub fn load(detector_path: &str, encoder_path: &str) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(detector_path)?;
        let encoder = FaceEncoder::load(encoder_path)?;
        Ok(Self::new(detector, encoder))
    }

    /// Detect all faces in a grayscale frame.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, PipelineError> {
        Ok(self.detector.detect(frame, width, height)?)
    }

    /// Extract the descriptor for one detected face.
    pub fn descriptor(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Descriptor, PipelineError> {
        Ok(self.encoder.extract(frame, width, height, face)?)
    }

    /// Descriptor for an enrollment still.
    ///
    /// Finding no face is a normal outcome (`Ok(None)`), not an error.
    /// When several faces are present, the highest-confidence one is used.
    pub fn descriptor_from_still(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Descriptor>, PipelineError> {
        let faces = self.detect(frame, width, height)?;
        let Some(best) = faces
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        else {
            return Ok(None);
        };

        Ok(Some(self.encoder.extract(frame, width, height, best)?))
    }
}
