//! Caller-owned session object tying ingest, detection, and landmarks
//! together.
//!
//! An [`Engine`] holds the loaded detector, the loaded landmark model, and
//! the most recently ingested image. Detection and landmark calls always
//! run against that image; there is no snapshotting. Operations take
//! `&mut self`, so a single engine is inherently single-threaded — callers
//! wanting parallelism construct independent engines.

use crate::detector::{DetectorError, FaceDetector};
use crate::image_buffer::{IngestError, PixelBuffer};
use crate::landmarks::{LandmarkError, LandmarkPredictor};
use crate::types::{FaceRect, Landmark};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmark error: {0}")]
    Landmark(#[from] LandmarkError),
    #[error("no face detector loaded")]
    DetectorNotLoaded,
    #[error("no landmark model loaded")]
    LandmarksNotLoaded,
    #[error("no image has been set")]
    NoImage,
}

/// Face detection and landmark session.
pub struct Engine {
    detector: Option<FaceDetector>,
    predictor: Option<LandmarkPredictor>,
    image: Option<PixelBuffer>,
}

impl Engine {
    /// Create an empty session: no detector, no landmark model, no image.
    pub fn new() -> Self {
        Self {
            detector: None,
            predictor: None,
            image: None,
        }
    }

    /// Load the face detector from an SCRFD ONNX model file.
    ///
    /// Repeat calls replace the previous detector; its resources are
    /// released on replacement.
    pub fn load_detector(&mut self, model_path: &str) -> Result<(), EngineError> {
        self.detector = Some(FaceDetector::load(model_path)?);
        Ok(())
    }

    /// Load the landmark model from a file path.
    pub fn load_landmarks(&mut self, model_path: &str) -> Result<(), EngineError> {
        self.predictor = Some(LandmarkPredictor::load(model_path)?);
        Ok(())
    }

    /// Set the session image from an in-memory BMP file.
    pub fn set_image_bmp(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        self.replace_image(PixelBuffer::from_bmp(bytes))
    }

    /// Set the session image from a packed RGB buffer.
    pub fn set_image_rgb(
        &mut self,
        bytes: &[u8],
        width: u32,
        height: u32,
        flip: bool,
    ) -> Result<(), EngineError> {
        self.replace_image(PixelBuffer::from_rgb(bytes, width, height, flip))
    }

    /// Set the session image from a packed RGBA buffer. Alpha is discarded.
    pub fn set_image_rgba(
        &mut self,
        bytes: &[u8],
        width: u32,
        height: u32,
        flip: bool,
    ) -> Result<(), EngineError> {
        self.replace_image(PixelBuffer::from_rgba(bytes, width, height, flip))
    }

    /// A failed ingest clears the previous image, so a later detect call
    /// can never silently run against a stale frame.
    fn replace_image(&mut self, ingested: Result<PixelBuffer, IngestError>) -> Result<(), EngineError> {
        match ingested {
            Ok(buffer) => {
                tracing::debug!(
                    width = buffer.width(),
                    height = buffer.height(),
                    "session image replaced"
                );
                self.image = Some(buffer);
                Ok(())
            }
            Err(e) => {
                self.image = None;
                Err(e.into())
            }
        }
    }

    /// The current session image, if one has been ingested.
    pub fn image(&self) -> Option<&PixelBuffer> {
        self.image.as_ref()
    }

    /// Detect faces in the current image.
    ///
    /// Zero faces is a valid, non-error result. Fails explicitly when no
    /// detector is loaded or no image has been set.
    pub fn detect_faces(&mut self) -> Result<Vec<FaceRect>, EngineError> {
        let detector = self.detector.as_mut().ok_or(EngineError::DetectorNotLoaded)?;
        let image = self.image.as_ref().ok_or(EngineError::NoImage)?;

        let started = Instant::now();
        let faces = detector.detect(image)?;
        tracing::debug!(
            faces = faces.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "face detection complete"
        );
        Ok(faces)
    }

    /// Predict landmarks for one face box against the current image.
    ///
    /// The box may come from [`detect_faces`](Self::detect_faces) or be
    /// caller-constructed; it is clamped to the image before inference.
    pub fn detect_landmarks(&mut self, face: &FaceRect) -> Result<Vec<Landmark>, EngineError> {
        let predictor = self.predictor.as_mut().ok_or(EngineError::LandmarksNotLoaded)?;
        let image = self.image.as_ref().ok_or(EngineError::NoImage)?;

        let started = Instant::now();
        let points = predictor.predict(image, face)?;
        tracing::debug!(
            points = points.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "landmark prediction complete"
        );
        Ok(points)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
