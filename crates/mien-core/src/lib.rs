//! mien-core — Pixel ingest, face detection, and landmark prediction.
//!
//! Converts caller-supplied pixel data (BMP bytes or raw RGB/RGBA arrays)
//! into a top-left-origin RGB buffer, runs SCRFD face detection and a
//! PFLD-style landmark predictor via ONNX Runtime, and hands results back
//! through a caller-owned [`Engine`] session object.

pub mod detector;
pub mod engine;
pub mod image_buffer;
pub mod landmarks;
pub mod types;

pub use engine::{Engine, EngineError};
pub use image_buffer::{IngestError, PixelBuffer};
pub use types::{FaceRect, Landmark};
