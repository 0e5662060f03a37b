//! Facial landmark predictor via ONNX Runtime.
//!
//! Runs a PFLD-style landmark model against a face crop and maps the
//! crop-normalized outputs back to image coordinates. How many points the
//! model produces, and which facial feature each index means, is defined
//! entirely by the loaded model file.

use crate::detector::resize_bilinear_rgb;
use crate::image_buffer::PixelBuffer;
use crate::types::{FaceRect, Landmark};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Square input side used by the common PFLD exports.
const DEFAULT_INPUT_SIZE: usize = 112;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("face region does not overlap the image")]
    RegionOutsideImage,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// PFLD-style landmark predictor.
pub struct LandmarkPredictor {
    session: Session,
    input_size: usize,
}

impl LandmarkPredictor {
    /// Load a landmark ONNX model expecting the common 112×112 input.
    pub fn load(model_path: &str) -> Result<Self, LandmarkError> {
        Self::load_with_input_size(model_path, DEFAULT_INPUT_SIZE)
    }

    /// Load a landmark ONNX model with a non-default square input side.
    pub fn load_with_input_size(
        model_path: &str,
        input_size: usize,
    ) -> Result<Self, LandmarkError> {
        if !Path::new(model_path).exists() {
            return Err(LandmarkError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            input_size,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded landmark model"
        );

        Ok(Self {
            session,
            input_size,
        })
    }

    /// Predict landmark positions for one face box.
    ///
    /// The box is clamped to the image; a box with no overlap at all fails
    /// with [`LandmarkError::RegionOutsideImage`] rather than running the
    /// model on an empty crop. Returned points are in image coordinates.
    pub fn predict(
        &mut self,
        image: &PixelBuffer,
        face: &FaceRect,
    ) -> Result<Vec<Landmark>, LandmarkError> {
        let region = face
            .intersect(image.width(), image.height())
            .ok_or(LandmarkError::RegionOutsideImage)?;

        let input = self.preprocess(image, &region);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmark extraction: {e}")))?;

        if raw.len() % 2 != 0 {
            return Err(LandmarkError::InferenceFailed(format!(
                "landmark output length {} is not a multiple of 2",
                raw.len()
            )));
        }

        let points = scale_to_region(raw, &region);
        tracing::debug!(count = points.len(), "landmarks predicted");
        Ok(points)
    }

    /// Crop the clamped region, resize it to the model input, and normalize
    /// pixel values to [0, 1] in an NCHW tensor.
    fn preprocess(&self, image: &PixelBuffer, region: &FaceRect) -> Array4<f32> {
        let crop = crop_rgb(image, region);
        let side = self.input_size;
        let resized = resize_bilinear_rgb(
            &crop,
            region.width() as usize,
            region.height() as usize,
            side,
            side,
        );

        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for y in 0..side {
            for x in 0..side {
                for ch in 0..3 {
                    tensor[[0, ch, y, x]] = resized[(y * side + x) * 3 + ch] as f32 / 255.0;
                }
            }
        }
        tensor
    }
}

/// Copy the region out of the image as a packed RGB buffer.
///
/// The region must already be clamped to the image bounds.
fn crop_rgb(image: &PixelBuffer, region: &FaceRect) -> Vec<u8> {
    let w = region.width() as usize;
    let h = region.height() as usize;
    let img_w = image.width() as usize;
    let data = image.data();

    let mut crop = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let y = region.top as usize + row;
        let start = (y * img_w + region.left as usize) * 3;
        crop.extend_from_slice(&data[start..start + w * 3]);
    }
    crop
}

/// Map crop-normalized model outputs ([x0, y0, x1, y1, ...] in [0, 1])
/// back to image coordinates within the clamped region.
fn scale_to_region(raw: &[f32], region: &FaceRect) -> Vec<Landmark> {
    let rw = region.width() as f32;
    let rh = region.height() as f32;

    raw.chunks_exact(2)
        .map(|xy| Landmark {
            x: (region.left as f32 + xy[0] * rw).round() as i32,
            y: (region.top as f32 + xy[1] * rh).round() as i32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> PixelBuffer {
        let mut bytes = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..width * height {
            bytes.extend_from_slice(&rgb);
        }
        PixelBuffer::from_rgb(&bytes, width, height, false).unwrap()
    }

    #[test]
    fn test_crop_dimensions() {
        let img = solid_image(20, 10, [5, 6, 7]);
        let region = FaceRect::new(2, 3, 12, 9);
        let crop = crop_rgb(&img, &region);
        assert_eq!(crop.len(), 10 * 6 * 3);
        assert!(crop.chunks(3).all(|px| px == [5, 6, 7]));
    }

    #[test]
    fn test_crop_copies_correct_pixels() {
        // Image where each pixel's red channel encodes x and green encodes y
        let mut bytes = Vec::new();
        for y in 0..8u8 {
            for x in 0..8u8 {
                bytes.extend_from_slice(&[x, y, 0]);
            }
        }
        let img = PixelBuffer::from_rgb(&bytes, 8, 8, false).unwrap();
        let crop = crop_rgb(&img, &FaceRect::new(3, 2, 6, 5));
        // first crop pixel should be image pixel (3, 2)
        assert_eq!(&crop[0..3], &[3, 2, 0]);
        // last crop pixel should be image pixel (5, 4)
        let n = crop.len();
        assert_eq!(&crop[n - 3..], &[5, 4, 0]);
    }

    #[test]
    fn test_scale_to_region_corners() {
        let region = FaceRect::new(10, 20, 110, 220);
        // normalized corners and center
        let raw = [0.0, 0.0, 1.0, 1.0, 0.5, 0.5];
        let points = scale_to_region(&raw, &region);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], Landmark { x: 10, y: 20 });
        assert_eq!(points[1], Landmark { x: 110, y: 220 });
        assert_eq!(points[2], Landmark { x: 60, y: 120 });
    }

    #[test]
    fn test_scale_to_region_dynamic_count() {
        let region = FaceRect::new(0, 0, 100, 100);
        // 68-point and 98-point outputs are both just flat 2N arrays
        for n in [5usize, 68, 98] {
            let raw = vec![0.5f32; n * 2];
            assert_eq!(scale_to_region(&raw, &region).len(), n);
        }
    }

    #[test]
    fn test_region_outside_image_detected_before_inference() {
        // intersect() is the gate predict() relies on; a fully-outside box
        // must produce None so predict maps it to RegionOutsideImage
        let face = FaceRect::new(500, 500, 600, 600);
        assert!(face.intersect(100, 100).is_none());
    }
}
