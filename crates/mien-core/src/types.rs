use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box for a detected face.
///
/// Coordinates are pixels in image space: top-left origin, x right, y down.
/// `right` and `bottom` are exclusive, so `width = right - left`. Values may
/// fall outside the image for faces detected at the border.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl FaceRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Width in pixels; zero for degenerate rects.
    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    /// Height in pixels; zero for degenerate rects.
    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    /// Clamp this rect to a `width` × `height` image.
    ///
    /// Returns `None` when the rect has no overlap with the image at all,
    /// or is empty to begin with.
    pub fn intersect(&self, width: u32, height: u32) -> Option<FaceRect> {
        let left = self.left.max(0);
        let top = self.top.max(0);
        let right = self.right.min(width as i32);
        let bottom = self.bottom.min(height as i32);
        if left >= right || top >= bottom {
            return None;
        }
        Some(FaceRect {
            left,
            top,
            right,
            bottom,
        })
    }
}

/// A single facial landmark point, in the same image space as [`FaceRect`].
///
/// Which point corresponds to which facial feature is defined entirely by
/// the loaded landmark model.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: i32,
    pub y: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_dimensions() {
        let r = FaceRect::new(10, 20, 50, 80);
        assert_eq!(r.width(), 40);
        assert_eq!(r.height(), 60);
    }

    #[test]
    fn test_degenerate_rect_has_zero_size() {
        let r = FaceRect::new(50, 80, 10, 20);
        assert_eq!(r.width(), 0);
        assert_eq!(r.height(), 0);
    }

    #[test]
    fn test_intersect_inside() {
        let r = FaceRect::new(10, 10, 40, 40);
        assert_eq!(r.intersect(100, 100), Some(r));
    }

    #[test]
    fn test_intersect_clamps_to_image() {
        let r = FaceRect::new(-20, -10, 150, 90);
        let clamped = r.intersect(100, 80).unwrap();
        assert_eq!(clamped, FaceRect::new(0, 0, 100, 80));
    }

    #[test]
    fn test_intersect_outside_is_none() {
        let r = FaceRect::new(200, 200, 250, 250);
        assert!(r.intersect(100, 100).is_none());
    }

    #[test]
    fn test_intersect_empty_is_none() {
        let r = FaceRect::new(50, 50, 50, 80);
        assert!(r.intersect(100, 100).is_none());
    }
}
