//! mien — C-linkage surface over the face detection and landmark engine.
//!
//! Designed for managed hosts (game engines, .NET) that P/Invoke into a
//! native library. Every operation takes an opaque engine handle created by
//! [`mien_engine_new`]; there is no hidden process-wide state, and multiple
//! engines may coexist.
//!
//! # Ownership
//!
//! Inbound pixel buffers and paths are borrowed for the duration of a call;
//! the caller keeps ownership. Outbound result arrays are single contiguous
//! allocations transferred to the caller, who must release them with the
//! matching `mien_*_free` routine. Zero-result calls set the count output to
//! zero and null the array pointer — check the count before dereferencing.
//!
//! # Safety
//!
//! All Rust logic is wrapped in `catch_unwind` — a panic unwinding across
//! the `extern "C"` boundary is undefined behavior. A caught panic is
//! reported as [`MienStatus::Panic`].
//!
//! Statuses are returned as [`MienStatus`], with `Ok = 0`, so hosts can
//! assert on the specific failure kind (truncated input vs malformed format
//! vs not-initialized) rather than a bare boolean.

// Enforce explicit `unsafe {}` blocks inside `unsafe fn` bodies — catches
// the Rust 2024 edition change before it lands.
#![warn(unsafe_op_in_unsafe_fn)]

use std::ffi::CStr;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Once;

use libc::c_char;
use mien_core::image_buffer::IngestError;
use mien_core::landmarks::LandmarkError;
use mien_core::{Engine, EngineError, FaceRect, Landmark};

/// Opaque engine handle. Create with [`mien_engine_new`], release with
/// [`mien_engine_free`]. Not synchronized — callers sharing a handle across
/// threads must provide their own mutual exclusion.
pub struct MienEngine {
    inner: Engine,
}

/// Axis-aligned face bounding box: pixel coordinates, top-left origin,
/// `right`/`bottom` exclusive.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MienRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// A single landmark point in image coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MienPoint {
    pub x: i32,
    pub y: i32,
}

/// Status code returned by every fallible entry point. `Ok` is zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MienStatus {
    Ok = 0,
    /// A required pointer argument was null.
    NullArgument = 1,
    /// A path argument was not valid UTF-8.
    InvalidUtf8Path = 2,
    /// The detector model could not be loaded.
    DetectorLoadFailed = 3,
    /// The landmark model could not be loaded.
    ModelLoadFailed = 4,
    /// The BMP byte stream was malformed or truncated.
    DecodeFailed = 5,
    /// A raw pixel buffer was shorter than width × height × stride.
    TruncatedInput = 6,
    /// Width or height was zero.
    ZeroDimensions = 7,
    /// Detection was requested before a detector was loaded.
    DetectorNotLoaded = 8,
    /// Landmarks were requested before a landmark model was loaded.
    LandmarksNotLoaded = 9,
    /// Detection or landmarks were requested before an image was set.
    NoImage = 10,
    /// The face box passed to landmark prediction does not overlap the image.
    RegionOutsideImage = 11,
    /// Model inference failed.
    InferenceFailed = 12,
    /// A panic was caught at the FFI boundary.
    Panic = 13,
}

fn status_of(err: &EngineError) -> MienStatus {
    match err {
        EngineError::Ingest(IngestError::Decode(_)) => MienStatus::DecodeFailed,
        EngineError::Ingest(IngestError::Truncated { .. }) => MienStatus::TruncatedInput,
        EngineError::Ingest(IngestError::ZeroDimensions) => MienStatus::ZeroDimensions,
        EngineError::Landmark(LandmarkError::RegionOutsideImage) => MienStatus::RegionOutsideImage,
        EngineError::Landmark(_) => MienStatus::InferenceFailed,
        EngineError::Detector(_) => MienStatus::InferenceFailed,
        EngineError::DetectorNotLoaded => MienStatus::DetectorNotLoaded,
        EngineError::LandmarksNotLoaded => MienStatus::LandmarksNotLoaded,
        EngineError::NoImage => MienStatus::NoImage,
    }
}

impl From<FaceRect> for MienRect {
    fn from(r: FaceRect) -> Self {
        Self {
            left: r.left,
            top: r.top,
            right: r.right,
            bottom: r.bottom,
        }
    }
}

impl From<MienRect> for FaceRect {
    fn from(r: MienRect) -> Self {
        Self {
            left: r.left,
            top: r.top,
            right: r.right,
            bottom: r.bottom,
        }
    }
}

impl From<Landmark> for MienPoint {
    fn from(p: Landmark) -> Self {
        Self { x: p.x, y: p.y }
    }
}

/// Transfer a result vector to the caller as one contiguous allocation.
///
/// # Safety
///
/// `out_ptr` and `out_count` must be valid, writable pointers.
unsafe fn export_vec<T>(items: Vec<T>, out_ptr: *mut *mut T, out_count: *mut usize) {
    // SAFETY: out params were null-checked by the caller.
    unsafe {
        *out_count = items.len();
        if items.is_empty() {
            *out_ptr = ptr::null_mut();
        } else {
            let boxed: Box<[T]> = items.into_boxed_slice();
            *out_ptr = Box::into_raw(boxed) as *mut T;
        }
    }
}

/// Reclaim an array previously exported by [`export_vec`].
///
/// # Safety
///
/// `array` must be a pointer returned by a `mien_detect_*` call with exactly
/// this `count`, not freed before.
unsafe fn free_exported<T>(array: *mut T, count: usize) {
    if array.is_null() || count == 0 {
        return;
    }
    // SAFETY: the pointer and length reconstruct the original Box<[T]>.
    unsafe {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(array, count)));
    }
}

/// Borrow a NUL-terminated path argument as UTF-8.
///
/// # Safety
///
/// `path` must be non-null and point to a NUL-terminated string valid for
/// the duration of the call.
unsafe fn path_arg<'a>(path: *const c_char) -> Result<&'a str, MienStatus> {
    // SAFETY: caller guarantees a valid NUL-terminated string.
    unsafe { CStr::from_ptr(path) }
        .to_str()
        .map_err(|_| MienStatus::InvalidUtf8Path)
}

/// Install a stderr `tracing` subscriber governed by `RUST_LOG`.
///
/// Optional: hosts that want the library's logs call this once at startup.
/// Repeat calls are no-ops.
#[no_mangle]
pub extern "C" fn mien_init_tracing() -> MienStatus {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
    MienStatus::Ok
}

/// Create a new, empty engine: no detector, no landmark model, no image.
///
/// Returns null only if construction panicked.
#[no_mangle]
pub extern "C" fn mien_engine_new() -> *mut MienEngine {
    match panic::catch_unwind(AssertUnwindSafe(|| {
        Box::new(MienEngine {
            inner: Engine::new(),
        })
    })) {
        Ok(engine) => Box::into_raw(engine),
        Err(_) => ptr::null_mut(),
    }
}

/// Destroy an engine handle. Passing null is a no-op.
///
/// # Safety
///
/// `engine` must be a pointer returned by [`mien_engine_new`] and must not
/// be used after this call.
#[no_mangle]
pub unsafe extern "C" fn mien_engine_free(engine: *mut MienEngine) {
    if engine.is_null() {
        return;
    }
    // SAFETY: the handle was created by Box::into_raw in mien_engine_new.
    let _ = panic::catch_unwind(AssertUnwindSafe(|| drop(unsafe { Box::from_raw(engine) })));
}

/// Load the face detector from an SCRFD ONNX model file.
///
/// # Safety
///
/// `engine` must be a live handle from [`mien_engine_new`]; `path` must be a
/// valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn mien_load_detector(
    engine: *mut MienEngine,
    path: *const c_char,
) -> MienStatus {
    if engine.is_null() || path.is_null() {
        return MienStatus::NullArgument;
    }
    panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: engine is a live handle per the caller contract.
        let engine = unsafe { &mut (*engine).inner };
        // SAFETY: path is a valid NUL-terminated string per the contract.
        let path = match unsafe { path_arg(path) } {
            Ok(p) => p,
            Err(status) => return status,
        };
        match engine.load_detector(path) {
            Ok(()) => MienStatus::Ok,
            Err(e) => {
                tracing::warn!(error = %e, "detector load failed");
                MienStatus::DetectorLoadFailed
            }
        }
    }))
    .unwrap_or(MienStatus::Panic)
}

/// Load the landmark model from a file path.
///
/// # Safety
///
/// Same contract as [`mien_load_detector`].
#[no_mangle]
pub unsafe extern "C" fn mien_load_landmarks(
    engine: *mut MienEngine,
    path: *const c_char,
) -> MienStatus {
    if engine.is_null() || path.is_null() {
        return MienStatus::NullArgument;
    }
    panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: engine is a live handle per the caller contract.
        let engine = unsafe { &mut (*engine).inner };
        // SAFETY: path is a valid NUL-terminated string per the contract.
        let path = match unsafe { path_arg(path) } {
            Ok(p) => p,
            Err(status) => return status,
        };
        match engine.load_landmarks(path) {
            Ok(()) => MienStatus::Ok,
            Err(e) => {
                tracing::warn!(error = %e, "landmark model load failed");
                MienStatus::ModelLoadFailed
            }
        }
    }))
    .unwrap_or(MienStatus::Panic)
}

/// Set the engine image from an in-memory BMP file.
///
/// On failure the engine's previous image is cleared, never silently kept.
///
/// # Safety
///
/// `engine` must be a live handle; `bytes` must point to `len` readable
/// bytes for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn mien_set_image_bmp(
    engine: *mut MienEngine,
    bytes: *const u8,
    len: usize,
) -> MienStatus {
    if engine.is_null() || bytes.is_null() {
        return MienStatus::NullArgument;
    }
    panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: engine is a live handle; bytes spans len readable bytes.
        let engine = unsafe { &mut (*engine).inner };
        let data = unsafe { std::slice::from_raw_parts(bytes, len) };
        match engine.set_image_bmp(data) {
            Ok(()) => MienStatus::Ok,
            Err(e) => status_of(&e),
        }
    }))
    .unwrap_or(MienStatus::Panic)
}

/// Set the engine image from a packed RGB buffer.
///
/// `len` is the caller's actual buffer length; returns `TruncatedInput`
/// when it is shorter than `width * height * 3`. With `flip` set, input row
/// `r` lands at row `height - 1 - r` (bottom-left-origin textures pass
/// `true`).
///
/// # Safety
///
/// Same contract as [`mien_set_image_bmp`].
#[no_mangle]
pub unsafe extern "C" fn mien_set_image_rgb(
    engine: *mut MienEngine,
    bytes: *const u8,
    len: usize,
    width: u32,
    height: u32,
    flip: bool,
) -> MienStatus {
    if engine.is_null() || bytes.is_null() {
        return MienStatus::NullArgument;
    }
    panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: engine is a live handle; bytes spans len readable bytes.
        let engine = unsafe { &mut (*engine).inner };
        let data = unsafe { std::slice::from_raw_parts(bytes, len) };
        match engine.set_image_rgb(data, width, height, flip) {
            Ok(()) => MienStatus::Ok,
            Err(e) => status_of(&e),
        }
    }))
    .unwrap_or(MienStatus::Panic)
}

/// Set the engine image from a packed RGBA buffer. The alpha byte is read
/// and discarded, never composited.
///
/// # Safety
///
/// Same contract as [`mien_set_image_bmp`].
#[no_mangle]
pub unsafe extern "C" fn mien_set_image_rgba(
    engine: *mut MienEngine,
    bytes: *const u8,
    len: usize,
    width: u32,
    height: u32,
    flip: bool,
) -> MienStatus {
    if engine.is_null() || bytes.is_null() {
        return MienStatus::NullArgument;
    }
    panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: engine is a live handle; bytes spans len readable bytes.
        let engine = unsafe { &mut (*engine).inner };
        let data = unsafe { std::slice::from_raw_parts(bytes, len) };
        match engine.set_image_rgba(data, width, height, flip) {
            Ok(()) => MienStatus::Ok,
            Err(e) => status_of(&e),
        }
    }))
    .unwrap_or(MienStatus::Panic)
}

/// Detect faces in the current image.
///
/// On success `*out_faces` receives a contiguous caller-owned array of
/// `*out_count` rects (null when the count is zero — zero faces is a valid
/// result, not an error). Free with [`mien_faces_free`]. Both outputs are
/// zeroed on every failure path.
///
/// # Safety
///
/// `engine` must be a live handle; `out_faces` and `out_count` must be
/// valid, writable pointers.
#[no_mangle]
pub unsafe extern "C" fn mien_detect_faces(
    engine: *mut MienEngine,
    out_faces: *mut *mut MienRect,
    out_count: *mut usize,
) -> MienStatus {
    if engine.is_null() || out_faces.is_null() || out_count.is_null() {
        return MienStatus::NullArgument;
    }
    panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: out params were null-checked above.
        unsafe {
            *out_faces = ptr::null_mut();
            *out_count = 0;
        }
        // SAFETY: engine is a live handle per the caller contract.
        let engine = unsafe { &mut (*engine).inner };
        match engine.detect_faces() {
            Ok(faces) => {
                let rects: Vec<MienRect> = faces.into_iter().map(MienRect::from).collect();
                // SAFETY: out params were null-checked above.
                unsafe { export_vec(rects, out_faces, out_count) };
                MienStatus::Ok
            }
            Err(e) => status_of(&e),
        }
    }))
    .unwrap_or(MienStatus::Panic)
}

/// Predict landmarks for one face box against the current image.
///
/// The box may come from [`mien_detect_faces`] or be caller-constructed; a
/// box with no overlap with the image fails with `RegionOutsideImage`. The
/// point count is defined by the loaded model — treat it as dynamic. Free
/// the array with [`mien_points_free`].
///
/// # Safety
///
/// Same contract as [`mien_detect_faces`].
#[no_mangle]
pub unsafe extern "C" fn mien_detect_landmarks(
    engine: *mut MienEngine,
    face: MienRect,
    out_points: *mut *mut MienPoint,
    out_count: *mut usize,
) -> MienStatus {
    if engine.is_null() || out_points.is_null() || out_count.is_null() {
        return MienStatus::NullArgument;
    }
    panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: out params were null-checked above.
        unsafe {
            *out_points = ptr::null_mut();
            *out_count = 0;
        }
        // SAFETY: engine is a live handle per the caller contract.
        let engine = unsafe { &mut (*engine).inner };
        match engine.detect_landmarks(&face.into()) {
            Ok(points) => {
                let points: Vec<MienPoint> = points.into_iter().map(MienPoint::from).collect();
                // SAFETY: out params were null-checked above.
                unsafe { export_vec(points, out_points, out_count) };
                MienStatus::Ok
            }
            Err(e) => status_of(&e),
        }
    }))
    .unwrap_or(MienStatus::Panic)
}

/// Legacy one-shot composition: decode a BMP and detect faces in it.
///
/// Kept for hosts built against the historical surface. On decode failure
/// the outputs stay zeroed and the decode status is returned.
///
/// # Safety
///
/// Combines the contracts of [`mien_set_image_bmp`] and
/// [`mien_detect_faces`].
#[no_mangle]
#[deprecated(note = "use mien_set_image_bmp followed by mien_detect_faces")]
pub unsafe extern "C" fn mien_detect_faces_bmp(
    engine: *mut MienEngine,
    bytes: *const u8,
    len: usize,
    out_faces: *mut *mut MienRect,
    out_count: *mut usize,
) -> MienStatus {
    if out_faces.is_null() || out_count.is_null() {
        return MienStatus::NullArgument;
    }
    // SAFETY: out params were null-checked above.
    unsafe {
        *out_faces = ptr::null_mut();
        *out_count = 0;
    }
    // SAFETY: forwarded caller contract.
    let status = unsafe { mien_set_image_bmp(engine, bytes, len) };
    if status != MienStatus::Ok {
        return status;
    }
    // SAFETY: forwarded caller contract.
    unsafe { mien_detect_faces(engine, out_faces, out_count) }
}

/// Free a face array returned by [`mien_detect_faces`]. Null/zero is a
/// no-op.
///
/// # Safety
///
/// `faces` must be a pointer produced by [`mien_detect_faces`] with exactly
/// this `count`, freed at most once.
#[no_mangle]
pub unsafe extern "C" fn mien_faces_free(faces: *mut MienRect, count: usize) {
    // SAFETY: forwarded caller contract.
    unsafe { free_exported(faces, count) }
}

/// Free a landmark array returned by [`mien_detect_landmarks`]. Null/zero
/// is a no-op.
///
/// # Safety
///
/// `points` must be a pointer produced by [`mien_detect_landmarks`] with
/// exactly this `count`, freed at most once.
#[no_mangle]
pub unsafe extern "C" fn mien_points_free(points: *mut MienPoint, count: usize) {
    // SAFETY: forwarded caller contract.
    unsafe { free_exported(points, count) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_discriminants_are_stable() {
        // These values are ABI: hosts hard-code them. Renumbering is a break.
        assert_eq!(MienStatus::Ok as i32, 0);
        assert_eq!(MienStatus::NullArgument as i32, 1);
        assert_eq!(MienStatus::InvalidUtf8Path as i32, 2);
        assert_eq!(MienStatus::DetectorLoadFailed as i32, 3);
        assert_eq!(MienStatus::ModelLoadFailed as i32, 4);
        assert_eq!(MienStatus::DecodeFailed as i32, 5);
        assert_eq!(MienStatus::TruncatedInput as i32, 6);
        assert_eq!(MienStatus::ZeroDimensions as i32, 7);
        assert_eq!(MienStatus::DetectorNotLoaded as i32, 8);
        assert_eq!(MienStatus::LandmarksNotLoaded as i32, 9);
        assert_eq!(MienStatus::NoImage as i32, 10);
        assert_eq!(MienStatus::RegionOutsideImage as i32, 11);
        assert_eq!(MienStatus::InferenceFailed as i32, 12);
        assert_eq!(MienStatus::Panic as i32, 13);
    }

    #[test]
    fn record_layouts_match_the_abi() {
        // 4 × i32 and 2 × i32, no padding.
        assert_eq!(std::mem::size_of::<MienRect>(), 16);
        assert_eq!(std::mem::size_of::<MienPoint>(), 8);
    }

    #[test]
    fn export_vec_roundtrip() {
        let rects = vec![
            MienRect { left: 1, top: 2, right: 3, bottom: 4 },
            MienRect { left: 5, top: 6, right: 7, bottom: 8 },
        ];
        let mut out_ptr: *mut MienRect = ptr::null_mut();
        let mut out_count: usize = 0;

        unsafe {
            export_vec(rects.clone(), &mut out_ptr, &mut out_count);
            assert_eq!(out_count, 2);
            assert!(!out_ptr.is_null());
            let exported = std::slice::from_raw_parts(out_ptr, out_count);
            assert_eq!(exported, rects.as_slice());
            free_exported(out_ptr, out_count);
        }
    }

    #[test]
    fn export_vec_empty_yields_null() {
        let mut out_ptr: *mut MienPoint = ptr::null_mut();
        let mut out_count: usize = 99;
        unsafe {
            export_vec(Vec::new(), &mut out_ptr, &mut out_count);
        }
        assert!(out_ptr.is_null());
        assert_eq!(out_count, 0);
    }

    #[test]
    fn free_exported_null_is_noop() {
        unsafe {
            free_exported::<MienRect>(ptr::null_mut(), 0);
            free_exported::<MienRect>(ptr::null_mut(), 7);
        }
    }
}
