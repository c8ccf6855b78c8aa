//! Common types for alphastack.
//!
//! This crate defines the data model shared by the layout engine, the GPU
//! resource manager and the player: source frame descriptors, container
//! geometry, fit results and the error types surfaced to callers.
//!
//! # Stacked-alpha frames
//!
//! A stacked-alpha video frame carries the color image in its top half and a
//! grayscale alpha mask in its bottom half. The *decoded* visual size is the
//! raw width and half the raw height:
//!
//! ```
//! use common::SourceFrame;
//!
//! let frame = SourceFrame::from_raw(1920, 1080).unwrap();
//! assert_eq!((frame.width, frame.height), (1920, 540));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while setting up the GPU program for a surface.
///
/// Fatal to the surface: the caller gets the error synchronously and no GPU
/// resources are left behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuInitError {
    #[error("Couldn't create GPU context: {0}")]
    Context(String),

    #[error("{stage} shader failed to compile: {log}")]
    ShaderCompile { stage: ShaderStage, log: String },

    #[error("Program failed to link: {0}")]
    ProgramLink(String),

    #[error("Failed to allocate {resource}: {reason}")]
    Allocation {
        resource: &'static str,
        reason: String,
    },
}

/// Failure reported by a GPU backend call.
///
/// Carries the backend's diagnostic (compiler log, adapter error, ...).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for BackendError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for BackendError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Programmable pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => write!(f, "Vertex"),
            Self::Fragment => write!(f, "Fragment"),
        }
    }
}

/// How the recombined image is fitted to its container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Stretch to fill the entire container (may distort)
    #[default]
    Fill,
    /// Scale to fit within the container (may letterbox)
    Contain,
    /// Scale to cover the entire container (crops on the GPU)
    Cover,
}

impl FitMode {
    pub const ALL: [FitMode; 3] = [FitMode::Fill, FitMode::Contain, FitMode::Cover];

    /// Get the name of the fit mode
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fill => "fill",
            Self::Contain => "contain",
            Self::Cover => "cover",
        }
    }
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fill" | "stretch" => Ok(Self::Fill),
            "contain" | "fit" => Ok(Self::Contain),
            "cover" => Ok(Self::Cover),
            _ => Err(format!(
                "Invalid fit mode: {} (expected one of: fill, contain, cover)",
                s
            )),
        }
    }
}

/// Readiness of a media source, with HTML media element semantics.
///
/// Variants are ordered so readiness can be compared against a threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReadyState {
    /// Nothing is known about the media yet
    #[default]
    HaveNothing,
    /// Dimensions are known, no frame decoded
    HaveMetadata,
    /// The frame at the current position is decoded
    HaveCurrentData,
    /// The current frame and at least the next one are available
    HaveFutureData,
    /// Enough data buffered to play through
    HaveEnoughData,
}

/// Decoded visual size of a stacked-alpha source.
///
/// `height` is half of the raw frame height; the raw frame stacks color over
/// alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceFrame {
    pub width: u32,
    pub height: u32,
}

impl SourceFrame {
    /// Build a descriptor from the raw (stacked) frame size.
    ///
    /// Returns `None` when either decoded dimension would be zero, so a
    /// degenerate source behaves exactly like "no source loaded".
    pub fn from_raw(raw_width: u32, raw_height: u32) -> Option<Self> {
        Self::new(raw_width, raw_height / 2)
    }

    /// Build a descriptor from an already-halved size
    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self { width, height })
    }

    /// Raw frame size (color half stacked over alpha half)
    pub fn raw_size(&self) -> (u32, u32) {
        (self.width, self.height * 2)
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// Logical size of the region the output surface must fill, plus the
/// device pixel ratio of the display it is shown on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainerGeometry {
    pub width: f64,
    pub height: f64,
    pub device_pixel_ratio: f64,
}

impl ContainerGeometry {
    /// Create sanitized geometry.
    ///
    /// Non-finite or negative extents become 0; a non-finite or non-positive
    /// pixel ratio becomes 1.
    pub fn new(width: f64, height: f64, device_pixel_ratio: f64) -> Self {
        Self {
            width: sanitize_extent(width),
            height: sanitize_extent(height),
            device_pixel_ratio: sanitize_ratio(device_pixel_ratio),
        }
    }

    /// Replace the logical size, keeping the pixel ratio
    pub fn with_size(self, width: f64, height: f64) -> Self {
        Self::new(width, height, self.device_pixel_ratio)
    }

    /// Replace the pixel ratio, keeping the logical size
    pub fn with_device_pixel_ratio(self, device_pixel_ratio: f64) -> Self {
        Self::new(self.width, self.height, device_pixel_ratio)
    }

    /// Container size in device pixels (unfloored)
    pub fn device_size(&self) -> (f64, f64) {
        (
            self.width * self.device_pixel_ratio,
            self.height * self.device_pixel_ratio,
        )
    }

    /// Whether the container covers no area at all
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

impl Default for ContainerGeometry {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }
}

fn sanitize_extent(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn sanitize_ratio(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        1.0
    }
}

/// Fraction of the source discarded on each axis by the cover crop.
///
/// Half of each fraction is taken from either edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipRatio {
    pub dx: f32,
    pub dy: f32,
}

impl ClipRatio {
    pub fn as_array(&self) -> [f32; 2] {
        [self.dx, self.dy]
    }
}

/// Display transform applied to the visible surface: translate, then scale,
/// both around the top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayTransform {
    pub translate_x: f64,
    pub translate_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl DisplayTransform {
    pub fn scale(scale_x: f64, scale_y: f64) -> Self {
        Self {
            translate_x: 0.0,
            translate_y: 0.0,
            scale_x,
            scale_y,
        }
    }

    pub fn with_translation(mut self, x: f64, y: f64) -> Self {
        self.translate_x = x;
        self.translate_y = y;
        self
    }

    /// Map a backing-buffer pixel position to logical container coordinates
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.translate_x + x * self.scale_x,
            self.translate_y + y * self.scale_y,
        )
    }

    /// Logical size of a backing buffer once scaled
    pub fn displayed_size(&self, backing_width: u32, backing_height: u32) -> (f64, f64) {
        (
            backing_width as f64 * self.scale_x,
            backing_height as f64 * self.scale_y,
        )
    }

    /// Render as a CSS transform (use with `transform-origin: left top`)
    pub fn to_css(&self) -> String {
        if self.translate_x == 0.0 && self.translate_y == 0.0 {
            format!("scale({}, {})", self.scale_x, self.scale_y)
        } else {
            format!(
                "translate({}px, {}px) scale({}, {})",
                self.translate_x, self.translate_y, self.scale_x, self.scale_y
            )
        }
    }
}

impl Default for DisplayTransform {
    fn default() -> Self {
        Self::scale(1.0, 1.0)
    }
}

/// Output of the fit/transform engine.
///
/// Stateless: a new result replaces the old one whenever any input changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub backing_width: u32,
    pub backing_height: u32,
    pub transform: DisplayTransform,
    /// GPU-side crop, only set for cover
    pub clip: Option<ClipRatio>,
    /// False when there is nothing to draw; the surface must be cleared
    pub has_content: bool,
}

impl FitResult {
    /// Result used when no source is loaded or the container has no area
    pub fn empty(device_pixel_ratio: f64) -> Self {
        let scale = 1.0 / sanitize_ratio(device_pixel_ratio);
        Self {
            backing_width: 1,
            backing_height: 1,
            transform: DisplayTransform::scale(scale, scale),
            clip: None,
            has_content: false,
        }
    }

    pub fn backing_size(&self) -> (u32, u32) {
        (self.backing_width, self.backing_height)
    }

    /// Logical size the backing buffer occupies once the transform is applied
    pub fn displayed_size(&self) -> (f64, f64) {
        self.transform
            .displayed_size(self.backing_width, self.backing_height)
    }
}
