//! Shared types for the slideslicer ROI engine.

use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};

use crate::containment::RemoveEmpty;

/// Re-export `GrayImage` so downstream crates can handle masks without
/// depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` so downstream crates can hand slide pixels to
/// the engine without depending on `image` directly.
pub use image::RgbaImage;

/// Identifier of an ROI, unique within one slide's annotation set.
pub type RoiId = u32;

/// Name shared by every tissue-chunk ROI. All other names are features.
pub const TISSUE_NAME: &str = "tissue";

/// A 2D point in slide (or patch-local) pixel coordinates.
///
/// Serialized as a two-element array `[x, y]`, which is the vertex
/// layout of the persisted ROI records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Whether both coordinates are finite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl From<Point> for Coord<f64> {
    fn from(p: Point) -> Self {
        Self { x: p.x, y: p.y }
    }
}

impl From<Coord<f64>> for Point {
    fn from(c: Coord<f64>) -> Self {
        Self { x: c.x, y: c.y }
    }
}

/// Image or canvas dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// How the vertices of a raw ROI record are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// Vertices trace the polygon boundary.
    #[default]
    Polygon,
    /// The first two vertices are opposite corners of the bounding box
    /// of an axis-aligned ellipse.
    Ellipse,
}

/// An ROI record as produced by an [`AnnotationParser`](crate::AnnotationParser).
///
/// This is also the canonical persisted record: a slide's ROI set is
/// stored as an ordered JSON array of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRoi {
    /// Identifier, unique within the slide's annotation set.
    pub id: RoiId,
    /// Lowercased name with any trailing `.` stripped.
    pub name: String,
    /// Interpretation of `vertices`.
    #[serde(rename = "type", default)]
    pub shape_kind: ShapeKind,
    /// Boundary vertices (or ellipse bounding-box corners).
    pub vertices: Vec<Point>,
    /// Area in square pixels as reported by the annotation source.
    #[serde(default)]
    pub area: f64,
    /// Area in square microns, when the slide's micron scale is known.
    #[serde(default)]
    pub area_microns: Option<f64>,
}

impl RawRoi {
    /// Normalize an annotation label into an ROI name: lowercase, with
    /// trailing periods removed (`"Glom."` becomes `"glom"`).
    #[must_use]
    pub fn normalize_name(label: &str) -> String {
        label.trim().to_lowercase().trim_end_matches('.').to_owned()
    }

    /// Whether this record is a tissue chunk.
    #[must_use]
    pub fn is_tissue(&self) -> bool {
        self.name == TISSUE_NAME
    }
}

/// An ROI whose geometry has been normalized into a single simple polygon.
///
/// `polygon` is either empty (degenerate input) or one polygon without
/// self-intersections or holes.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRoi {
    /// Identifier copied from the source record.
    pub id: RoiId,
    /// Name copied from the source record.
    pub name: String,
    /// Normalized geometry in slide coordinates.
    pub polygon: Polygon<f64>,
    /// The record this ROI was derived from.
    pub source: RawRoi,
}

impl NormalizedRoi {
    /// Whether this ROI is a tissue chunk.
    #[must_use]
    pub fn is_tissue(&self) -> bool {
        self.name == TISSUE_NAME
    }
}

/// Result of resolving a geometry into polygons.
///
/// Replaces inspecting the runtime kind of a geometry: callers match on
/// the three cases explicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedGeometry {
    /// Nothing polygonal remains.
    Empty,
    /// Exactly one polygon.
    Single(Polygon<f64>),
    /// Several disjoint polygons.
    Parts(Vec<Polygon<f64>>),
}

impl ResolvedGeometry {
    /// Classify a list of polygons, dropping empty ones.
    #[must_use]
    pub fn from_polygons(polygons: Vec<Polygon<f64>>) -> Self {
        let mut polygons: Vec<Polygon<f64>> = polygons
            .into_iter()
            .filter(|p| !p.exterior().0.is_empty())
            .collect();
        match polygons.len() {
            0 => Self::Empty,
            1 => polygons.pop().map_or(Self::Empty, Self::Single),
            _ => Self::Parts(polygons),
        }
    }

    /// Flatten into an ordered list of polygons.
    #[must_use]
    pub fn into_polygons(self) -> Vec<Polygon<f64>> {
        match self {
            Self::Empty => Vec::new(),
            Self::Single(p) => vec![p],
            Self::Parts(parts) => parts,
        }
    }
}

/// An empty polygon, the normalized form of degenerate input.
#[must_use]
pub fn empty_polygon() -> Polygon<f64> {
    Polygon::new(LineString::new(Vec::new()), Vec::new())
}

/// Exterior ring of a polygon as a closed vertex list.
#[must_use]
pub fn exterior_vertices(polygon: &Polygon<f64>) -> Vec<Point> {
    polygon.exterior().coords().map(|&c| Point::from(c)).collect()
}

/// Build a polygon (without holes) from a vertex list.
#[must_use]
pub fn polygon_from_vertices(vertices: &[Point]) -> Polygon<f64> {
    let coords: Vec<Coord<f64>> = vertices.iter().map(|&p| p.into()).collect();
    Polygon::new(LineString::new(coords), Vec::new())
}

/// Color handling for tissue thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Threshold on luminance: tissue is darker than the glass.
    #[default]
    Gray,
    /// Threshold on saturation: tissue is more colorful than the glass.
    Color,
}

/// Parameters for extracting tissue chunks from the slide thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TissueParams {
    /// Longest side of the thumbnail requested from the slide.
    pub thumbnail_size: u32,
    /// Threshold on luminance or saturation.
    pub color_mode: ColorMode,
    /// Median filter size applied before thresholding.
    pub filter_size: u32,
    /// Minimum contour length (in thumbnail pixels) kept as tissue.
    pub min_length: usize,
}

impl Default for TissueParams {
    fn default() -> Self {
        Self {
            thumbnail_size: 500,
            color_mode: ColorMode::Gray,
            filter_size: 7,
            min_length: 50,
        }
    }
}

/// Whether tissue chunks are extracted from the slide when building a
/// collection from annotations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TissueExtraction {
    /// Use the annotated ROIs as they are.
    None,
    /// Threshold the slide thumbnail and append the tissue contours.
    Threshold(TissueParams),
}

impl Default for TissueExtraction {
    fn default() -> Self {
        Self::Threshold(TissueParams::default())
    }
}

/// Configuration for building a [`RoiCollection`](crate::RoiCollection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Number of vertices used to approximate ellipse ROIs.
    pub ellipse_points: usize,
    /// Tissue-chunk extraction policy.
    pub tissue: TissueExtraction,
    /// When to drop tissue chunks that contain no feature ROI.
    pub remove_empty: RemoveEmpty,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            ellipse_points: crate::geometry::DEFAULT_ELLIPSE_POINTS,
            tissue: TissueExtraction::default(),
            remove_empty: RemoveEmpty::default(),
        }
    }
}

impl CollectionConfig {
    /// Check the configuration for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::InvalidConfig`] if fewer than 3 ellipse points
    /// are requested or the tissue thumbnail size is zero.
    pub fn validate(&self) -> Result<(), RoiError> {
        if self.ellipse_points < 3 {
            return Err(RoiError::InvalidConfig(format!(
                "ellipse_points must be at least 3, got {}",
                self.ellipse_points
            )));
        }
        if let TissueExtraction::Threshold(params) = self.tissue
            && params.thumbnail_size == 0
        {
            return Err(RoiError::InvalidConfig(
                "tissue thumbnail_size must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A single ROI's vertices cannot form any polygon.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ROI {id}: {reason}")]
pub struct GeometryError {
    /// The offending ROI.
    pub id: RoiId,
    /// What was wrong with its vertices.
    pub reason: String,
}

/// Errors surfaced by the ROI engine.
#[derive(Debug, thiserror::Error)]
pub enum RoiError {
    /// The annotation source is unreadable or malformed.
    #[error("failed to parse annotations: {0}")]
    Parse(String),

    /// A single ROI could not be turned into geometry.
    #[error("invalid ROI geometry: {0}")]
    Geometry(#[from] GeometryError),

    /// Upscaling (or a non-positive scale) was requested.
    #[error("unsupported scale {0}: only downscaling (scale >= 1) is supported")]
    UnsupportedScale(f64),

    /// Mask or RLE output was requested for untranslated coordinates.
    #[error("mask output requires patch-local (translated) coordinates")]
    UntranslatedMask,

    /// Viewport construction failed.
    #[error("invalid viewport: {0}")]
    InvalidViewport(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The slide source failed to deliver pixels or metadata.
    #[error("slide source error: {0}")]
    Slide(String),
}
