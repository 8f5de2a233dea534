//! Viewport clipping: cut ROI polygons down to one patch.
//!
//! Clipping runs in two stages so that tissue refinement can happen in
//! between, while everything is still in slide coordinates:
//!
//! 1. [`clip`]: keep ROIs touching the viewport rectangle, intersect
//!    them with it, and expand multi-part results into one record per
//!    part (zero-area parts dropped).
//! 2. [`project`]: translate to patch-local coordinates, downscale, and
//!    recompute `area` and `area_fraction`.

use geo::{Area, BooleanOps, Coord, Intersects, Polygon, Rect, Scale, Translate};
use serde::{Deserialize, Serialize};

use crate::rle::RleMask;
use crate::types::{
    Dimensions, NormalizedRoi, Point, ResolvedGeometry, RoiError, RoiId, TISSUE_NAME,
    exterior_vertices,
};

/// An axis-aligned rectangle on the slide, given by its center and size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    center: Point,
    width: f64,
    height: f64,
}

impl Viewport {
    /// Create a viewport.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::InvalidViewport`] if the center is not finite
    /// or a side is not a positive finite number.
    pub fn new(center: Point, width: f64, height: f64) -> Result<Self, RoiError> {
        if !center.is_finite() {
            return Err(RoiError::InvalidViewport(format!(
                "center ({}, {}) is not finite",
                center.x, center.y
            )));
        }
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(RoiError::InvalidViewport(format!(
                "size {width}x{height} must be positive"
            )));
        }
        Ok(Self {
            center,
            width,
            height,
        })
    }

    /// Create a square viewport.
    ///
    /// # Errors
    ///
    /// Same as [`Viewport::new`].
    pub fn square(center: Point, side: f64) -> Result<Self, RoiError> {
        Self::new(center, side, side)
    }

    /// Center of the viewport in slide coordinates.
    #[must_use]
    pub const fn center(&self) -> Point {
        self.center
    }

    /// Width in slide pixels.
    #[must_use]
    pub const fn width(&self) -> f64 {
        self.width
    }

    /// Height in slide pixels.
    #[must_use]
    pub const fn height(&self) -> f64 {
        self.height
    }

    /// Nominal area in square slide pixels.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Top-left corner in slide coordinates.
    #[must_use]
    pub fn top_left(&self) -> Point {
        Point::new(
            self.center.x - self.width / 2.0,
            self.center.y - self.height / 2.0,
        )
    }

    /// The viewport as a rectangle in slide coordinates.
    #[must_use]
    pub fn rect(&self) -> Rect<f64> {
        let tl = self.top_left();
        Rect::new(
            Coord { x: tl.x, y: tl.y },
            Coord {
                x: tl.x + self.width,
                y: tl.y + self.height,
            },
        )
    }

    /// Output canvas size after downscaling by `scale`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn output_dimensions(&self, scale: f64) -> Dimensions {
        Dimensions {
            width: (self.width / scale).round().max(0.0) as u32,
            height: (self.height / scale).round().max(0.0) as u32,
        }
    }
}

/// Where a patch ROI's geometry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Clipped from an annotated (or thumbnail-extracted) ROI.
    #[default]
    Annotation,
    /// Re-segmented tissue contour that inherited an existing id.
    RefinedTissue,
    /// Re-segmented tissue contour with no matching predecessor.
    NewTissue,
}

/// An ROI clipped to a viewport, still in slide coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ClippedRoi {
    /// Identifier of the source ROI.
    pub id: RoiId,
    /// Name of the source ROI.
    pub name: String,
    /// Clipped polygon, one part of the intersection.
    pub polygon: Polygon<f64>,
    /// Where the geometry came from.
    pub provenance: Provenance,
}

impl ClippedRoi {
    /// Whether this entry is a tissue chunk.
    #[must_use]
    pub fn is_tissue(&self) -> bool {
        self.name == TISSUE_NAME
    }
}

/// An ROI in patch-local coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRoi {
    /// Identifier of the source ROI.
    pub id: RoiId,
    /// Name of the source ROI.
    pub name: String,
    /// Where the geometry came from.
    pub provenance: Provenance,
    /// Polygon after translation and scaling.
    pub polygon: Polygon<f64>,
    /// Area of `polygon` in output pixels.
    pub area: f64,
    /// `area` divided by the nominal (scaled) patch area.
    pub area_fraction: f64,
    /// Run-length-encoded mask, when requested.
    pub rle: Option<RleMask>,
}

impl PatchRoi {
    /// Closed exterior ring of the polygon.
    #[must_use]
    pub fn vertices(&self) -> Vec<Point> {
        exterior_vertices(&self.polygon)
    }
}

/// Options for mapping clipped ROIs into patch-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipOptions {
    /// Shift coordinates so the viewport's top-left corner is `(0, 0)`.
    pub translate: bool,
    /// Downscale factor; coordinates are divided by it. Must be `>= 1`.
    pub scale: f64,
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self {
            translate: true,
            scale: 1.0,
        }
    }
}

impl ClipOptions {
    /// Check that the scale is a supported downscale factor.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::UnsupportedScale`] for `scale < 1` (upscaling)
    /// and for non-finite scales.
    pub fn validate(&self) -> Result<(), RoiError> {
        if self.scale.is_finite() && self.scale >= 1.0 {
            Ok(())
        } else {
            Err(RoiError::UnsupportedScale(self.scale))
        }
    }
}

/// Intersect every ROI touching the viewport with the viewport rectangle.
///
/// Output order follows input order. A multi-part intersection yields
/// one entry per part, each carrying the source ROI's id and name;
/// non-polygonal and zero-area results are dropped.
pub fn clip<'a>(
    viewport: &Viewport,
    rois: impl IntoIterator<Item = &'a NormalizedRoi>,
) -> Vec<ClippedRoi> {
    let rect = viewport.rect();
    let window = rect.to_polygon();

    rois.into_iter()
        .filter(|roi| roi.polygon.intersects(&rect))
        .flat_map(|roi| {
            let intersection = roi.polygon.intersection(&window);
            let parts = match ResolvedGeometry::from_polygons(intersection.0) {
                ResolvedGeometry::Empty => Vec::new(),
                ResolvedGeometry::Single(polygon) => vec![polygon],
                ResolvedGeometry::Parts(parts) => parts,
            };
            parts
                .into_iter()
                .filter(|part| part.unsigned_area() > 0.0)
                .map(|polygon| ClippedRoi {
                    id: roi.id,
                    name: roi.name.clone(),
                    polygon,
                    provenance: Provenance::Annotation,
                })
        })
        .collect()
}

/// Map clipped ROIs into patch-local coordinates.
///
/// Translation moves the viewport's top-left corner to the origin.
/// Scaling divides coordinates by `options.scale` around the origin when
/// translated, or around the viewport center otherwise.
///
/// # Errors
///
/// Returns [`RoiError::UnsupportedScale`] if `options.scale` is below 1
/// or not finite.
pub fn project(
    viewport: &Viewport,
    clipped: Vec<ClippedRoi>,
    options: &ClipOptions,
) -> Result<Vec<PatchRoi>, RoiError> {
    options.validate()?;
    let top_left = viewport.top_left();
    let scale = options.scale;
    let nominal_area = viewport.area() / (scale * scale);
    let origin: Coord<f64> = if options.translate {
        Coord { x: 0.0, y: 0.0 }
    } else {
        viewport.center().into()
    };

    Ok(clipped
        .into_iter()
        .filter_map(|roi| {
            let mut polygon = roi.polygon;
            if options.translate {
                polygon = polygon.translate(-top_left.x, -top_left.y);
            }
            if (scale - 1.0).abs() > f64::EPSILON {
                polygon = polygon.scale_around_point(1.0 / scale, 1.0 / scale, origin);
            }
            let area = polygon.unsigned_area();
            (area > 0.0).then(|| PatchRoi {
                id: roi.id,
                name: roi.name,
                provenance: roi.provenance,
                polygon,
                area,
                area_fraction: area / nominal_area,
                rle: None,
            })
        })
        .collect())
}
