//! Tissue refinement: replace coarse tissue outlines inside a viewport
//! with contours segmented from the viewport's own pixels.
//!
//! Thumbnail-derived tissue chunks are only accurate to a few dozen slide
//! pixels. At patch resolution the refiner re-segments, then lets each
//! new contour inherit the id of the old tissue polygon it overlaps best.

use geo::{Area, BooleanOps, Polygon, Validation};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geometry::{normalize_vertices, resolve_self_intersection};
use crate::source::TissueSegmenter;
use crate::types::{ColorMode, Point, RoiError, RoiId, TISSUE_NAME};
use crate::viewport::{ClippedRoi, Provenance, Viewport};

/// What happens to re-segmented contours that match no existing tissue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedTissue {
    /// Keep them as new tissue with ids counting up from the refinement's
    /// id base. Separate refinements with the same base reuse ids.
    #[default]
    Keep,
    /// Drop them.
    Discard,
}

/// Settings for [`TissueRefiner`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefineConfig {
    /// A new contour inherits an old id only above this IoU.
    pub iou_threshold: f64,
    /// Minimum contour length in viewport pixels.
    pub min_length: usize,
    /// Lower bound on the median filter size; the effective size is
    /// `max(min_filter_size, image_height / 16)`.
    pub min_filter_size: u32,
    /// Threshold channel used for segmentation.
    pub color_mode: ColorMode,
    /// Policy for contours without a predecessor.
    pub unmatched: UnmatchedTissue,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            min_length: 50,
            min_filter_size: 8,
            color_mode: ColorMode::Color,
            unmatched: UnmatchedTissue::Keep,
        }
    }
}

impl RefineConfig {
    /// Check the configuration for values the refiner cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::InvalidConfig`] if `iou_threshold` is outside
    /// `[0, 1)`.
    pub fn validate(&self) -> Result<(), RoiError> {
        if !(0.0..1.0).contains(&self.iou_threshold) {
            return Err(RoiError::InvalidConfig(format!(
                "iou_threshold must be in [0, 1), got {}",
                self.iou_threshold
            )));
        }
        Ok(())
    }

    /// Median filter size for an image of the given height.
    #[must_use]
    pub fn filter_size(&self, image_height: u32) -> u32 {
        self.min_filter_size.max(image_height / 16)
    }
}

/// Intersection over union of two polygons.
///
/// Returns `None` when the union area is zero or not finite.
#[must_use]
pub fn iou(a: &Polygon<f64>, b: &Polygon<f64>) -> Option<f64> {
    let union = a.union(b).unsigned_area();
    if !(union.is_finite() && union > 0.0) {
        return None;
    }
    let intersection = a.intersection(b).unsigned_area();
    Some(intersection / union)
}

/// Re-segments tissue within a viewport and reconciles ids.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TissueRefiner {
    config: RefineConfig,
}

impl TissueRefiner {
    /// Create a refiner with the given settings.
    #[must_use]
    pub const fn new(config: RefineConfig) -> Self {
        Self { config }
    }

    /// The refiner's settings.
    #[must_use]
    pub const fn config(&self) -> &RefineConfig {
        &self.config
    }

    /// Refine the tissue entries of `clipped` using `pixels`, the
    /// viewport's image.
    ///
    /// Non-tissue entries come first, unchanged, followed by the refined
    /// tissue in contour order. Unmatched contours get ids counting up
    /// from `next_id`. When segmentation yields nothing, `clipped` is
    /// returned as-is.
    pub fn refine<S: TissueSegmenter + ?Sized>(
        &self,
        segmenter: &S,
        pixels: &RgbaImage,
        viewport: &Viewport,
        clipped: Vec<ClippedRoi>,
        next_id: RoiId,
    ) -> Vec<ClippedRoi> {
        let filter_size = self.config.filter_size(pixels.height());
        let contours = segmenter.contours(
            pixels,
            self.config.color_mode,
            filter_size,
            self.config.min_length,
        );
        let fresh = to_slide_polygons(&contours, pixels.width(), viewport);
        if fresh.is_empty() {
            debug!("tissue refinement found no contours; keeping clipped tissue");
            return clipped;
        }

        let (old_tissue, mut out): (Vec<ClippedRoi>, Vec<ClippedRoi>) =
            clipped.into_iter().partition(ClippedRoi::is_tissue);

        let claims = self.match_contours(&old_tissue, &fresh);

        let mut next_id = next_id;
        let mut inherited = 0_usize;
        let mut discarded = 0_usize;
        for (polygon, claim) in fresh.into_iter().zip(claims) {
            let (id, provenance) = match (claim, self.config.unmatched) {
                (Some(id), _) => {
                    inherited += 1;
                    (id, Provenance::RefinedTissue)
                }
                (None, UnmatchedTissue::Keep) => {
                    let id = next_id;
                    next_id = next_id.saturating_add(1);
                    (id, Provenance::NewTissue)
                }
                (None, UnmatchedTissue::Discard) => {
                    discarded += 1;
                    continue;
                }
            };
            out.push(ClippedRoi {
                id,
                name: TISSUE_NAME.to_owned(),
                polygon,
                provenance,
            });
        }
        debug!(
            old = old_tissue.len(),
            inherited, discarded, "refined tissue within viewport"
        );
        out
    }

    /// For each new polygon, the id of the old tissue polygon that
    /// claimed it. Old polygons claim in input order; each new polygon is
    /// claimed at most once.
    fn match_contours(
        &self,
        old_tissue: &[ClippedRoi],
        fresh: &[Polygon<f64>],
    ) -> Vec<Option<RoiId>> {
        let mut claims: Vec<Option<RoiId>> = vec![None; fresh.len()];

        for old in old_tissue {
            let Some(scores) = scores_with_repair(&old.polygon, fresh) else {
                warn!(
                    id = old.id,
                    "cannot compute tissue overlap; skipping refinement for ROI"
                );
                continue;
            };
            let best = scores
                .into_iter()
                .enumerate()
                .filter(|&(pos, score)| claims[pos].is_none() && score > self.config.iou_threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((pos, _)) = best {
                claims[pos] = Some(old.id);
            }
        }
        claims
    }
}

/// IoU of `old` against every new polygon.
///
/// An invalid or empty `old` is repaired once and scored again; `None`
/// means the repaired polygon could not be scored either.
fn scores_with_repair(old: &Polygon<f64>, fresh: &[Polygon<f64>]) -> Option<Vec<f64>> {
    let scores = |polygon: &Polygon<f64>| -> Option<Vec<f64>> {
        if !(polygon.is_valid() && polygon.unsigned_area() > 0.0) {
            return None;
        }
        fresh.iter().map(|candidate| iou(polygon, candidate)).collect()
    };
    scores(old).or_else(|| {
        debug!("repairing invalid tissue polygon before scoring");
        scores(&resolve_self_intersection(old))
    })
}

/// Map contours from viewport-image pixels into slide coordinates and
/// normalize them, dropping degenerate ones.
fn to_slide_polygons(
    contours: &[Vec<Point>],
    image_width: u32,
    viewport: &Viewport,
) -> Vec<Polygon<f64>> {
    if image_width == 0 {
        return Vec::new();
    }
    let factor = viewport.width() / f64::from(image_width);
    let origin = viewport.top_left();
    contours
        .iter()
        .map(|contour| {
            let vertices: Vec<Point> = contour
                .iter()
                .map(|p| Point::new(p.x.mul_add(factor, origin.x), p.y.mul_add(factor, origin.y)))
                .collect();
            normalize_vertices(&vertices)
        })
        .filter(|polygon| polygon.unsigned_area() > 0.0)
        .collect()
}
