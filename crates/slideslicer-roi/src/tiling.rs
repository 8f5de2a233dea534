//! Patch tiling: sample patch centers over a region, read the pixels, and
//! attach the clipped ROIs of each patch, in fixed-size batches.

use geo::{Area, BoundingRect, Contains, Polygon};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collection::{
    NameFilter, PatchOutput, PatchQuery, QueryOutput, Refinement, RoiCollection,
};
use crate::refine::RefineConfig;
use crate::source::{SlideSource, TissueSegmenter};
use crate::types::{Dimensions, Point, RoiError};
use crate::viewport::Viewport;

/// Upper bound on rejection-sampling attempts per requested point.
const MAX_ATTEMPTS_PER_POINT: usize = 1000;

/// How patch centers are placed inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Regular lattice over the region's bounding box.
    #[default]
    Grid,
    /// Uniform random points, reproducible from `seed`.
    Random {
        /// Generator seed.
        seed: u64,
    },
}

/// Patch centers inside `region`, `spacing` slide pixels apart.
///
/// Grid points sit at `min + spacing / 2 + k * spacing` and are listed row
/// by row. Random mode draws `ceil(area / spacing^2)` points.
#[must_use]
pub fn sample_points(region: &Polygon<f64>, spacing: f64, mode: SamplingMode) -> Vec<Point> {
    if !(spacing.is_finite() && spacing > 0.0) {
        return Vec::new();
    }
    let Some(bounds) = region.bounding_rect() else {
        return Vec::new();
    };
    let inside = |p: Point| region.contains(&geo::Point::new(p.x, p.y));

    match mode {
        SamplingMode::Grid => {
            let mut points = Vec::new();
            let mut y = bounds.min().y + spacing / 2.0;
            while y <= bounds.max().y {
                let mut x = bounds.min().x + spacing / 2.0;
                while x <= bounds.max().x {
                    let p = Point::new(x, y);
                    if inside(p) {
                        points.push(p);
                    }
                    x += spacing;
                }
                y += spacing;
            }
            points
        }
        SamplingMode::Random { seed } => {
            let area = region.unsigned_area();
            if area <= 0.0 {
                return Vec::new();
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let wanted = (area / (spacing * spacing)).ceil() as usize;
            let mut rng = Pcg32::seed_from_u64(seed);
            let mut points = Vec::with_capacity(wanted);
            for _ in 0..wanted.saturating_mul(MAX_ATTEMPTS_PER_POINT) {
                if points.len() == wanted {
                    break;
                }
                let p = Point::new(
                    rng.random_range(bounds.min().x..bounds.max().x),
                    rng.random_range(bounds.min().y..bounds.max().y),
                );
                if inside(p) {
                    points.push(p);
                }
            }
            points
        }
    }
}

/// Read a square patch of `patch_size` slide pixels around `center`,
/// downscaled by `scale`.
///
/// Reads from the coarsest pyramid level whose downsample does not
/// exceed `scale`, then resizes the remainder with Lanczos3 to
/// `round(patch_size / scale)` pixels a side. Pixels outside the slide
/// are filled with the slide's median color.
///
/// # Errors
///
/// Returns [`RoiError::UnsupportedScale`] for `scale < 1` and propagates
/// [`RoiError::Slide`] from the source.
pub fn read_patch<L: SlideSource + ?Sized>(
    slide: &L,
    center: Point,
    patch_size: u32,
    scale: f64,
) -> Result<RgbaImage, RoiError> {
    if !(scale.is_finite() && scale >= 1.0) {
        return Err(RoiError::UnsupportedScale(scale));
    }
    let (level, downsample) = (0..slide.level_count().max(1))
        .map(|level| (level, slide.level_downsample_ratio(level)))
        .filter(|&(level, d)| level == 0 || d <= scale)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((0, 1.0));

    let half = f64::from(patch_size / 2);
    let top_left = Point::new((center.x - half).floor(), (center.y - half).floor());
    let side = f64::from(patch_size);
    let read_size = side_pixels(side / downsample);
    let mut region = slide.read_region(
        top_left,
        level,
        Dimensions {
            width: read_size,
            height: read_size,
        },
    )?;

    let dims = slide.dimensions()?;
    let (slide_w, slide_h) = (f64::from(dims.width), f64::from(dims.height));
    let outside = |x: u32, y: u32| {
        let sx = (f64::from(x) + 0.5).mul_add(downsample, top_left.x);
        let sy = (f64::from(y) + 0.5).mul_add(downsample, top_left.y);
        sx < 0.0 || sy < 0.0 || sx >= slide_w || sy >= slide_h
    };
    if top_left.x < 0.0
        || top_left.y < 0.0
        || top_left.x + side > slide_w
        || top_left.y + side > slide_h
    {
        let fill = slide.median_color()?;
        for (x, y, pixel) in region.enumerate_pixels_mut() {
            if outside(x, y) {
                *pixel = fill;
            }
        }
    }

    let out_size = side_pixels(side / scale);
    if region.dimensions() != (out_size, out_size) {
        debug!(level, downsample, out_size, "resizing patch");
        region = imageops::resize(&region, out_size, out_size, FilterType::Lanczos3);
    }
    Ok(region)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn side_pixels(length: f64) -> u32 {
    length.round().max(1.0) as u32
}

/// Settings for [`PatchTileIterator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilingConfig {
    /// Output patch side in pixels.
    pub side: u32,
    /// Downscale factor from slide pixels to output pixels.
    pub subsample: u32,
    /// Patches per batch.
    pub batch_size: usize,
    /// Patches per patch side when sampling; `2` halves the spacing.
    pub oversample: u32,
    /// How centers are placed inside a region.
    pub mode: SamplingMode,
    /// Attach clipped ROIs to every patch.
    pub with_rois: bool,
    /// Return one mask per patch for these names instead of polygons.
    pub mask_names: Option<NameFilter>,
    /// Re-segment tissue per patch when a segmenter is attached.
    pub refine_tissue: bool,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            side: 128,
            subsample: 8,
            batch_size: 4,
            oversample: 1,
            mode: SamplingMode::Grid,
            with_rois: false,
            mask_names: None,
            refine_tissue: true,
        }
    }
}

impl TilingConfig {
    /// Check the configuration for values the iterator cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::InvalidConfig`] if any size or count is zero.
    pub fn validate(&self) -> Result<(), RoiError> {
        let zero = [
            ("side", self.side == 0),
            ("subsample", self.subsample == 0),
            ("batch_size", self.batch_size == 0),
            ("oversample", self.oversample == 0),
        ]
        .into_iter()
        .find_map(|(name, is_zero)| is_zero.then_some(name));
        match zero {
            Some(name) => Err(RoiError::InvalidConfig(format!("{name} must be positive"))),
            None => Ok(()),
        }
    }

    /// Patch side in slide pixels.
    #[must_use]
    pub const fn patch_size(&self) -> u32 {
        self.side.saturating_mul(self.subsample)
    }

    /// Distance between sampled centers in slide pixels.
    #[must_use]
    pub fn spacing(&self) -> f64 {
        f64::from(self.patch_size()) / f64::from(self.oversample)
    }
}

/// One batch of patches.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchBatch {
    /// Patch centers in slide coordinates.
    pub centers: Vec<Point>,
    /// Patch pixels, `side x side` each.
    pub pixels: Vec<RgbaImage>,
    /// Per-patch ROIs or masks, when requested.
    pub rois: Option<Vec<PatchOutput>>,
}

/// Batched iterator over patches of a slide.
pub struct PatchTileIterator<'a, L: SlideSource + ?Sized> {
    collection: &'a RoiCollection,
    slide: &'a L,
    segmenter: Option<&'a dyn TissueSegmenter>,
    points: Vec<Point>,
    config: TilingConfig,
    cursor: usize,
}

impl<'a, L: SlideSource + ?Sized> PatchTileIterator<'a, L> {
    /// Tile `region` with centers sampled per `config.mode`.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::InvalidConfig`] if `config` fails validation.
    pub fn from_region(
        collection: &'a RoiCollection,
        slide: &'a L,
        region: &Polygon<f64>,
        config: TilingConfig,
    ) -> Result<Self, RoiError> {
        config.validate()?;
        let points = sample_points(region, config.spacing(), config.mode);
        debug!(points = points.len(), "sampled patch centers");
        Self::from_points(collection, slide, points, config)
    }

    /// Tile at explicit centers.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::InvalidConfig`] if `config` fails validation.
    pub fn from_points(
        collection: &'a RoiCollection,
        slide: &'a L,
        points: Vec<Point>,
        config: TilingConfig,
    ) -> Result<Self, RoiError> {
        config.validate()?;
        Ok(Self {
            collection,
            slide,
            segmenter: None,
            points,
            config,
            cursor: 0,
        })
    }

    /// Attach a segmenter for per-patch tissue refinement.
    #[must_use]
    pub fn with_segmenter(mut self, segmenter: &'a dyn TissueSegmenter) -> Self {
        self.segmenter = Some(segmenter);
        self
    }

    /// Patch centers in iteration order.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Total number of batches.
    #[must_use]
    pub const fn batch_count(&self) -> usize {
        self.points.len().div_ceil(self.config.batch_size)
    }

    /// Build batch `index`, independently of iteration state.
    pub fn batch(&self, index: usize) -> Option<Result<PatchBatch, RoiError>> {
        let start = index.checked_mul(self.config.batch_size)?;
        if start >= self.points.len() {
            return None;
        }
        let end = (start + self.config.batch_size).min(self.points.len());
        Some(self.build(&self.points[start..end]))
    }

    fn build(&self, centers: &[Point]) -> Result<PatchBatch, RoiError> {
        let patch_size = self.config.patch_size();
        let scale = f64::from(self.config.subsample);

        let mut pixels = Vec::with_capacity(centers.len());
        let mut rois = self.config.with_rois.then(|| Vec::with_capacity(centers.len()));
        for &center in centers {
            let patch = read_patch(self.slide, center, patch_size, scale)?;
            if let Some(rois) = rois.as_mut() {
                rois.push(self.patch_rois(center, &patch)?);
            }
            pixels.push(patch);
        }
        Ok(PatchBatch {
            centers: centers.to_vec(),
            pixels,
            rois,
        })
    }

    fn patch_rois(&self, center: Point, patch: &RgbaImage) -> Result<PatchOutput, RoiError> {
        let viewport = Viewport::square(center, f64::from(self.config.patch_size()))?;
        let output = self
            .config
            .mask_names
            .clone()
            .map_or(QueryOutput::Polygons { rle: true }, QueryOutput::Mask);
        let query = PatchQuery::new(viewport)
            .with_scale(f64::from(self.config.subsample))
            .with_output(output);
        let refinement = self
            .segmenter
            .filter(|_| self.config.refine_tissue)
            .map(|segmenter| Refinement {
                pixels: patch,
                segmenter,
                config: RefineConfig::default(),
                first_new_id: None,
            });
        self.collection.get_patch_rois(&query, refinement)
    }
}

impl<L: SlideSource + ?Sized> Iterator for PatchTileIterator<'_, L> {
    type Item = Result<PatchBatch, RoiError>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.batch(self.cursor)?;
        self.cursor += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.batch_count().saturating_sub(self.cursor);
        (remaining, Some(remaining))
    }
}

impl<L: SlideSource + ?Sized> ExactSizeIterator for PatchTileIterator<'_, L> {}
