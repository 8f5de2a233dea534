//! The ROI collection: one slide's normalized, pruned ROI set and the
//! per-viewport query on top of it.

use std::collections::{BTreeMap, BTreeSet};

use geo::Area;
use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::containment::{self, TissueContainmentMap};
use crate::geometry::{normalize, normalize_vertices};
use crate::index::BoxIndex;
use crate::refine::{RefineConfig, TissueRefiner};
use crate::rle::{ScanOrder, combine, encode_polygon, rasterize};
use crate::source::{AnnotationParser, SlideSource, TissueSegmenter};
use crate::types::{
    CollectionConfig, NormalizedRoi, Point, RawRoi, RoiError, RoiId, ShapeKind, TISSUE_NAME,
    TissueExtraction, TissueParams,
};
use crate::viewport::{ClipOptions, PatchRoi, Viewport, clip, project};

/// Selects ROIs by name when building a mask.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameFilter {
    /// Every ROI.
    #[default]
    All,
    /// Only ROIs with one of these names.
    Names(BTreeSet<String>),
    /// Every ROI except those with one of these names.
    Except(BTreeSet<String>),
}

impl NameFilter {
    /// Filter on the given names.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Names(names.into_iter().map(Into::into).collect())
    }

    /// Whether an ROI with this name passes the filter.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Names(names) => names.contains(name),
            Self::Except(names) => !names.contains(name),
        }
    }
}

/// Output format requested from [`RoiCollection::get_patch_rois`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutput {
    /// Patch ROI polygons, optionally each with its own RLE mask.
    Polygons {
        /// Attach a row-major [`RleMask`](crate::RleMask) to every ROI.
        rle: bool,
    },
    /// One binary mask of the ROIs selected by the filter.
    Mask(NameFilter),
}

impl Default for QueryOutput {
    fn default() -> Self {
        Self::Polygons { rle: false }
    }
}

impl QueryOutput {
    const fn needs_raster(&self) -> bool {
        matches!(self, Self::Polygons { rle: true } | Self::Mask(_))
    }
}

/// One viewport query.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchQuery {
    /// Region of the slide to cut.
    pub viewport: Viewport,
    /// Downscale factor (`>= 1`).
    pub scale: f64,
    /// Return patch-local coordinates.
    pub translate: bool,
    /// Output format.
    pub output: QueryOutput,
}

impl PatchQuery {
    /// Polygons in patch-local coordinates at full resolution.
    #[must_use]
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            scale: 1.0,
            translate: true,
            output: QueryOutput::default(),
        }
    }

    /// Set the downscale factor.
    #[must_use]
    pub const fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Set whether coordinates are translated to the patch origin.
    #[must_use]
    pub const fn with_translate(mut self, translate: bool) -> Self {
        self.translate = translate;
        self
    }

    /// Set the output format.
    #[must_use]
    pub fn with_output(mut self, output: QueryOutput) -> Self {
        self.output = output;
        self
    }

    const fn clip_options(&self) -> ClipOptions {
        ClipOptions {
            translate: self.translate,
            scale: self.scale,
        }
    }
}

/// Result of a viewport query.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutput {
    /// Clipped ROIs, possibly empty.
    Rois(Vec<PatchRoi>),
    /// Binary mask of `round(width / scale) x round(height / scale)`.
    Mask(GrayImage),
}

/// Inputs for re-segmenting tissue inside the queried viewport.
#[derive(Clone, Copy)]
pub struct Refinement<'a> {
    /// The viewport's pixels, at any resolution.
    pub pixels: &'a RgbaImage,
    /// Segmenter run on `pixels`.
    pub segmenter: &'a dyn TissueSegmenter,
    /// Refiner settings.
    pub config: RefineConfig,
    /// First id handed to unmatched contours. `None` starts at
    /// [`RoiCollection::next_id`], so separate queries reuse the same ids;
    /// callers tracking new tissue across viewports pass their own counter.
    pub first_new_id: Option<RoiId>,
}

impl std::fmt::Debug for Refinement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Refinement")
            .field("pixels", &self.pixels.dimensions())
            .field("config", &self.config)
            .field("first_new_id", &self.first_new_id)
            .finish_non_exhaustive()
    }
}

/// A slide's ROI set after normalization and tissue pruning.
#[derive(Debug, Clone)]
pub struct RoiCollection {
    config: CollectionConfig,
    raw: Vec<RawRoi>,
    rois: Vec<NormalizedRoi>,
    containment: TissueContainmentMap,
    index: BoxIndex,
}

impl RoiCollection {
    /// Normalize `raw`, resolve tissue containment, and prune empty
    /// tissue chunks per `config.remove_empty`.
    ///
    /// ROIs whose vertices cannot form geometry are dropped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::InvalidConfig`] if `config` fails validation.
    pub fn new(raw: Vec<RawRoi>, config: CollectionConfig) -> Result<Self, RoiError> {
        config.validate()?;
        info!(counts = ?count_names(raw.iter().map(|r| r.name.as_str())), "loaded ROIs");

        let normalized: Vec<NormalizedRoi> = raw
            .into_iter()
            .filter_map(|source| match normalize(&source, config.ellipse_points) {
                Ok(polygon) => Some(NormalizedRoi {
                    id: source.id,
                    name: source.name.clone(),
                    polygon,
                    source,
                }),
                Err(err) => {
                    warn!(%err, "dropping ROI");
                    None
                }
            })
            .collect();

        let containment = containment::resolve(&normalized);
        let rois = if config.remove_empty.applies(&normalized) {
            containment::prune(normalized, &containment)
        } else {
            normalized
        };
        info!(
            counts = ?count_names(rois.iter().map(|r| r.name.as_str())),
            "ROIs after tissue pruning"
        );

        let raw = rois.iter().map(|r| r.source.clone()).collect();
        let index = BoxIndex::new(rois.iter().map(|r| &r.polygon));
        Ok(Self {
            config,
            raw,
            rois,
            containment,
            index,
        })
    }

    /// Parse annotations and, if configured, append tissue chunks
    /// extracted from the slide thumbnail before building the collection.
    ///
    /// # Errors
    ///
    /// Propagates [`RoiError::Parse`] from the parser and
    /// [`RoiError::Slide`] from the slide source, plus the errors of
    /// [`RoiCollection::new`].
    pub fn from_annotations<P, L, S>(
        parser: &P,
        source: &P::Source,
        slide: &L,
        segmenter: &S,
        config: CollectionConfig,
    ) -> Result<Self, RoiError>
    where
        P: AnnotationParser + ?Sized,
        L: SlideSource + ?Sized,
        S: TissueSegmenter + ?Sized,
    {
        let mut raw = parser.parse(source)?;
        if let TissueExtraction::Threshold(params) = config.tissue {
            let first_id = next_free_id(&raw);
            let ratio = median_area_ratio(&raw);
            let tissue = extract_tissue(slide, segmenter, &params, first_id, ratio)?;
            debug!(count = tissue.len(), first_id, "extracted tissue chunks");
            raw.extend(tissue);
        }
        Self::new(raw, config)
    }

    /// Re-derive the normalized ROIs from the retained raw records.
    ///
    /// # Errors
    ///
    /// Same as [`RoiCollection::new`].
    pub fn refresh(&mut self) -> Result<(), RoiError> {
        *self = Self::new(std::mem::take(&mut self.raw), self.config.clone())?;
        Ok(())
    }

    /// Clip the collection to a viewport.
    ///
    /// With `refinement`, tissue inside the viewport is re-segmented from
    /// the supplied pixels before projection; new tissue ids start at
    /// [`Refinement::first_new_id`], or above [`RoiCollection::max_id`].
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::UnsupportedScale`] for `scale < 1` and
    /// [`RoiError::UntranslatedMask`] if a mask or RLE output is
    /// requested without translation.
    pub fn get_patch_rois(
        &self,
        query: &PatchQuery,
        refinement: Option<Refinement<'_>>,
    ) -> Result<PatchOutput, RoiError> {
        let options = query.clip_options();
        options.validate()?;
        if !options.translate && query.output.needs_raster() {
            return Err(RoiError::UntranslatedMask);
        }

        let viewport = &query.viewport;
        let candidates = self
            .index
            .candidates(viewport.rect())
            .into_iter()
            .map(|pos| &self.rois[pos]);
        let mut clipped = clip(viewport, candidates);

        if let Some(refinement) = refinement {
            clipped = TissueRefiner::new(refinement.config).refine(
                refinement.segmenter,
                refinement.pixels,
                viewport,
                clipped,
                refinement.first_new_id.unwrap_or_else(|| self.next_id()),
            );
        }

        let mut patch = project(viewport, clipped, &options)?;
        debug!(
            rois = patch.len(),
            center_x = viewport.center().x,
            center_y = viewport.center().y,
            "patch query"
        );

        let size = viewport.output_dimensions(options.scale);
        match &query.output {
            QueryOutput::Polygons { rle } => {
                if *rle {
                    for roi in &mut patch {
                        roi.rle = Some(encode_polygon(
                            &roi.vertices(),
                            size.width,
                            size.height,
                            ScanOrder::RowMajor,
                        ));
                    }
                }
                Ok(PatchOutput::Rois(patch))
            }
            QueryOutput::Mask(filter) => {
                let masks: Vec<GrayImage> = patch
                    .iter()
                    .filter(|roi| filter.matches(&roi.name))
                    .map(|roi| rasterize(&roi.vertices(), size.width, size.height))
                    .collect();
                Ok(PatchOutput::Mask(combine(&masks, size.width, size.height)))
            }
        }
    }

    /// Normalized ROIs in insertion order.
    #[must_use]
    pub fn rois(&self) -> &[NormalizedRoi] {
        &self.rois
    }

    /// Tissue chunks in insertion order.
    pub fn tissue(&self) -> impl Iterator<Item = &NormalizedRoi> {
        self.rois.iter().filter(|r| r.is_tissue())
    }

    /// Feature ROIs in insertion order.
    pub fn features(&self) -> impl Iterator<Item = &NormalizedRoi> {
        self.rois.iter().filter(|r| !r.is_tissue())
    }

    /// Tissue-to-feature containment, as resolved before pruning.
    #[must_use]
    pub const fn containment(&self) -> &TissueContainmentMap {
        &self.containment
    }

    /// Raw records of the retained ROIs, ready for persistence.
    #[must_use]
    pub fn raw_records(&self) -> &[RawRoi] {
        &self.raw
    }

    /// Number of ROIs per name.
    #[must_use]
    pub fn name_counts(&self) -> BTreeMap<String, usize> {
        count_names(self.rois.iter().map(|r| r.name.as_str()))
    }

    /// Largest ROI id in the collection.
    #[must_use]
    pub fn max_id(&self) -> Option<RoiId> {
        self.rois.iter().map(|r| r.id).max()
    }

    /// First id above every id in the collection.
    #[must_use]
    pub fn next_id(&self) -> RoiId {
        self.max_id().map_or(0, |id| id.saturating_add(1))
    }

    /// The configuration the collection was built with.
    #[must_use]
    pub const fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Number of ROIs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rois.len()
    }

    /// Whether the collection holds no ROIs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }
}

/// Threshold the slide thumbnail and turn its outer contours into tissue
/// records in slide coordinates.
///
/// Ids count up from `first_id`. `area_ratio` converts square pixels to
/// square microns; without it `area_microns` is left unset.
///
/// # Errors
///
/// Returns [`RoiError::Slide`] if the slide cannot deliver its size or
/// thumbnail.
pub fn extract_tissue<L, S>(
    slide: &L,
    segmenter: &S,
    params: &TissueParams,
    first_id: RoiId,
    area_ratio: Option<f64>,
) -> Result<Vec<RawRoi>, RoiError>
where
    L: SlideSource + ?Sized,
    S: TissueSegmenter + ?Sized,
{
    let dims = slide.dimensions()?;
    let thumbnail = slide.thumbnail(params.thumbnail_size)?;
    if thumbnail.width() == 0 {
        return Ok(Vec::new());
    }
    let factor = f64::from(dims.width) / f64::from(thumbnail.width());
    let contours = segmenter.contours(
        &thumbnail,
        params.color_mode,
        params.filter_size,
        params.min_length,
    );

    let mut id = first_id;
    let mut tissue = Vec::with_capacity(contours.len());
    for contour in contours {
        let vertices: Vec<Point> = contour
            .iter()
            .map(|p| Point::new(p.x * factor, p.y * factor))
            .collect();
        let area = normalize_vertices(&vertices).unsigned_area();
        if area <= 0.0 {
            continue;
        }
        tissue.push(RawRoi {
            id,
            name: TISSUE_NAME.to_owned(),
            shape_kind: ShapeKind::Polygon,
            vertices,
            area,
            area_microns: area_ratio.map(|r| area * r),
        });
        id = id.saturating_add(1);
    }
    Ok(tissue)
}

/// Median of `area_microns / area` over records that carry both.
#[must_use]
pub fn median_area_ratio(raw: &[RawRoi]) -> Option<f64> {
    let mut ratios: Vec<f64> = raw
        .iter()
        .filter_map(|r| {
            let microns = r.area_microns?;
            (r.area > 0.0 && microns.is_finite()).then(|| microns / r.area)
        })
        .collect();
    if ratios.is_empty() {
        return None;
    }
    ratios.sort_by(f64::total_cmp);
    let mid = ratios.len() / 2;
    if ratios.len() % 2 == 1 {
        Some(ratios[mid])
    } else {
        Some(f64::midpoint(ratios[mid - 1], ratios[mid]))
    }
}

fn next_free_id(raw: &[RawRoi]) -> RoiId {
    raw.iter()
        .map(|r| r.id)
        .max()
        .map_or(0, |id| id.saturating_add(1))
}

fn count_names<'a>(names: impl Iterator<Item = &'a str>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for name in names {
        *counts.entry(name.to_owned()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::containment::RemoveEmpty;
    use crate::types::Dimensions;
    use crate::viewport::Provenance;

    fn square(id: RoiId, name: &str, x: f64, y: f64, side: f64) -> RawRoi {
        RawRoi {
            id,
            name: name.to_owned(),
            shape_kind: ShapeKind::Polygon,
            vertices: vec![
                Point::new(x, y),
                Point::new(x + side, y),
                Point::new(x + side, y + side),
                Point::new(x, y + side),
            ],
            area: side * side,
            area_microns: Some(side * side * 0.25),
        }
    }

    fn plain_config() -> CollectionConfig {
        CollectionConfig {
            tissue: TissueExtraction::None,
            ..CollectionConfig::default()
        }
    }

    struct SliceParser;

    impl AnnotationParser for SliceParser {
        type Source = [RawRoi];

        fn parse(&self, source: &[RawRoi]) -> Result<Vec<RawRoi>, RoiError> {
            Ok(source.to_vec())
        }
    }

    /// 1000x800 slide whose thumbnail is 100x80.
    struct FlatSlide;

    impl SlideSource for FlatSlide {
        fn dimensions(&self) -> Result<Dimensions, RoiError> {
            Ok(Dimensions {
                width: 1000,
                height: 800,
            })
        }

        fn thumbnail(&self, _: u32) -> Result<RgbaImage, RoiError> {
            Ok(RgbaImage::new(100, 80))
        }

        fn read_region(&self, _: Point, _: usize, size: Dimensions) -> Result<RgbaImage, RoiError> {
            Ok(RgbaImage::new(size.width, size.height))
        }

        fn median_color(&self) -> Result<Rgba<u8>, RoiError> {
            Ok(Rgba([255, 255, 255, 255]))
        }
    }

    struct Scripted(Vec<Vec<Point>>);

    impl TissueSegmenter for Scripted {
        fn segment(&self, pixels: &RgbaImage, _: crate::ColorMode, _: u32) -> GrayImage {
            GrayImage::new(pixels.width(), pixels.height())
        }

        fn mask_to_contours(&self, _: &GrayImage, _: usize) -> Vec<Vec<Point>> {
            self.0.clone()
        }
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    #[test]
    fn new_prunes_degenerate_tissue() {
        let mut flat = square(3, "tissue", 500.0, 500.0, 10.0);
        flat.vertices = vec![Point::new(500.0, 500.0), Point::new(510.0, 500.0)];
        let raw = vec![
            square(1, "tissue", 0.0, 0.0, 1000_f64.sqrt()),
            square(2, "tissue", 100.0, 0.0, 500_f64.sqrt()),
            flat,
            square(4, "glom", 5.0, 5.0, 2.0),
            square(5, "glom", 105.0, 5.0, 2.0),
        ];
        let collection = RoiCollection::new(raw, plain_config()).unwrap();
        let ids: Vec<RoiId> = collection.rois().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 4, 5]);
        let raw_ids: Vec<RoiId> = collection.raw_records().iter().map(|r| r.id).collect();
        assert_eq!(raw_ids, ids);
        assert_eq!(collection.tissue().count(), 2);
        assert_eq!(collection.features().count(), 2);
        assert_eq!(collection.name_counts()["glom"], 2);
        assert_eq!(collection.containment().get(1), Some(&[4][..]));
        assert_eq!(collection.max_id(), Some(5));
    }

    #[test]
    fn never_policy_keeps_empty_tissue() {
        let raw = vec![square(1, "tissue", 0.0, 0.0, 10.0)];
        let config = CollectionConfig {
            remove_empty: RemoveEmpty::Never,
            ..plain_config()
        };
        assert_eq!(RoiCollection::new(raw, config).unwrap().len(), 1);
    }

    #[test]
    fn invalid_geometry_is_dropped() {
        let mut bad = square(2, "glom", 0.0, 0.0, 4.0);
        bad.vertices[1].x = f64::NAN;
        let raw = vec![square(1, "glom", 10.0, 10.0, 4.0), bad];
        let collection = RoiCollection::new(raw, plain_config()).unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.rois()[0].id, 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = CollectionConfig {
            ellipse_points: 1,
            ..plain_config()
        };
        assert!(matches!(
            RoiCollection::new(Vec::new(), config),
            Err(RoiError::InvalidConfig(_))
        ));
    }

    #[test]
    fn viewport_outside_everything() {
        let collection =
            RoiCollection::new(vec![square(1, "glom", 0.0, 0.0, 10.0)], plain_config()).unwrap();
        let viewport = Viewport::square(Point::new(5000.0, 5000.0), 256.0).unwrap();

        let rois = collection.get_patch_rois(&PatchQuery::new(viewport), None).unwrap();
        assert_eq!(rois, PatchOutput::Rois(Vec::new()));

        let query = PatchQuery::new(viewport)
            .with_scale(4.0)
            .with_output(QueryOutput::Mask(NameFilter::All));
        let PatchOutput::Mask(mask) = collection.get_patch_rois(&query, None).unwrap() else {
            unreachable!("mask requested");
        };
        assert_eq!(mask.dimensions(), (64, 64));
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn ellipse_partially_inside() {
        let ellipse = RawRoi {
            id: 7,
            name: "glom".to_owned(),
            shape_kind: ShapeKind::Ellipse,
            vertices: vec![Point::new(0.0, 0.0), Point::new(100.0, 60.0)],
            area: 0.0,
            area_microns: None,
        };
        let collection = RoiCollection::new(vec![ellipse], plain_config()).unwrap();
        let viewport = Viewport::square(Point::new(100.0, 30.0), 60.0).unwrap();
        let PatchOutput::Rois(rois) = collection
            .get_patch_rois(&PatchQuery::new(viewport), None)
            .unwrap()
        else {
            unreachable!("polygons requested");
        };
        assert_eq!(rois.len(), 1);
        assert_eq!(rois[0].id, 7);
        assert!(rois[0].area_fraction > 0.0 && rois[0].area_fraction < 1.0);
        assert_eq!(rois[0].provenance, Provenance::Annotation);
    }

    #[test]
    fn mask_respects_name_filter() {
        let raw = vec![square(1, "glom", 10.0, 10.0, 20.0), square(2, "infl", 60.0, 60.0, 20.0)];
        let collection = RoiCollection::new(raw, plain_config()).unwrap();
        let viewport = Viewport::square(Point::new(50.0, 50.0), 100.0).unwrap();
        let query =
            PatchQuery::new(viewport).with_output(QueryOutput::Mask(NameFilter::names(["glom"])));
        let PatchOutput::Mask(mask) = collection.get_patch_rois(&query, None).unwrap() else {
            unreachable!("mask requested");
        };
        assert_eq!(mask.dimensions(), (100, 100));
        assert_eq!(mask.get_pixel(20, 20).0[0], 1);
        assert_eq!(mask.get_pixel(70, 70).0[0], 0);
    }

    #[test]
    fn rle_output_attaches_masks() {
        let collection =
            RoiCollection::new(vec![square(1, "glom", 10.0, 10.0, 20.0)], plain_config()).unwrap();
        let viewport = Viewport::square(Point::new(50.0, 50.0), 100.0).unwrap();
        let query = PatchQuery::new(viewport).with_output(QueryOutput::Polygons { rle: true });
        let PatchOutput::Rois(rois) = collection.get_patch_rois(&query, None).unwrap() else {
            unreachable!("polygons requested");
        };
        let rle = rois[0].rle.as_ref().unwrap();
        assert_eq!((rle.width, rle.height), (100, 100));
        // 20x20 interior plus whatever part of the boundary is filled.
        assert!((400..=441).contains(&rle.area()));
        assert_eq!(rle.decode(), rasterize(&rois[0].vertices(), 100, 100));
    }

    #[test]
    fn untranslated_mask_is_rejected() {
        let collection = RoiCollection::new(Vec::new(), plain_config()).unwrap();
        let viewport = Viewport::square(Point::new(50.0, 50.0), 100.0).unwrap();
        let query = PatchQuery::new(viewport)
            .with_translate(false)
            .with_output(QueryOutput::Polygons { rle: true });
        assert!(matches!(
            collection.get_patch_rois(&query, None),
            Err(RoiError::UntranslatedMask)
        ));
    }

    #[test]
    fn from_annotations_appends_tissue_after_max_id() {
        let annotations = vec![
            square(4, "glom", 200.0, 200.0, 10.0),
            square(9, "glom", 205.0, 205.0, 4.0),
        ];
        // Thumbnail contour scaled x10 covers [100, 400] in slide pixels.
        let segmenter = Scripted(vec![rect(10.0, 10.0, 40.0, 40.0)]);
        let collection = RoiCollection::from_annotations(
            &SliceParser,
            annotations.as_slice(),
            &FlatSlide,
            &segmenter,
            CollectionConfig::default(),
        )
        .unwrap();

        let tissue: Vec<&NormalizedRoi> = collection.tissue().collect();
        assert_eq!(tissue.len(), 1);
        assert_eq!(tissue[0].id, 10);
        assert!((tissue[0].source.area - 90_000.0).abs() < 1e-6);
        assert!((tissue[0].source.area_microns.unwrap() - 22_500.0).abs() < 1e-6);
        assert_eq!(collection.containment().get(10), Some(&[4, 9][..]));
    }

    #[test]
    fn refinement_allocates_ids_above_collection() {
        let raw = vec![square(1, "tissue", 0.0, 0.0, 80.0), square(2, "glom", 10.0, 10.0, 5.0)];
        let collection = RoiCollection::new(raw, plain_config()).unwrap();
        let viewport = Viewport::square(Point::new(50.0, 50.0), 100.0).unwrap();
        let pixels = RgbaImage::new(100, 100);
        let segmenter = Scripted(vec![rect(0.0, 0.0, 80.0, 70.0), rect(90.0, 90.0, 99.0, 99.0)]);
        let refinement = Refinement {
            pixels: &pixels,
            segmenter: &segmenter,
            config: RefineConfig::default(),
            first_new_id: None,
        };
        let PatchOutput::Rois(rois) = collection
            .get_patch_rois(&PatchQuery::new(viewport), Some(refinement))
            .unwrap()
        else {
            unreachable!("polygons requested");
        };
        let ids: Vec<(RoiId, Provenance)> = rois.iter().map(|r| (r.id, r.provenance)).collect();
        assert_eq!(
            ids,
            vec![
                (2, Provenance::Annotation),
                (1, Provenance::RefinedTissue),
                (3, Provenance::NewTissue),
            ]
        );
    }

    #[test]
    fn refinement_uses_caller_id_base() {
        let raw = vec![
            square(1, "tissue", 0.0, 0.0, 80.0),
            square(2, "glom", 10.0, 10.0, 5.0),
        ];
        let collection = RoiCollection::new(raw, plain_config()).unwrap();
        let pixels = RgbaImage::new(100, 100);
        let segmenter = Scripted(vec![rect(90.0, 90.0, 99.0, 99.0)]);
        let new_ids = |center: Point, first_new_id: Option<RoiId>| -> Vec<RoiId> {
            let viewport = Viewport::square(center, 100.0).unwrap();
            let refinement = Refinement {
                pixels: &pixels,
                segmenter: &segmenter,
                config: RefineConfig::default(),
                first_new_id,
            };
            let PatchOutput::Rois(rois) = collection
                .get_patch_rois(&PatchQuery::new(viewport), Some(refinement))
                .unwrap()
            else {
                unreachable!("polygons requested");
            };
            rois.iter()
                .filter(|r| r.provenance == Provenance::NewTissue)
                .map(|r| r.id)
                .collect()
        };
        assert_eq!(new_ids(Point::new(50.0, 50.0), None), vec![3]);
        assert_eq!(new_ids(Point::new(250.0, 50.0), None), vec![3]);
        assert_eq!(new_ids(Point::new(250.0, 50.0), Some(40)), vec![40]);
    }

    #[test]
    fn refresh_rederives_same_rois() {
        let raw = vec![square(1, "tissue", 0.0, 0.0, 50.0), square(2, "glom", 10.0, 10.0, 5.0)];
        let mut collection = RoiCollection::new(raw, plain_config()).unwrap();
        let before = collection.rois().to_vec();
        collection.refresh().unwrap();
        assert_eq!(collection.rois(), before.as_slice());
    }

    #[test]
    fn median_ratio_of_annotations() {
        let mut raw = vec![square(1, "glom", 0.0, 0.0, 2.0), square(2, "glom", 0.0, 0.0, 2.0)];
        raw[1].area_microns = Some(raw[1].area * 0.75);
        assert!((median_area_ratio(&raw).unwrap() - 0.5).abs() < 1e-12);
        raw.iter_mut().for_each(|r| r.area_microns = None);
        assert!(median_area_ratio(&raw).is_none());
    }

    #[test]
    fn collection_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RoiCollection>();
    }
}
