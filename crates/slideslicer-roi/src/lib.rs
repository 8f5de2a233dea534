//! slideslicer-roi: ROI geometry engine and patch tiling (sans-IO).
//!
//! Turns the annotated regions of a whole-slide image into per-patch
//! training targets:
//! normalize -> resolve tissue containment -> prune empty tissue ->
//! clip to viewport -> optional tissue refinement -> project -> encode.
//!
//! This crate performs **no I/O**. Slide pixels, annotation documents,
//! and tissue segmentation arrive through the [`SlideSource`],
//! [`AnnotationParser`], and [`TissueSegmenter`] traits. On-disk formats
//! live in `slideslicer-export`.

pub mod collection;
pub mod containment;
pub mod geometry;
pub mod index;
pub mod refine;
pub mod rle;
pub mod segment;
pub mod source;
pub mod tiling;
pub mod types;
pub mod viewport;

pub use collection::{
    NameFilter, PatchOutput, PatchQuery, QueryOutput, Refinement, RoiCollection, extract_tissue,
    median_area_ratio,
};
pub use containment::{RemoveEmpty, TissueContainmentMap};
pub use refine::{RefineConfig, TissueRefiner, UnmatchedTissue, iou};
pub use rle::{RleMask, ScanOrder, combine, encode_polygon, rasterize};
pub use segment::ThresholdSegmenter;
pub use source::{AnnotationParser, SlideSource, TissueSegmenter};
pub use tiling::{
    PatchBatch, PatchTileIterator, SamplingMode, TilingConfig, read_patch, sample_points,
};
pub use types::{
    CollectionConfig, ColorMode, Dimensions, GeometryError, GrayImage, NormalizedRoi, Point,
    RawRoi, ResolvedGeometry, RgbaImage, RoiError, RoiId, ShapeKind, TISSUE_NAME,
    TissueExtraction, TissueParams,
};
pub use viewport::{ClipOptions, ClippedRoi, PatchRoi, Provenance, Viewport, clip, project};
