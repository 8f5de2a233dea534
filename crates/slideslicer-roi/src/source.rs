//! Seams to the outside world: slide pixels, annotation files, and
//! tissue segmentation.
//!
//! The engine performs no I/O itself. Callers implement these traits over
//! their slide reader and annotation format of choice.

use image::{GrayImage, Rgba, RgbaImage};

use crate::types::{ColorMode, Dimensions, Point, RawRoi, RoiError};

/// A multi-resolution whole-slide image.
pub trait SlideSource {
    /// Full-resolution (level 0) size.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::Slide`] if the slide metadata is unavailable.
    fn dimensions(&self) -> Result<Dimensions, RoiError>;

    /// A downsampled view of the whole slide whose longest side is at
    /// most `max_size`.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::Slide`] if the thumbnail cannot be produced.
    fn thumbnail(&self, max_size: u32) -> Result<RgbaImage, RoiError>;

    /// Read `size` pixels at `level`, with `top_left` given in level-0
    /// coordinates. Areas outside the slide may be returned transparent.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::Slide`] if the region cannot be read.
    fn read_region(&self, top_left: Point, level: usize, size: Dimensions)
    -> Result<RgbaImage, RoiError>;

    /// Typical background color of the slide, used to pad regions that
    /// extend past the slide edge.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::Slide`] if the color cannot be estimated.
    fn median_color(&self) -> Result<Rgba<u8>, RoiError>;

    /// Number of pyramid levels.
    fn level_count(&self) -> usize {
        1
    }

    /// Downsample factor of `level` relative to level 0.
    fn level_downsample_ratio(&self, level: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let exponent = level as f64;
        2_f64.powf(exponent)
    }
}

/// Turns an annotation document into raw ROI records.
pub trait AnnotationParser {
    /// Whatever the parser reads from: a string, a byte buffer, a DOM.
    type Source: ?Sized;

    /// Parse every ROI in the document.
    ///
    /// # Errors
    ///
    /// Returns [`RoiError::Parse`] if the document is unreadable or
    /// malformed. Per-ROI geometry problems are not parse errors.
    fn parse(&self, source: &Self::Source) -> Result<Vec<RawRoi>, RoiError>;
}

/// Separates tissue from glass in an RGBA image.
pub trait TissueSegmenter {
    /// Produce a binary mask (non-zero = tissue).
    fn segment(&self, pixels: &RgbaImage, color_mode: ColorMode, filter_size: u32) -> GrayImage;

    /// Trace outer tissue outlines longer than `min_length` pixels.
    fn mask_to_contours(&self, mask: &GrayImage, min_length: usize) -> Vec<Vec<Point>>;

    /// Segment and trace in one step.
    fn contours(
        &self,
        pixels: &RgbaImage,
        color_mode: ColorMode,
        filter_size: u32,
        min_length: usize,
    ) -> Vec<Vec<Point>> {
        let mask = self.segment(pixels, color_mode, filter_size);
        self.mask_to_contours(&mask, min_length)
    }
}

impl<T: TissueSegmenter + ?Sized> TissueSegmenter for &T {
    fn segment(&self, pixels: &RgbaImage, color_mode: ColorMode, filter_size: u32) -> GrayImage {
        (**self).segment(pixels, color_mode, filter_size)
    }

    fn mask_to_contours(&self, mask: &GrayImage, min_length: usize) -> Vec<Vec<Point>> {
        (**self).mask_to_contours(mask, min_length)
    }
}
