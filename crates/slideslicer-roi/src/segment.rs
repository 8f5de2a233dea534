//! Reference tissue segmenter: median filter, Otsu threshold, border
//! following.
//!
//! Glass is bright and unsaturated; stained tissue is darker and more
//! colorful. Gray mode thresholds luminance, color mode thresholds the
//! per-pixel chroma `max(r, g, b) - min(r, g, b)`.

use image::{GrayImage, Luma, RgbaImage};
use imageproc::contours::{BorderType, Contour, find_contours};

use crate::rle::FOREGROUND;
use crate::source::TissueSegmenter;
use crate::types::{ColorMode, Point};

/// Otsu-threshold tissue segmentation built on `imageproc`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThresholdSegmenter;

impl TissueSegmenter for ThresholdSegmenter {
    fn segment(&self, pixels: &RgbaImage, color_mode: ColorMode, filter_size: u32) -> GrayImage {
        let channel = match color_mode {
            ColorMode::Gray => image::imageops::grayscale(pixels),
            ColorMode::Color => chroma(pixels),
        };
        let radius = filter_size / 2;
        let smoothed = if radius == 0 {
            channel
        } else {
            imageproc::filter::median_filter(&channel, radius, radius)
        };

        let mut mask = GrayImage::new(smoothed.width(), smoothed.height());
        if !has_contrast(&smoothed) {
            return mask;
        }
        let level = imageproc::contrast::otsu_level(&smoothed);
        for (x, y, p) in smoothed.enumerate_pixels() {
            let tissue = match color_mode {
                ColorMode::Gray => p.0[0] <= level,
                ColorMode::Color => p.0[0] > level,
            };
            if tissue {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
        mask
    }

    fn mask_to_contours(&self, mask: &GrayImage, min_length: usize) -> Vec<Vec<Point>> {
        let contours: Vec<Contour<u32>> = find_contours(mask);
        contours
            .into_iter()
            .filter(|c| matches!(c.border_type, BorderType::Outer) && c.points.len() >= min_length)
            .map(|c| {
                c.points
                    .into_iter()
                    .map(|p| Point::new(f64::from(p.x), f64::from(p.y)))
                    .collect()
            })
            .collect()
    }
}

fn chroma(pixels: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(pixels.width(), pixels.height(), |x, y| {
        let [r, g, b, _] = pixels.get_pixel(x, y).0;
        Luma([r.max(g).max(b) - r.min(g).min(b)])
    })
}

fn has_contrast(image: &GrayImage) -> bool {
    let mut values = image.pixels().map(|p| p.0[0]);
    values
        .next()
        .is_some_and(|first| values.any(|v| v != first))
}
