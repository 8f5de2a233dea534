//! Binary masks: polygon rasterization and run-length encoding.
//!
//! Counts alternate background and foreground runs and always start with
//! a background run (possibly of length zero). The pixel scan order is
//! carried on the mask itself: the engine defaults to row-major, while
//! MS-COCO interchange uses column-major.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Foreground value written into rasterized masks.
pub const FOREGROUND: u8 = 1;

/// Order in which mask pixels are visited when counting runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOrder {
    /// Left to right, then top to bottom.
    #[default]
    RowMajor,
    /// Top to bottom, then left to right (MS-COCO / Fortran order).
    ColumnMajor,
}

impl ScanOrder {
    /// Pixel coordinates of the `index`-th pixel visited on a
    /// `width x height` canvas.
    #[allow(clippy::cast_possible_truncation)]
    const fn position(self, index: u64, width: u32, height: u32) -> (u32, u32) {
        match self {
            Self::RowMajor => ((index % width as u64) as u32, (index / width as u64) as u32),
            Self::ColumnMajor => ((index / height as u64) as u32, (index % height as u64) as u32),
        }
    }
}

/// A run-length-encoded binary mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RleMask {
    /// Canvas width in pixels.
    pub width: u32,
    /// Canvas height in pixels.
    pub height: u32,
    /// Pixel visiting order used for `counts`.
    pub order: ScanOrder,
    /// Alternating background/foreground run lengths.
    pub counts: Vec<u32>,
}

impl RleMask {
    /// Encode a mask; any non-zero pixel is foreground.
    #[must_use]
    pub fn encode(mask: &GrayImage, order: ScanOrder) -> Self {
        let (width, height) = mask.dimensions();
        let total = u64::from(width) * u64::from(height);

        let mut counts = Vec::new();
        let mut foreground = false;
        let mut run: u32 = 0;
        for index in 0..total {
            let (x, y) = order.position(index, width, height);
            let pixel_on = mask.get_pixel(x, y).0[0] != 0;
            if pixel_on != foreground {
                counts.push(run);
                run = 0;
                foreground = pixel_on;
            }
            run += 1;
        }
        counts.push(run);

        Self {
            width,
            height,
            order,
            counts,
        }
    }

    /// Decode into a mask with foreground pixels set to [`FOREGROUND`].
    ///
    /// Runs extending past the canvas are truncated.
    #[must_use]
    pub fn decode(&self) -> GrayImage {
        let mut mask = GrayImage::new(self.width, self.height);
        let total = u64::from(self.width) * u64::from(self.height);
        let mut index: u64 = 0;
        for (k, &run) in self.counts.iter().enumerate() {
            let end = (index + u64::from(run)).min(total);
            if k % 2 == 1 {
                for i in index..end {
                    let (x, y) = self.order.position(i, self.width, self.height);
                    mask.put_pixel(x, y, Luma([FOREGROUND]));
                }
            }
            index = end;
        }
        mask
    }

    /// Number of foreground pixels.
    #[must_use]
    pub fn area(&self) -> u64 {
        self.counts
            .iter()
            .skip(1)
            .step_by(2)
            .map(|&c| u64::from(c))
            .sum()
    }

    /// Whether the runs cover the canvas exactly.
    #[must_use]
    pub fn covers_canvas(&self) -> bool {
        let sum: u64 = self.counts.iter().map(|&c| u64::from(c)).sum();
        sum == u64::from(self.width) * u64::from(self.height)
    }

    /// Re-encode the same mask in another scan order.
    #[must_use]
    pub fn reorder(&self, order: ScanOrder) -> Self {
        if order == self.order {
            return self.clone();
        }
        Self::encode(&self.decode(), order)
    }
}

/// Fill a polygon onto a blank `width x height` mask.
///
/// Vertices are rounded to the pixel grid. An explicit closing vertex is
/// accepted. Fewer than two distinct vertices leave the mask blank.
#[must_use]
pub fn rasterize(vertices: &[Point], width: u32, height: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let mut grid: Vec<imageproc::point::Point<i32>> = vertices
        .iter()
        .map(|p| imageproc::point::Point::new(grid_coord(p.x), grid_coord(p.y)))
        .collect();
    grid.dedup();
    while grid.len() > 1 && grid.first() == grid.last() {
        grid.pop();
    }
    if grid.len() >= 2 {
        draw_polygon_mut(&mut mask, &grid, Luma([FOREGROUND]));
    }
    mask
}

#[allow(clippy::cast_possible_truncation)]
fn grid_coord(v: f64) -> i32 {
    v.round() as i32
}

/// Rasterize a polygon and run-length encode the result.
#[must_use]
pub fn encode_polygon(vertices: &[Point], width: u32, height: u32, order: ScanOrder) -> RleMask {
    RleMask::encode(&rasterize(vertices, width, height), order)
}

/// Pixel-wise maximum of several masks on a `width x height` canvas.
///
/// Masks smaller than the canvas contribute only where they overlap it.
#[must_use]
pub fn combine<'a>(
    masks: impl IntoIterator<Item = &'a GrayImage>,
    width: u32,
    height: u32,
) -> GrayImage {
    let mut out = GrayImage::new(width, height);
    for mask in masks {
        let w = mask.width().min(width);
        let h = mask.height().min(height);
        for y in 0..h {
            for x in 0..w {
                let v = mask.get_pixel(x, y).0[0];
                let dst = out.get_pixel_mut(x, y);
                dst.0[0] = dst.0[0].max(v);
            }
        }
    }
    out
}
