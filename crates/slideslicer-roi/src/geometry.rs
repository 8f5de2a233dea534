//! Geometry normalization: turn raw ROI vertices into one simple polygon.
//!
//! Annotation tools happily produce self-intersecting outlines (a lasso
//! that crosses itself) and ellipses stored as bounding boxes. Every
//! downstream step assumes a single polygon without self-intersections
//! or holes, so this module:
//!
//! 1. expands ellipse records into an N-point polygon,
//! 2. drops degenerate outlines to an empty polygon,
//! 3. splits self-intersecting outlines with a unary boolean union and
//!    keeps the largest part,
//! 4. rebuilds polygons with several boundary loops from the loop that
//!    encloses the largest area.
//!
//! Already-simple input is returned unchanged.

use std::f64::consts::TAU;

use geo::{Area, BooleanOps, Coord, MultiPolygon, Polygon, Validation};

use crate::types::{
    GeometryError, Point, RawRoi, ResolvedGeometry, ShapeKind, empty_polygon,
    polygon_from_vertices,
};

/// Number of vertices used to approximate an ellipse unless configured
/// otherwise.
pub const DEFAULT_ELLIPSE_POINTS: usize = 50;

/// Approximate the ellipse inscribed in the box spanned by two corners.
///
/// Returns `points` vertices spaced uniformly in angle, starting at the
/// rightmost point and proceeding toward increasing `y`. The ring is not
/// explicitly closed; [`Polygon::new`] closes it.
#[must_use]
pub fn ellipse_vertices(corner_a: Point, corner_b: Point, points: usize) -> Vec<Point> {
    let cx = (corner_a.x + corner_b.x) / 2.0;
    let cy = (corner_a.y + corner_b.y) / 2.0;
    let rx = (corner_b.x - corner_a.x).abs() / 2.0;
    let ry = (corner_b.y - corner_a.y).abs() / 2.0;

    #[allow(clippy::cast_precision_loss)]
    let step = TAU / points as f64;
    (0..points)
        .map(|k| {
            #[allow(clippy::cast_precision_loss)]
            let t = step * k as f64;
            Point::new(rx.mul_add(t.cos(), cx), ry.mul_add(t.sin(), cy))
        })
        .collect()
}

/// Normalize one raw ROI into a single simple polygon.
///
/// Degenerate outlines (fewer than 3 distinct vertices, or zero area)
/// normalize to an empty polygon rather than an error; callers filter
/// those out where it matters.
///
/// # Errors
///
/// Returns [`GeometryError`] if a vertex is not finite, or an ellipse
/// record carries fewer than two bounding-box corners.
pub fn normalize(raw: &RawRoi, ellipse_points: usize) -> Result<Polygon<f64>, GeometryError> {
    if let Some(bad) = raw.vertices.iter().find(|p| !p.is_finite()) {
        return Err(GeometryError {
            id: raw.id,
            reason: format!("non-finite vertex ({}, {})", bad.x, bad.y),
        });
    }

    let vertices = match raw.shape_kind {
        ShapeKind::Polygon => raw.vertices.clone(),
        ShapeKind::Ellipse => {
            let (min, max) = bounding_corners(&raw.vertices).ok_or_else(|| GeometryError {
                id: raw.id,
                reason: format!(
                    "ellipse needs two bounding-box corners, got {} vertices",
                    raw.vertices.len()
                ),
            })?;
            ellipse_vertices(min, max, ellipse_points)
        }
    };

    Ok(normalize_vertices(&vertices))
}

/// Normalize a bare vertex list into a single simple polygon.
#[must_use]
pub fn normalize_vertices(vertices: &[Point]) -> Polygon<f64> {
    let cleaned = dedup_ring(vertices);
    if cleaned.len() < 3 {
        return empty_polygon();
    }
    resolve_self_intersection(&polygon_from_vertices(&cleaned))
}

/// Reduce any polygon to a single part without self-intersections or
/// holes.
///
/// Valid simple polygons are returned as-is. Self-intersecting input is
/// split into parts with a unary union and the largest part is kept; a
/// polygon with holes is rebuilt from its largest boundary loop.
#[must_use]
pub fn resolve_self_intersection(polygon: &Polygon<f64>) -> Polygon<f64> {
    if polygon.exterior().0.is_empty() || polygon.unsigned_area() == 0.0 {
        return empty_polygon();
    }
    if polygon.interiors().is_empty() && polygon.is_valid() {
        return polygon.clone();
    }

    let single = if polygon.is_valid() {
        polygon.clone()
    } else {
        let parts = MultiPolygon::new(vec![polygon.clone()]).union(&MultiPolygon::new(Vec::new()));
        match ResolvedGeometry::from_polygons(parts.0) {
            ResolvedGeometry::Empty => return empty_polygon(),
            ResolvedGeometry::Single(p) => p,
            ResolvedGeometry::Parts(parts) => match largest_part(parts) {
                Some(p) => p,
                None => return empty_polygon(),
            },
        }
    };

    if single.interiors().is_empty() {
        single
    } else {
        outermost_loop(&single)
    }
}

/// The part with the largest area, if any.
#[must_use]
pub fn largest_part(parts: Vec<Polygon<f64>>) -> Option<Polygon<f64>> {
    parts
        .into_iter()
        .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
}

/// Rebuild a polygon from whichever of its boundary loops encloses the
/// largest area, discarding the others.
fn outermost_loop(polygon: &Polygon<f64>) -> Polygon<f64> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| Polygon::new(ring.clone(), Vec::new()))
        .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
        .unwrap_or_else(empty_polygon)
}

/// Drop consecutive duplicate vertices, including a closing vertex that
/// repeats the first one.
fn dedup_ring(vertices: &[Point]) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(vertices.len());
    for &p in vertices {
        if out.last() != Some(&p) {
            out.push(p);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

/// Minimum and maximum corners over all vertices; needs at least two.
fn bounding_corners(vertices: &[Point]) -> Option<(Point, Point)> {
    if vertices.len() < 2 {
        return None;
    }
    let mut min = Coord {
        x: f64::INFINITY,
        y: f64::INFINITY,
    };
    let mut max = Coord {
        x: f64::NEG_INFINITY,
        y: f64::NEG_INFINITY,
    };
    for p in vertices {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    Some((min.into(), max.into()))
}
