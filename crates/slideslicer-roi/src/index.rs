//! Bounding-box R\*-tree over ROI polygons.
//!
//! Slides carry thousands of ROIs; both containment resolution and
//! viewport queries first narrow candidates by bounding box and only
//! then run exact polygon predicates.

use geo::{BoundingRect, Polygon, Rect};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, Envelope, RTree, RTreeObject, SelectionFunction};

/// A polygon's bounding box tagged with the polygon's position in the
/// indexed sequence.
type IndexedBox = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Spatial index from bounding boxes to positions in a polygon slice.
#[derive(Debug, Clone)]
pub struct BoxIndex {
    tree: RTree<IndexedBox>,
}

impl BoxIndex {
    /// Index the given polygons by position. Empty polygons have no
    /// bounding box and are never returned by queries.
    pub fn new<'a>(polygons: impl IntoIterator<Item = &'a Polygon<f64>>) -> Self {
        let boxes: Vec<IndexedBox> = polygons
            .into_iter()
            .enumerate()
            .filter_map(|(position, polygon)| {
                let rect = polygon.bounding_rect()?;
                Some(GeomWithData::new(
                    Rectangle::from_corners(corner_min(rect), corner_max(rect)),
                    position,
                ))
            })
            .collect();
        Self {
            tree: RTree::bulk_load(boxes),
        }
    }

    /// Positions whose bounding box touches `rect`, in ascending order.
    #[must_use]
    pub fn candidates(&self, rect: Rect<f64>) -> Vec<usize> {
        let query = AABB::from_corners(corner_min(rect), corner_max(rect));
        let mut positions: Vec<usize> = self
            .tree
            .locate_with_selection_function(TouchingBox(query))
            .map(|entry| entry.data)
            .collect();
        positions.sort_unstable();
        positions
    }

    /// Number of indexed (non-empty) polygons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Whether nothing was indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

/// Selects every entry whose envelope intersects the query box.
struct TouchingBox(AABB<[f64; 2]>);

impl SelectionFunction<IndexedBox> for TouchingBox {
    fn should_unpack_parent(&self, envelope: &AABB<[f64; 2]>) -> bool {
        envelope.intersects(&self.0)
    }

    fn should_unpack_leaf(&self, leaf: &IndexedBox) -> bool {
        leaf.envelope().intersects(&self.0)
    }
}

fn corner_min(rect: Rect<f64>) -> [f64; 2] {
    [rect.min().x, rect.min().y]
}

fn corner_max(rect: Rect<f64>) -> [f64; 2] {
    [rect.max().x, rect.max().y]
}

#[cfg(test)]
mod tests {
    use geo::coord;

    use super::*;
    use crate::types::{Point, empty_polygon, polygon_from_vertices};

    fn square(x: f64, y: f64, side: f64) -> Polygon<f64> {
        polygon_from_vertices(&[
            Point::new(x, y),
            Point::new(x + side, y),
            Point::new(x + side, y + side),
            Point::new(x, y + side),
        ])
    }

    #[test]
    fn candidates_are_sorted_and_filtered() {
        let polygons = vec![
            square(100.0, 100.0, 10.0),
            square(0.0, 0.0, 10.0),
            empty_polygon(),
            square(5.0, 5.0, 10.0),
        ];
        let index = BoxIndex::new(&polygons);
        assert_eq!(index.len(), 3);
        let hits = index.candidates(Rect::new(
            coord! { x: 8.0, y: 8.0 },
            coord! { x: 9.0, y: 9.0 },
        ));
        assert_eq!(hits, vec![1, 3]);
    }

    #[test]
    fn empty_index() {
        let index = BoxIndex::new(&[empty_polygon()]);
        assert!(index.is_empty());
        assert!(
            index
                .candidates(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 }))
                .is_empty()
        );
    }
}
