//! Tissue/feature containment: which feature ROIs lie in which tissue chunk.
//!
//! Tissue chunks are coarse outlines of physical tissue pieces; features
//! (glomeruli, inflammation, ...) are fine annotations inside them. A
//! feature is assigned to the *first* tissue chunk, in tissue insertion
//! order, that it intersects, and is then drained from the pool of
//! unassigned features so it can never be claimed twice.

use std::collections::BTreeSet;

use geo::{BoundingRect, Intersects};
use serde::{Deserialize, Serialize};

use crate::index::BoxIndex;
use crate::types::{NormalizedRoi, RoiId};

/// When tissue chunks without any feature are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoveEmpty {
    /// Always remove empty chunks. With no features at all, every
    /// tissue chunk is removed.
    #[default]
    Always,
    /// Keep every tissue chunk.
    Never,
    /// Remove empty chunks only when at least one feature ROI exists.
    IfFeaturesPresent,
}

impl RemoveEmpty {
    /// Whether pruning should run for this ROI set.
    #[must_use]
    pub fn applies(self, rois: &[NormalizedRoi]) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::IfFeaturesPresent => rois.iter().any(|roi| !roi.is_tissue()),
        }
    }
}

/// Ordered map from tissue ROI id to the ids of the features it contains.
///
/// Entries follow tissue insertion order; each feature list follows
/// feature insertion order. A feature id appears in at most one list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TissueContainmentMap {
    entries: Vec<(RoiId, Vec<RoiId>)>,
}

impl TissueContainmentMap {
    /// Features contained in the given tissue chunk.
    #[must_use]
    pub fn get(&self, tissue: RoiId) -> Option<&[RoiId]> {
        self.entries
            .iter()
            .find(|(id, _)| *id == tissue)
            .map(|(_, features)| features.as_slice())
    }

    /// Iterate `(tissue id, feature ids)` in tissue order.
    pub fn iter(&self) -> impl Iterator<Item = (RoiId, &[RoiId])> {
        self.entries.iter().map(|(id, f)| (*id, f.as_slice()))
    }

    /// Tissue chunks that contain no feature.
    pub fn empty_tissue(&self) -> impl Iterator<Item = RoiId> + '_ {
        self.entries
            .iter()
            .filter(|(_, features)| features.is_empty())
            .map(|(id, _)| *id)
    }

    /// Every feature assigned to some tissue chunk.
    #[must_use]
    pub fn assigned_features(&self) -> BTreeSet<RoiId> {
        self.entries
            .iter()
            .flat_map(|(_, features)| features.iter().copied())
            .collect()
    }

    /// Number of tissue chunks.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no tissue chunks.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compute which features each tissue chunk contains.
///
/// Feature candidates come from a bounding-box index; the exact polygon
/// intersection test runs only on candidates still in the unassigned set.
#[must_use]
pub fn resolve(rois: &[NormalizedRoi]) -> TissueContainmentMap {
    let (tissue, features): (Vec<&NormalizedRoi>, Vec<&NormalizedRoi>) =
        rois.iter().partition(|roi| roi.is_tissue());

    let index = BoxIndex::new(features.iter().map(|f| &f.polygon));
    let mut unassigned: BTreeSet<usize> = (0..features.len()).collect();

    let entries = tissue
        .iter()
        .map(|chunk| {
            let Some(bounds) = chunk.polygon.bounding_rect() else {
                return (chunk.id, Vec::new());
            };
            let claimed: Vec<usize> = index
                .candidates(bounds)
                .into_iter()
                .filter(|pos| unassigned.contains(pos))
                .filter(|&pos| chunk.polygon.intersects(&features[pos].polygon))
                .collect();
            for pos in &claimed {
                unassigned.remove(pos);
            }
            (chunk.id, claimed.into_iter().map(|pos| features[pos].id).collect())
        })
        .collect();

    TissueContainmentMap { entries }
}

/// Drop tissue chunks whose containment list is empty. Features are
/// always kept.
#[must_use]
pub fn prune(rois: Vec<NormalizedRoi>, map: &TissueContainmentMap) -> Vec<NormalizedRoi> {
    rois.into_iter()
        .filter(|roi| !roi.is_tissue() || map.get(roi.id).is_some_and(|f| !f.is_empty()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Point, RawRoi, ShapeKind, empty_polygon, polygon_from_vertices};

    fn roi(id: RoiId, name: &str, x: f64, y: f64, side: f64) -> NormalizedRoi {
        let vertices = vec![
            Point::new(x, y),
            Point::new(x + side, y),
            Point::new(x + side, y + side),
            Point::new(x, y + side),
        ];
        NormalizedRoi {
            id,
            name: name.to_owned(),
            polygon: polygon_from_vertices(&vertices),
            source: RawRoi {
                id,
                name: name.to_owned(),
                shape_kind: ShapeKind::Polygon,
                vertices,
                area: side * side,
                area_microns: None,
            },
        }
    }

    fn degenerate_tissue(id: RoiId) -> NormalizedRoi {
        let mut r = roi(id, "tissue", 500.0, 500.0, 1.0);
        r.polygon = empty_polygon();
        r
    }

    #[test]
    fn three_tissue_scenario_prunes_degenerate_chunk() {
        // Tissue areas ~1000 and ~500, plus a zero-area chunk; each
        // feature lies in exactly one of the first two chunks.
        let rois = vec![
            roi(1, "tissue", 0.0, 0.0, 1000_f64.sqrt()),
            roi(2, "tissue", 100.0, 0.0, 500_f64.sqrt()),
            degenerate_tissue(3),
            roi(4, "glom", 5.0, 5.0, 2.0),
            roi(5, "glom", 105.0, 5.0, 2.0),
        ];
        let map = resolve(&rois);
        assert_eq!(map.get(1), Some(&[4][..]));
        assert_eq!(map.get(2), Some(&[5][..]));
        assert_eq!(map.get(3), Some(&[][..]));

        let kept: Vec<RoiId> = prune(rois, &map).iter().map(|r| r.id).collect();
        assert_eq!(kept, vec![1, 2, 4, 5]);
    }

    #[test]
    fn overlapping_tissue_first_match_wins() {
        let rois = vec![
            roi(1, "tissue", 0.0, 0.0, 20.0),
            roi(2, "tissue", 10.0, 0.0, 20.0),
            roi(3, "infl", 12.0, 2.0, 4.0),
            roi(4, "infl", 25.0, 2.0, 2.0),
        ];
        let map = resolve(&rois);
        assert_eq!(map.get(1), Some(&[3][..]));
        assert_eq!(map.get(2), Some(&[4][..]));
    }

    #[test]
    fn every_feature_assigned_at_most_once() {
        let rois = vec![
            roi(1, "tissue", 0.0, 0.0, 50.0),
            roi(2, "tissue", 0.0, 0.0, 50.0),
            roi(3, "tissue", 40.0, 40.0, 50.0),
            roi(10, "glom", 45.0, 45.0, 3.0),
            roi(11, "glom", 1.0, 1.0, 3.0),
            roi(12, "glom", 80.0, 80.0, 3.0),
            roi(13, "glom", 500.0, 500.0, 3.0),
        ];
        let map = resolve(&rois);

        let mut seen = BTreeSet::new();
        for (_, features) in map.iter() {
            for f in features {
                assert!(seen.insert(*f), "feature {f} assigned twice");
            }
        }
        // The union equals the features touching at least one chunk.
        assert_eq!(map.assigned_features(), BTreeSet::from([10, 11, 12]));
        assert_eq!(map.get(1), Some(&[10, 11][..]));
        assert_eq!(map.get(2), Some(&[][..]));
        assert_eq!(map.get(3), Some(&[12][..]));
        assert_eq!(map.empty_tissue().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn no_features_prunes_all_tissue() {
        let rois = vec![roi(1, "tissue", 0.0, 0.0, 10.0), roi(2, "tissue", 20.0, 0.0, 10.0)];
        let map = resolve(&rois);
        assert_eq!(map.len(), 2);
        assert!(prune(rois, &map).is_empty());
    }

    #[test]
    fn no_tissue_keeps_all_features() {
        let rois = vec![roi(1, "glom", 0.0, 0.0, 10.0)];
        let map = resolve(&rois);
        assert!(map.is_empty());
        assert_eq!(prune(rois, &map).len(), 1);
    }

    #[test]
    fn remove_empty_policy() {
        let only_tissue = vec![roi(1, "tissue", 0.0, 0.0, 10.0)];
        let mixed = vec![roi(1, "tissue", 0.0, 0.0, 10.0), roi(2, "glom", 50.0, 50.0, 1.0)];
        assert!(RemoveEmpty::Always.applies(&only_tissue));
        assert!(!RemoveEmpty::Never.applies(&mixed));
        assert!(!RemoveEmpty::IfFeaturesPresent.applies(&only_tissue));
        assert!(RemoveEmpty::IfFeaturesPresent.applies(&mixed));
    }

    #[test]
    fn remove_empty_serde_names() {
        let json = serde_json::to_string(&RemoveEmpty::IfFeaturesPresent).unwrap();
        assert_eq!(json, "\"if_features_present\"");
    }
}
