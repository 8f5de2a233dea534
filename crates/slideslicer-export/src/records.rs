//! Per-patch ROI records.
//!
//! One JSON object per clipped ROI, with the COCO mask flattened in when
//! the query asked for RLE output:
//!
//! ```json
//! {"id": 3, "name": "glom", "vertices": [[0.0, 0.0], ...],
//!  "area": 812.5, "area_fraction": 0.05, "counts": [...], "size": [128, 128]}
//! ```

use serde::{Deserialize, Serialize};
use slideslicer_roi::{PatchRoi, Point, RoiId};

use crate::ExportError;
use crate::coco::CocoRle;

/// Serializable view of a [`PatchRoi`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRoiRecord {
    /// Source ROI id.
    pub id: RoiId,
    /// Source ROI name.
    pub name: String,
    /// Closed exterior ring in patch coordinates.
    pub vertices: Vec<Point>,
    /// Area in output pixels.
    pub area: f64,
    /// Share of the patch covered.
    pub area_fraction: f64,
    /// COCO (column-major) run lengths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<Vec<u32>>,
    /// COCO `[height, width]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<[u32; 2]>,
}

impl From<&PatchRoi> for PatchRoiRecord {
    fn from(roi: &PatchRoi) -> Self {
        let coco = roi.rle.as_ref().map(CocoRle::from);
        Self {
            id: roi.id,
            name: roi.name.clone(),
            vertices: roi.vertices(),
            area: roi.area,
            area_fraction: roi.area_fraction,
            size: coco.as_ref().map(|c| c.size),
            counts: coco.map(|c| c.counts),
        }
    }
}

impl PatchRoiRecord {
    /// The record's mask, if it carries one.
    #[must_use]
    pub fn coco(&self) -> Option<CocoRle> {
        Some(CocoRle {
            counts: self.counts.clone()?,
            size: self.size?,
        })
    }
}

/// Serialize patch ROIs as a JSON array of records.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if serialization fails.
pub fn patch_rois_to_json(rois: &[PatchRoi]) -> Result<String, ExportError> {
    let records: Vec<PatchRoiRecord> = rois.iter().map(PatchRoiRecord::from).collect();
    Ok(serde_json::to_string(&records)?)
}
