//! slideslicer-export: Pure format serializers (sans-IO)
//!
//! Converts ROI sets and patch results into interchange formats:
//! the canonical ROI-set JSON records, per-patch ROI records, and
//! MS-COCO run-length encoding (plain and compressed string form).

pub mod coco;
pub mod records;
pub mod roi_json;

pub use coco::{CocoCompressedRle, CocoRle, decode_counts, encode_counts};
pub use records::{PatchRoiRecord, patch_rois_to_json};
pub use roi_json::{JsonAnnotationParser, collection_to_json, from_json, to_json};

/// Errors produced while serializing or deserializing.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// JSON could not be produced or parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run-length counts are malformed or do not match the canvas.
    #[error("invalid RLE: {0}")]
    InvalidRle(String),
}
