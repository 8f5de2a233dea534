//! Canonical ROI-set JSON: an ordered array of raw ROI records.
//!
//! ```json
//! [{"id": 1, "name": "glom", "type": "polygon",
//!   "vertices": [[0.0, 0.0], [4.0, 0.0], [4.0, 3.0]],
//!   "area": 6.0, "area_microns": 1.5}]
//! ```

use slideslicer_roi::{AnnotationParser, RawRoi, RoiCollection, RoiError};

use crate::ExportError;

/// Serialize ROI records as a pretty-printed JSON array.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if serialization fails.
pub fn to_json(records: &[RawRoi]) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// Serialize the records a collection retained after pruning.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if serialization fails.
pub fn collection_to_json(collection: &RoiCollection) -> Result<String, ExportError> {
    to_json(collection.raw_records())
}

/// Parse a JSON array of ROI records.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if the document is not a valid record
/// array.
pub fn from_json(json: &str) -> Result<Vec<RawRoi>, ExportError> {
    Ok(serde_json::from_str(json)?)
}

/// Reads persisted ROI-set JSON, normalizing names on the way in.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAnnotationParser;

impl AnnotationParser for JsonAnnotationParser {
    type Source = str;

    fn parse(&self, source: &str) -> Result<Vec<RawRoi>, RoiError> {
        let mut records = from_json(source).map_err(|e| RoiError::Parse(e.to_string()))?;
        for record in &mut records {
            record.name = RawRoi::normalize_name(&record.name);
        }
        Ok(records)
    }
}
