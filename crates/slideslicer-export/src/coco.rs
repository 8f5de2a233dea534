//! MS-COCO run-length encoding.
//!
//! COCO masks are counted in column-major order and carry their size as
//! `[height, width]`. The compressed form packs the counts into a
//! printable string: each count (after the first two, as a delta against
//! the count two positions back) is split into 5-bit groups, low group
//! first, with bit `0x20` marking continuation and `48` added to every
//! byte.

use serde::{Deserialize, Serialize};
use slideslicer_roi::{RleMask, ScanOrder};

use crate::ExportError;

/// Uncompressed COCO RLE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CocoRle {
    /// Column-major alternating background/foreground run lengths.
    pub counts: Vec<u32>,
    /// `[height, width]`.
    pub size: [u32; 2],
}

/// COCO RLE with counts packed into a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CocoCompressedRle {
    /// Packed counts.
    pub counts: String,
    /// `[height, width]`.
    pub size: [u32; 2],
}

impl From<&RleMask> for CocoRle {
    fn from(mask: &RleMask) -> Self {
        let column_major = mask.reorder(ScanOrder::ColumnMajor);
        Self {
            counts: column_major.counts,
            size: [mask.height, mask.width],
        }
    }
}

impl CocoRle {
    /// Convert back into an engine mask (column-major).
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidRle`] if the counts do not add up to
    /// `height * width`.
    pub fn to_mask(&self) -> Result<RleMask, ExportError> {
        let [height, width] = self.size;
        let mask = RleMask {
            width,
            height,
            order: ScanOrder::ColumnMajor,
            counts: self.counts.clone(),
        };
        if mask.covers_canvas() {
            Ok(mask)
        } else {
            Err(ExportError::InvalidRle(format!(
                "counts do not cover a {height}x{width} canvas"
            )))
        }
    }

    /// Pack the counts into the compressed string form.
    #[must_use]
    pub fn compress(&self) -> CocoCompressedRle {
        CocoCompressedRle {
            counts: encode_counts(&self.counts),
            size: self.size,
        }
    }
}

impl CocoCompressedRle {
    /// Unpack the counts string.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidRle`] if the string is malformed.
    pub fn decompress(&self) -> Result<CocoRle, ExportError> {
        Ok(CocoRle {
            counts: decode_counts(&self.counts)?,
            size: self.size,
        })
    }
}

/// Pack run lengths into the COCO counts string.
#[must_use]
pub fn encode_counts(counts: &[u32]) -> String {
    let mut out = String::new();
    for (i, &count) in counts.iter().enumerate() {
        let mut x = i64::from(count);
        if i > 2 {
            x -= i64::from(counts[i - 2]);
        }
        loop {
            let mut c = x & 0x1f;
            x >>= 5;
            let more = if c & 0x10 == 0 { x != 0 } else { x != -1 };
            if more {
                c |= 0x20;
            }
            // c < 64, so the byte is printable ASCII.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            out.push(char::from((c + 48) as u8));
            if !more {
                break;
            }
        }
    }
    out
}

/// Unpack a COCO counts string into run lengths.
///
/// # Errors
///
/// Returns [`ExportError::InvalidRle`] on bytes outside the encoding
/// alphabet, a truncated final count, or counts that decode negative or
/// beyond `u32`.
pub fn decode_counts(packed: &str) -> Result<Vec<u32>, ExportError> {
    let mut counts: Vec<u32> = Vec::new();
    let mut bytes = packed.bytes().peekable();

    while bytes.peek().is_some() {
        let mut x: i64 = 0;
        let mut shift = 0_u32;
        loop {
            let Some(byte) = bytes.next() else {
                return Err(ExportError::InvalidRle("truncated count".to_owned()));
            };
            if !(48..48 + 64).contains(&byte) {
                return Err(ExportError::InvalidRle(format!(
                    "byte {byte:#04x} outside the counts alphabet"
                )));
            }
            if shift > 35 {
                return Err(ExportError::InvalidRle("count too long".to_owned()));
            }
            let c = i64::from(byte - 48);
            x |= (c & 0x1f) << shift;
            shift += 5;
            if c & 0x20 == 0 {
                if c & 0x10 != 0 {
                    x |= -1_i64 << shift;
                }
                break;
            }
        }
        let m = counts.len();
        if m > 2 {
            x += i64::from(counts[m - 2]);
        }
        let count = u32::try_from(x).map_err(|_| {
            ExportError::InvalidRle(format!("count {x} out of range at position {m}"))
        })?;
        counts.push(count);
    }
    Ok(counts)
}
