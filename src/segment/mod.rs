//! Segmented record-number sets
//!
//! The record-number space of one file is cut into fixed-size segments.
//! One (index value, segment) pair stores its member set in one of three
//! cardinality-chosen encodings, and per-file occupancy lives in a
//! segmented existence bitmap.
//!
//! # Architecture
//!
//! - `SegmentSet`: Int / List / Bitmap member set with a length-keyed wire format
//! - `RecordSet`: ordered map of segments, boolean composition, query results
//! - `ExistenceBitmap`: occupancy tracking and record-number reuse

mod existence;
mod recordset;
mod set;
mod types;

pub use existence::*;
pub use recordset::*;
pub use set::SegmentSet;
pub use types::*;
