//! Core identifiers for the segmented record-number space

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::SegmentConfig;

/// Absolute record number within one file.
pub type RecordNumber = u64;

/// Segment identifier: `record_number / slots_per_segment`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SegmentNumber(pub u32);

impl SegmentNumber {
    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SegmentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment_{}", self.0)
    }
}

/// Split an absolute record number into (segment, slot).
pub fn split_record(record: RecordNumber, config: &SegmentConfig) -> (SegmentNumber, u16) {
    let slots = u64::from(config.slots());
    let segment = (record / slots) as u32;
    let slot = (record % slots) as u16;
    (SegmentNumber(segment), slot)
}

/// Rebuild an absolute record number from (segment, slot).
pub fn join_record(segment: SegmentNumber, slot: u16, config: &SegmentConfig) -> RecordNumber {
    u64::from(segment.0) * u64::from(config.slots()) + u64::from(slot)
}
