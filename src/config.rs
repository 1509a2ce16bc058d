use serde::{Deserialize, Serialize};

use crate::error::{Result, SegstoreError};

/// Geometry of one open file's record-number segments.
///
/// A segment is a window of `slots` consecutive record numbers; the slot
/// offset of a record within its segment always fits an unsigned 16-bit
/// field, so `slots` is capped at 65536. The bitmap encoding packs one bit
/// per slot, which requires `slots` to be a multiple of 8.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentConfig {
    slots: u32,
}

impl SegmentConfig {
    pub fn new(slots: u32) -> Result<Self> {
        if slots < 8 || slots > 65_536 || slots % 8 != 0 {
            return Err(SegstoreError::InvalidSegmentSize(slots));
        }
        Ok(Self { slots })
    }

    /// Number of record-number slots per segment.
    pub fn slots(&self) -> u32 {
        self.slots
    }

    /// Byte width of one full bitmap segment.
    pub fn bytes(&self) -> usize {
        (self.slots / 8) as usize
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        // 4KB bitmap per segment
        Self { slots: 32_768 }
    }
}

/// Pre-validated description of one logical file: its primary field name
/// and the secondary fields to index.
///
/// Validation of the raw specification syntax happens upstream; this type
/// is only the shape the engine consumes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileDefinition {
    pub name: String,
    pub primary: String,
    pub secondary: Vec<String>,
}

impl FileDefinition {
    pub fn new(
        name: impl Into<String>,
        primary: impl Into<String>,
        secondary: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            primary: primary.into(),
            secondary: secondary.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.secondary.iter().any(|f| f == field)
    }
}

/// The full set of files managed by one database.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileSpec {
    pub files: Vec<FileDefinition>,
}

impl FileSpec {
    pub fn new(files: Vec<FileDefinition>) -> Self {
        Self { files }
    }

    pub fn get(&self, name: &str) -> Option<&FileDefinition> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// Tuning for the deferred-update (bulk index build) path.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DeferredConfig {
    /// Maximum number of generation tables merged per round.
    /// Bounds peak temporary-storage footprint, nothing else.
    pub sort_scale: usize,
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self { sort_scale: 10 }
    }
}
