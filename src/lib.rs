pub mod config;
pub mod engine;
pub mod error;
pub mod segment;
pub mod store;

pub use config::{DeferredConfig, FileDefinition, FileSpec, SegmentConfig};
pub use engine::{Database, DeferredWriter, PrimaryCursor, SecondaryCursor};
pub use error::{Result, SegstoreError};
pub use segment::{
    join_record, split_record, ExistenceBitmap, RecordNumber, RecordSet, SegmentNumber, SegmentSet,
};
pub use store::{MemoryStore, RowStore, StoreCursor, TableId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
