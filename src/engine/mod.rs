//! Storage engine over the generic row store
//!
//! `Database` owns the row store and one handle per logical file: a primary
//! table, an existence bitmap, a segment-blob table, a control row and one
//! index table per secondary field. All mutation happens inside the
//! caller-managed begin/commit/rollback bracket; the engine is
//! single-threaded and takes no locks of its own.
//!
//! # Architecture
//!
//! - `engine::file`: primary CRUD and record-number allocation
//! - `engine::index`: secondary index row maintenance and lookups
//! - `engine::cursor`: ordered and ordinal traversal
//! - `engine::deferred`: bulk index construction via sort/merge

mod cursor;
mod deferred;
mod file;
mod index;
mod keys;

pub use cursor::{PrimaryCursor, SecondaryCursor};
pub use deferred::DeferredWriter;

use std::collections::HashMap;

use tracing::debug;

use crate::config::{DeferredConfig, FileSpec, SegmentConfig};
use crate::error::{Result, SegstoreError};
use crate::segment::ExistenceBitmap;
use crate::store::{RowStore, TableId};

const SEGMENT_SIZE_KEY: &[u8] = b"segment_size";

/// Tables and bitmap state for one logical file.
#[derive(Debug)]
pub(crate) struct FileHandle {
    pub(crate) primary: TableId,
    pub(crate) control: TableId,
    pub(crate) blobs: TableId,
    pub(crate) indexes: HashMap<String, TableId>,
    pub(crate) ebm: ExistenceBitmap,
}

/// Segmented record/index engine over a row store.
#[derive(Debug)]
pub struct Database<S: RowStore> {
    pub(crate) store: S,
    pub(crate) config: SegmentConfig,
    pub(crate) deferred: DeferredConfig,
    pub(crate) files: HashMap<String, FileHandle>,
}

impl<S: RowStore> Database<S> {
    /// Open the files named by a pre-validated specification, creating
    /// tables as needed.
    ///
    /// The segment size is recorded per file on first open; reopening with
    /// a different size is fatal and the caller must retry with the
    /// recorded one.
    pub fn open(mut store: S, spec: &FileSpec, config: SegmentConfig) -> Result<Self> {
        let mut files = HashMap::new();
        for def in &spec.files {
            let primary = TableId::named(def.name.clone());
            let control = TableId::named(format!("{}__control", def.name));
            let blobs = TableId::named(format!("{}__segments", def.name));
            store.create_table(&primary)?;
            store.create_table(&control)?;
            store.create_table(&blobs)?;

            check_segment_size(&mut store, &control, &config)?;

            let mut indexes = HashMap::new();
            for field in &def.secondary {
                let table = TableId::named(format!("{}__{}", def.name, field));
                store.create_table(&table)?;
                indexes.insert(field.clone(), table);
            }

            let ebm = ExistenceBitmap::open(
                &mut store,
                TableId::named(format!("{}__ebm", def.name)),
                config,
            )?;

            debug!(
                file = %def.name,
                fields = def.secondary.len(),
                slots = config.slots(),
                "opened file"
            );
            files.insert(
                def.name.clone(),
                FileHandle {
                    primary,
                    control,
                    blobs,
                    indexes,
                    ebm,
                },
            );
        }
        Ok(Self {
            store,
            config,
            deferred: DeferredConfig::default(),
            files,
        })
    }

    pub fn with_deferred_config(mut self, deferred: DeferredConfig) -> Self {
        self.deferred = deferred;
        self
    }

    pub fn segment_config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Access the underlying row store (e.g. for backend-specific setup).
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Tear down the engine and hand the row store back to the caller.
    pub fn into_store(self) -> S {
        self.store
    }

    pub fn begin(&mut self) -> Result<()> {
        self.store.begin()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.store.commit()
    }

    /// Roll the row store back and resynchronize per-file caches with the
    /// rewound registry rows.
    pub fn rollback(&mut self) -> Result<()> {
        self.store.rollback()?;
        for handle in self.files.values_mut() {
            handle.ebm.reload_registry(&self.store)?;
        }
        Ok(())
    }

    pub(crate) fn file(&self, name: &str) -> Result<&FileHandle> {
        self.files
            .get(name)
            .ok_or_else(|| SegstoreError::UnknownFile(name.to_string()))
    }

    /// Split-borrow the store and one file handle so bitmap maintenance
    /// can run against the store it was loaded from.
    pub(crate) fn parts_mut(&mut self, name: &str) -> Result<(&mut S, &mut FileHandle)> {
        let handle = self
            .files
            .get_mut(name)
            .ok_or_else(|| SegstoreError::UnknownFile(name.to_string()))?;
        Ok((&mut self.store, handle))
    }
}

impl FileHandle {
    pub(crate) fn index_table(&self, file: &str, field: &str) -> Result<&TableId> {
        self.indexes.get(field).ok_or_else(|| SegstoreError::UnknownField {
            file: file.to_string(),
            field: field.to_string(),
        })
    }
}

fn check_segment_size<S: RowStore>(
    store: &mut S,
    control: &TableId,
    config: &SegmentConfig,
) -> Result<()> {
    match store.get(control, SEGMENT_SIZE_KEY)? {
        Some(bytes) => {
            let recorded = u32::from_be_bytes(bytes.as_slice().try_into().map_err(|_| {
                SegstoreError::Corruption("malformed segment size control row".into())
            })?);
            if recorded != config.slots() {
                return Err(SegstoreError::SegmentSizeMismatch {
                    recorded,
                    requested: config.slots(),
                });
            }
        }
        None => {
            store.put(control, SEGMENT_SIZE_KEY, &config.slots().to_be_bytes())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileDefinition;
    use crate::store::MemoryStore;

    fn spec() -> FileSpec {
        FileSpec::new(vec![FileDefinition::new("games", "game", &["site"])])
    }

    #[test]
    fn test_open_unknown_names() {
        let db = Database::open(
            MemoryStore::new(),
            &spec(),
            SegmentConfig::new(128).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            db.file("players"),
            Err(SegstoreError::UnknownFile(_))
        ));
        let file = db.file("games").unwrap();
        assert!(matches!(
            file.index_table("games", "event"),
            Err(SegstoreError::UnknownField { .. })
        ));
        assert!(file.index_table("games", "site").is_ok());
    }

    #[test]
    fn test_segment_size_recorded_and_checked() {
        let db = Database::open(
            MemoryStore::new(),
            &spec(),
            SegmentConfig::new(128).unwrap(),
        )
        .unwrap();
        let store = db.into_store();

        // Reopening with the same size works; a different size is fatal.
        let db = Database::open(store, &spec(), SegmentConfig::new(128).unwrap()).unwrap();
        let store = db.into_store();

        let err = Database::open(store, &spec(), SegmentConfig::new(256).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            SegstoreError::SegmentSizeMismatch {
                recorded: 128,
                requested: 256
            }
        ));
    }
}
