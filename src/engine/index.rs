//! Secondary index row maintenance
//!
//! One row per occupied (value, segment) pair: the cached member count and
//! either an inline record number (count 1) or a reference into the
//! per-file segment-blob table. Every membership change re-normalizes the
//! encoding; the cached count always matches the decoded cardinality, so
//! cardinality checks never decode a blob.

use serde::{Deserialize, Serialize};

use crate::config::SegmentConfig;
use crate::error::{Result, SegstoreError};
use crate::segment::{
    join_record, split_record, RecordNumber, RecordSet, SegmentNumber, SegmentSet,
};
use crate::store::{RowStore, TableId};

use super::keys::{index_key, split_index_key, value_prefix};
use super::Database;

/// Stored payload of one secondary index row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct IndexRow {
    pub(crate) count: u32,
    pub(crate) reference: RowReference,
}

/// Inline record number for singleton rows, blob id otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum RowReference {
    Record(RecordNumber),
    Blob(u64),
}

impl IndexRow {
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Materialize the member set, reading the blob table only when the
    /// row is not a singleton.
    pub(crate) fn to_set<S: RowStore>(
        &self,
        store: &S,
        blobs: &TableId,
        segment: SegmentNumber,
        config: &SegmentConfig,
    ) -> Result<SegmentSet> {
        match self.reference {
            RowReference::Record(record) => {
                let (record_segment, slot) = split_record(record, config);
                if self.count != 1 || record_segment != segment {
                    return Err(SegstoreError::Corruption(format!(
                        "inline index row for {} references record {}",
                        segment, record
                    )));
                }
                Ok(SegmentSet::Int(slot))
            }
            RowReference::Blob(id) => {
                let bytes = store.get(blobs, &id.to_be_bytes())?.ok_or_else(|| {
                    SegstoreError::missing_row(&blobs.to_string(), format!("blob {}", id))
                })?;
                SegmentSet::decode(&bytes, self.count, config)
            }
        }
    }
}

impl<S: RowStore> Database<S> {
    /// Add `record` to the index entry for `key`. Adding a member that is
    /// already present is a no-op.
    pub fn index_add(
        &mut self,
        file: &str,
        field: &str,
        key: &[u8],
        record: RecordNumber,
    ) -> Result<()> {
        let (index, blobs) = self.index_tables(file, field)?;
        let config = self.config;
        let (segment, slot) = split_record(record, &config);
        let row_key = index_key(key, segment);

        let existing = match self.store.get(&index, &row_key)? {
            Some(bytes) => Some(IndexRow::decode(&bytes)?),
            None => None,
        };
        let Some(row) = existing else {
            let row = IndexRow {
                count: 1,
                reference: RowReference::Record(record),
            };
            return self.store.put(&index, &row_key, &row.encode()?);
        };

        let mut set = row.to_set(&self.store, &blobs, segment, &config)?;
        if !set.insert(slot, &config) {
            return Ok(());
        }
        self.write_index_row(&index, &blobs, &row_key, segment, &set, Some(&row))
    }

    /// Remove `record` from the index entry for `key`. A count of 1
    /// deflates storage to an inline record number; a count of 0 deletes
    /// the row. Removing an absent member is a no-op.
    pub fn index_remove(
        &mut self,
        file: &str,
        field: &str,
        key: &[u8],
        record: RecordNumber,
    ) -> Result<()> {
        let (index, blobs) = self.index_tables(file, field)?;
        let config = self.config;
        let (segment, slot) = split_record(record, &config);
        let row_key = index_key(key, segment);

        let Some(bytes) = self.store.get(&index, &row_key)? else {
            return Ok(());
        };
        let row = IndexRow::decode(&bytes)?;
        let mut set = row.to_set(&self.store, &blobs, segment, &config)?;
        if !set.remove(slot, &config) {
            return Ok(());
        }
        self.write_index_row(&index, &blobs, &row_key, segment, &set, Some(&row))
    }

    /// Delete every index row for `key`, releasing blob storage.
    pub fn index_clear(&mut self, file: &str, field: &str, key: &[u8]) -> Result<()> {
        let (index, blobs) = self.index_tables(file, field)?;
        for (row_key, row) in self.rows_for_value(&index, key)? {
            if let RowReference::Blob(id) = row.reference {
                self.store.delete(&blobs, &id.to_be_bytes())?;
            }
            self.store.delete(&index, &row_key)?;
        }
        Ok(())
    }

    /// Replace every index row for `key` with the given record set,
    /// segment by segment.
    pub fn index_replace_all(
        &mut self,
        file: &str,
        field: &str,
        key: &[u8],
        records: &RecordSet,
    ) -> Result<()> {
        self.index_clear(file, field, key)?;
        let (index, blobs) = self.index_tables(file, field)?;
        let segments: Vec<(SegmentNumber, SegmentSet)> = records
            .segments()
            .map(|(segment, set)| (segment, set.clone()))
            .collect();
        for (segment, mut set) in segments {
            set.normalize(&self.config);
            let row_key = index_key(key, segment);
            self.write_index_row(&index, &blobs, &row_key, segment, &set, None)?;
        }
        Ok(())
    }

    /// All record numbers indexed under `key`.
    pub fn index_lookup(&self, file: &str, field: &str, key: &[u8]) -> Result<RecordSet> {
        let (index, blobs) = self.index_tables(file, field)?;
        let mut result = RecordSet::new();
        for (row_key, row) in self.rows_for_value(&index, key)? {
            let (_, segment) = split_index_key(&row_key)?;
            let set = row.to_set(&self.store, &blobs, segment, &self.config)?;
            result.place(segment, set);
        }
        Ok(result)
    }

    /// Point lookup against a unique index: at most one record may be
    /// indexed under `key`.
    pub fn index_lookup_unique(
        &self,
        file: &str,
        field: &str,
        key: &[u8],
    ) -> Result<Option<RecordNumber>> {
        let (index, _) = self.index_tables(file, field)?;
        let rows = self.rows_for_value(&index, key)?;
        if rows.len() > 1 {
            return Err(SegstoreError::UniquenessViolation {
                field: field.to_string(),
            });
        }
        let Some((_, row)) = rows.into_iter().next() else {
            return Ok(None);
        };
        match (row.count, row.reference) {
            (1, RowReference::Record(record)) => Ok(Some(record)),
            _ => Err(SegstoreError::UniquenessViolation {
                field: field.to_string(),
            }),
        }
    }

    /// Number of records indexed under `key`, using cached counts only.
    pub fn index_count(&self, file: &str, field: &str, key: &[u8]) -> Result<u64> {
        let (index, _) = self.index_tables(file, field)?;
        Ok(self
            .rows_for_value(&index, key)?
            .iter()
            .map(|(_, row)| u64::from(row.count))
            .sum())
    }

    pub(crate) fn index_tables(&self, file: &str, field: &str) -> Result<(TableId, TableId)> {
        let handle = self.file(file)?;
        Ok((
            handle.index_table(file, field)?.clone(),
            handle.blobs.clone(),
        ))
    }

    fn rows_for_value(&self, index: &TableId, key: &[u8]) -> Result<Vec<(Vec<u8>, IndexRow)>> {
        let prefix = value_prefix(key);
        let mut rows = Vec::new();
        let mut cursor = self.store.cursor(index)?;
        let mut row = cursor.seek(&prefix)?;
        while let Some((row_key, bytes)) = row {
            if !row_key.starts_with(&prefix) {
                break;
            }
            rows.push((row_key, IndexRow::decode(&bytes)?));
            row = cursor.next()?;
        }
        Ok(rows)
    }

    /// Persist one (value, segment) member set, managing the blob row.
    pub(crate) fn write_index_row(
        &mut self,
        index: &TableId,
        blobs: &TableId,
        row_key: &[u8],
        segment: SegmentNumber,
        set: &SegmentSet,
        previous: Option<&IndexRow>,
    ) -> Result<()> {
        let old_blob = previous.and_then(|row| match row.reference {
            RowReference::Blob(id) => Some(id),
            RowReference::Record(_) => None,
        });
        let count = set.count();

        if count == 0 {
            if let Some(id) = old_blob {
                self.store.delete(blobs, &id.to_be_bytes())?;
            }
            self.store.delete(index, row_key)?;
            return Ok(());
        }

        if count == 1 {
            let slot = set.first_slot().unwrap_or(0);
            if let Some(id) = old_blob {
                self.store.delete(blobs, &id.to_be_bytes())?;
            }
            let row = IndexRow {
                count: 1,
                reference: RowReference::Record(join_record(segment, slot, &self.config)),
            };
            return self.store.put(index, row_key, &row.encode()?);
        }

        let bytes = set.encode();
        let id = match old_blob {
            Some(id) => id,
            None => self.next_blob_id(blobs)?,
        };
        self.store.put(blobs, &id.to_be_bytes(), &bytes)?;
        let row = IndexRow {
            count,
            reference: RowReference::Blob(id),
        };
        self.store.put(index, row_key, &row.encode()?)
    }

    fn next_blob_id(&self, blobs: &TableId) -> Result<u64> {
        let mut cursor = self.store.cursor(blobs)?;
        let last = cursor.last()?;
        Ok(match last {
            Some((key, _)) => {
                let bytes: [u8; 8] = key.as_slice().try_into().map_err(|_| {
                    SegstoreError::Corruption("malformed blob table key".into())
                })?;
                u64::from_be_bytes(bytes) + 1
            }
            None => 0,
        })
    }
}
