//! Bulk index construction via sorted generations and n-way merge
//!
//! During a deferred run index entries accumulate in memory for the
//! current segment only. When the segment rolls over the accumulated
//! (value, member set) pairs are written as one sorted generation in a
//! temporary table. `finalize` repeatedly merges up to `sort_scale`
//! generations per round; the last round folds the union into the
//! permanent index through the ordinary row writer, so blob lifecycle
//! and inline-singleton rules hold for bulk-built rows too.
//!
//! The live generation handles for each field are mirrored into a row of
//! the file's control table after every spill and merge round. A writer
//! opened after a failure picks those generations up and the merge
//! resumes from whatever temporary tables survived; only the in-memory
//! accumulation of the segment being filled at the time is lost.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SegstoreError};
use crate::segment::{split_record, RecordNumber, SegmentNumber, SegmentSet};
use crate::store::{RowStore, TableId};

use super::index::IndexRow;
use super::keys::{index_key, split_index_key};
use super::Database;

/// One row of a generation table. The member set is stored in its wire
/// encoding next to the cardinality that disambiguates it.
#[derive(Serialize, Deserialize)]
struct GenerationRow {
    count: u32,
    bytes: Vec<u8>,
}

/// Control-table key prefix for per-field generation handle lists.
const GENERATIONS_PREFIX: &[u8] = b"deferred__";

fn generations_key(field: &str) -> Vec<u8> {
    [GENERATIONS_PREFIX, field.as_bytes()].concat()
}

struct FieldAccumulator {
    current_segment: Option<SegmentNumber>,
    pending: BTreeMap<Vec<u8>, SegmentSet>,
    generations: Vec<TableId>,
}

impl FieldAccumulator {
    fn new() -> Self {
        Self::resumed(Vec::new())
    }

    fn resumed(generations: Vec<TableId>) -> Self {
        Self {
            current_segment: None,
            pending: BTreeMap::new(),
            generations,
        }
    }
}

/// Accumulates index entries for one file and merges them into the
/// permanent index tables on `finalize`.
pub struct DeferredWriter<'a, S: RowStore> {
    db: &'a mut Database<S>,
    file: String,
    control: TableId,
    fields: HashMap<String, FieldAccumulator>,
}

impl<S: RowStore> Database<S> {
    /// Start a deferred index run for `file`, adopting any generation
    /// tables a previous run left behind.
    pub fn deferred_writer(&mut self, file: &str) -> Result<DeferredWriter<'_, S>> {
        let control = self.file(file)?.control.clone();
        let mut fields = HashMap::new();
        {
            let mut cursor = self.store.cursor(&control)?;
            let mut row = cursor.seek(GENERATIONS_PREFIX)?;
            while let Some((key, bytes)) = row {
                let Some(raw) = key.strip_prefix(GENERATIONS_PREFIX) else {
                    break;
                };
                let field = String::from_utf8(raw.to_vec()).map_err(|_| {
                    SegstoreError::Corruption("non-utf8 field in generation registry".into())
                })?;
                let generations: Vec<TableId> = bincode::deserialize(&bytes)?;
                fields.insert(field, FieldAccumulator::resumed(generations));
                row = cursor.next()?;
            }
        }
        Ok(DeferredWriter {
            file: file.to_string(),
            control,
            fields,
            db: self,
        })
    }
}

impl<'a, S: RowStore> DeferredWriter<'a, S> {
    /// Note one (value, record) index entry. Entries for a new segment
    /// spill the previous segment's accumulation to a generation table.
    pub fn index(&mut self, field: &str, key: &[u8], record: RecordNumber) -> Result<()> {
        self.db.file(&self.file)?.index_table(&self.file, field)?;
        let (segment, slot) = split_record(record, &self.db.config);

        let spill = {
            let acc = self
                .fields
                .entry(field.to_string())
                .or_insert_with(FieldAccumulator::new);
            matches!(acc.current_segment, Some(current) if current != segment)
        };
        if spill {
            self.spill(field)?;
        }

        let config = self.db.config;
        let acc = self
            .fields
            .get_mut(field)
            .ok_or_else(|| SegstoreError::Store("accumulator vanished".into()))?;
        acc.current_segment = Some(segment);
        acc.pending
            .entry(key.to_vec())
            .or_insert_with(SegmentSet::empty)
            .insert(slot, &config);
        Ok(())
    }

    /// Spill pending entries for all fields and merge every generation
    /// into the permanent index tables.
    pub fn finalize(mut self) -> Result<()> {
        let fields: Vec<String> = self.fields.keys().cloned().collect();
        for field in fields {
            self.spill(&field)?;
            self.merge(&field)?;
        }
        Ok(())
    }

    fn spill(&mut self, field: &str) -> Result<()> {
        let Some(acc) = self.fields.get_mut(field) else {
            return Ok(());
        };
        let Some(segment) = acc.current_segment.take() else {
            return Ok(());
        };
        let pending = std::mem::take(&mut acc.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let table = self.db.store.create_temp_table()?;
        for (value, mut set) in pending {
            set.normalize(&self.db.config);
            let row = GenerationRow {
                count: set.count(),
                bytes: set.encode(),
            };
            self.db
                .store
                .put(&table, &index_key(&value, segment), &bincode::serialize(&row)?)?;
        }
        debug!(field, %segment, "spilled index generation");

        let acc = self
            .fields
            .get_mut(field)
            .ok_or_else(|| SegstoreError::Store("accumulator vanished".into()))?;
        acc.generations.push(table);
        self.persist_generations(field)
    }

    fn merge(&mut self, field: &str) -> Result<()> {
        let sort_scale = self.db.deferred.sort_scale.max(2);
        loop {
            let mut generations = match self.fields.get_mut(field) {
                Some(acc) if !acc.generations.is_empty() => {
                    std::mem::take(&mut acc.generations)
                }
                _ => return Ok(()),
            };

            let batch: Vec<TableId> =
                generations.drain(..generations.len().min(sort_scale)).collect();
            let merged = self.union_generations(&batch)?;

            if generations.is_empty() {
                debug!(field, rows = merged.len(), "merging final generation batch");
                self.apply_to_index(field, merged)?;
            } else {
                // More batches remain: park the union as a fresh generation.
                let table = self.db.store.create_temp_table()?;
                for (row_key, set) in merged {
                    let row = GenerationRow {
                        count: set.count(),
                        bytes: set.encode(),
                    };
                    self.db.store.put(&table, &row_key, &bincode::serialize(&row)?)?;
                }
                generations.push(table);
            }

            // Record the new generation list before dropping the consumed
            // tables: a failure in between leaks temp tables but never
            // leaves the registry pointing at a dropped one.
            let done = generations.is_empty();
            let acc = self
                .fields
                .get_mut(field)
                .ok_or_else(|| SegstoreError::Store("accumulator vanished".into()))?;
            acc.generations = generations;
            self.persist_generations(field)?;
            for table in &batch {
                self.db.store.drop_table(table)?;
            }
            if done {
                return Ok(());
            }
        }
    }

    /// Mirror one field's generation handle list into the control table.
    fn persist_generations(&mut self, field: &str) -> Result<()> {
        let key = generations_key(field);
        let encoded = match self.fields.get(field) {
            Some(acc) if !acc.generations.is_empty() => {
                Some(bincode::serialize(&acc.generations)?)
            }
            _ => None,
        };
        match encoded {
            Some(bytes) => self.db.store.put(&self.control, &key, &bytes),
            None => {
                self.db.store.delete(&self.control, &key)?;
                Ok(())
            }
        }
    }

    /// Union the rows of a batch of generation tables, keyed by their
    /// (value, segment) row key.
    fn union_generations(
        &self,
        batch: &[TableId],
    ) -> Result<BTreeMap<Vec<u8>, SegmentSet>> {
        let config = self.db.config;
        let mut merged: BTreeMap<Vec<u8>, SegmentSet> = BTreeMap::new();
        for table in batch {
            let mut cursor = self.db.store.cursor(table)?;
            let mut row = cursor.first()?;
            while let Some((row_key, bytes)) = row {
                let generation: GenerationRow = bincode::deserialize(&bytes)?;
                let set = SegmentSet::decode(&generation.bytes, generation.count, &config)?;
                match merged.get_mut(&row_key) {
                    Some(existing) => existing.union_with(&set, &config),
                    None => {
                        merged.insert(row_key, set);
                    }
                }
                row = cursor.next()?;
            }
        }
        Ok(merged)
    }

    /// Fold merged rows into the permanent index, unioning with whatever
    /// the index already holds for each (value, segment).
    fn apply_to_index(
        &mut self,
        field: &str,
        merged: BTreeMap<Vec<u8>, SegmentSet>,
    ) -> Result<()> {
        let (index, blobs) = self.db.index_tables(&self.file, field)?;
        let config = self.db.config;
        for (row_key, mut set) in merged {
            let (_, segment) = split_index_key(&row_key)?;
            let previous = match self.db.store.get(&index, &row_key)? {
                Some(bytes) => Some(IndexRow::decode(&bytes)?),
                None => None,
            };
            if let Some(row) = &previous {
                let existing = row.to_set(&self.db.store, &blobs, segment, &config)?;
                set.union_with(&existing, &config);
            }
            set.normalize(&config);
            self.db
                .write_index_row(&index, &blobs, &row_key, segment, &set, previous.as_ref())?;
        }
        Ok(())
    }
}
