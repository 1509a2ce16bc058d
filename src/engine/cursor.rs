//! Ordered and ordinal traversal over primary rows and index entries
//!
//! Primary cursors walk rows in record-number order and resolve ranks
//! through per-segment existence-bitmap counts. Secondary cursors walk
//! (value, segment) rows, materializing one segment at a time and
//! advancing within it before requerying the adjacent row; a count == 1
//! row rebuilds its Int segment from the inline reference without touching
//! the blob table. Routine traversal misses are `None`, never errors.

use crate::config::SegmentConfig;
use crate::error::{Result, SegstoreError};
use crate::segment::{
    join_record, split_record, ExistenceBitmap, RecordNumber, SegmentNumber, SegmentSet,
};
use crate::store::{RowStore, StoreCursor, TableId};

use super::index::IndexRow;
use super::keys::{
    escape_value, index_key, prefix_upper_bound, record_from_key, record_key, split_index_key,
};
use super::Database;

impl<S: RowStore> Database<S> {
    /// Open a cursor over one file's primary rows.
    pub fn primary_cursor(&self, file: &str) -> Result<PrimaryCursor<'_, S>> {
        let handle = self.file(file)?;
        Ok(PrimaryCursor {
            store: &self.store,
            ebm: &handle.ebm,
            config: self.config,
            cursor: self.store.cursor(&handle.primary)?,
            primary: handle.primary.clone(),
        })
    }

    /// Open a cursor over one secondary field's index entries.
    pub fn secondary_cursor(&self, file: &str, field: &str) -> Result<SecondaryCursor<'_, S>> {
        let (index, blobs) = self.index_tables(file, field)?;
        Ok(SecondaryCursor {
            store: &self.store,
            index,
            blobs,
            config: self.config,
            partial: None,
            state: CursorState::Unpositioned,
        })
    }
}

/// Cursor over primary rows in ascending record-number order.
pub struct PrimaryCursor<'a, S: RowStore> {
    store: &'a S,
    ebm: &'a ExistenceBitmap,
    config: SegmentConfig,
    cursor: Box<dyn StoreCursor + 'a>,
    primary: TableId,
}

impl<'a, S: RowStore> PrimaryCursor<'a, S> {
    pub fn first(&mut self) -> Result<Option<(RecordNumber, Vec<u8>)>> {
        decode_primary(self.cursor.first()?)
    }

    pub fn last(&mut self) -> Result<Option<(RecordNumber, Vec<u8>)>> {
        decode_primary(self.cursor.last()?)
    }

    pub fn next(&mut self) -> Result<Option<(RecordNumber, Vec<u8>)>> {
        decode_primary(self.cursor.next()?)
    }

    pub fn prev(&mut self) -> Result<Option<(RecordNumber, Vec<u8>)>> {
        decode_primary(self.cursor.prev()?)
    }

    /// Position at the first row with record number >= `record`.
    pub fn nearest(&mut self, record: RecordNumber) -> Result<Option<(RecordNumber, Vec<u8>)>> {
        decode_primary(self.cursor.seek(&record_key(record))?)
    }

    /// Position at exactly `record`; `None` when it is not occupied.
    pub fn setat(&mut self, record: RecordNumber) -> Result<Option<Vec<u8>>> {
        match self.cursor.seek(&record_key(record))? {
            Some((key, value)) if record_from_key(&key)? == record => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Rank of `record` among occupied record numbers.
    pub fn position_of(&self, record: RecordNumber) -> Result<Option<u64>> {
        let (segment, slot) = split_record(record, &self.config);
        let Some(bytes) = self.ebm.read_segment(self.store, segment)? else {
            return Ok(None);
        };
        let set = SegmentSet::Bitmap(bytes);
        let Some(rank_in_segment) = set.position_of(slot) else {
            return Ok(None);
        };
        let mut rank = u64::from(rank_in_segment);
        for earlier in 0..segment.0 {
            rank += u64::from(self.ebm.segment_count(self.store, SegmentNumber(earlier))?);
        }
        Ok(Some(rank))
    }

    /// Row at rank `position`; negative positions count from the end.
    pub fn at_position(&mut self, position: i64) -> Result<Option<(RecordNumber, Vec<u8>)>> {
        let total = self.count_records()?;
        let Some(rank) = resolve_rank(position, total) else {
            return Ok(None);
        };

        let Some(high) = self.ebm.high_record(self.store)? else {
            return Ok(None);
        };
        let (top, _) = split_record(high, &self.config);
        let mut remaining = rank;
        let mut found = None;
        // Bitmap rows are materialized lazily, so a gap in the segment
        // sequence is an empty segment, not corruption.
        for number in 0..=top.0 {
            let segment = SegmentNumber(number);
            let Some(bytes) = self.ebm.read_segment(self.store, segment)? else {
                continue;
            };
            let set = SegmentSet::Bitmap(bytes);
            let in_segment = u64::from(set.count());
            if remaining < in_segment {
                let slot = set
                    .at_position(remaining as u32)
                    .ok_or_else(|| SegstoreError::Corruption("bitmap rank drifted".into()))?;
                found = Some(join_record(segment, slot, &self.config));
                break;
            }
            remaining -= in_segment;
        }
        let Some(record) = found else {
            return Ok(None);
        };

        match self.cursor.seek(&record_key(record))? {
            Some((key, value)) if record_from_key(&key)? == record => Ok(Some((record, value))),
            _ => Err(SegstoreError::missing_row(&self.primary.to_string(), record)),
        }
    }

    /// Total occupied records.
    pub fn count_records(&self) -> Result<u64> {
        let Some(high) = self.ebm.high_record(self.store)? else {
            return Ok(0);
        };
        let (top, _) = split_record(high, &self.config);
        let mut total = 0u64;
        for segment in 0..=top.0 {
            total += u64::from(self.ebm.segment_count(self.store, SegmentNumber(segment))?);
        }
        Ok(total)
    }
}

fn decode_primary(row: Option<(Vec<u8>, Vec<u8>)>) -> Result<Option<(RecordNumber, Vec<u8>)>> {
    match row {
        Some((key, value)) => Ok(Some((record_from_key(&key)?, value))),
        None => Ok(None),
    }
}

fn resolve_rank(position: i64, total: u64) -> Option<u64> {
    if position >= 0 {
        let rank = position as u64;
        (rank < total).then_some(rank)
    } else {
        let back = position.unsigned_abs();
        (back <= total).then(|| total - back)
    }
}

enum CursorState {
    Unpositioned,
    Positioned {
        row_key: Vec<u8>,
        value: Vec<u8>,
        segment: SegmentNumber,
        set: SegmentSet,
        slot: u16,
    },
}

/// Cursor over one field's (value, segment) index rows with an optional
/// partial-key (value prefix) filter.
pub struct SecondaryCursor<'a, S: RowStore> {
    store: &'a S,
    index: TableId,
    blobs: TableId,
    config: SegmentConfig,
    partial: Option<Vec<u8>>,
    state: CursorState,
}

impl<'a, S: RowStore> SecondaryCursor<'a, S> {
    /// Install or clear the partial-key filter. The cached current segment
    /// is dropped either way.
    pub fn set_partial_key(&mut self, partial: Option<Vec<u8>>) {
        self.partial = partial;
        self.state = CursorState::Unpositioned;
    }

    pub fn partial_key(&self) -> Option<&[u8]> {
        self.partial.as_deref()
    }

    pub fn first(&mut self) -> Result<Option<(Vec<u8>, RecordNumber)>> {
        let start = self.scan_start();
        let row = {
            let mut cursor = self.store.cursor(&self.index)?;
            cursor.seek(&start)?
        };
        self.adopt_row(row, Edge::First)
    }

    pub fn last(&mut self) -> Result<Option<(Vec<u8>, RecordNumber)>> {
        let row = {
            let mut cursor = self.store.cursor(&self.index)?;
            match self.scan_end() {
                Some(bound) => {
                    if cursor.seek(&bound)?.is_some() {
                        cursor.prev()?
                    } else {
                        cursor.last()?
                    }
                }
                None => cursor.last()?,
            }
        };
        self.adopt_row(row, Edge::Last)
    }

    pub fn next(&mut self) -> Result<Option<(Vec<u8>, RecordNumber)>> {
        let (row_key, slot) = match &self.state {
            CursorState::Unpositioned => return self.first(),
            CursorState::Positioned { row_key, set, slot, .. } => {
                if let Some(next_slot) = set.next_after(*slot) {
                    (row_key.clone(), Some(next_slot))
                } else {
                    (row_key.clone(), None)
                }
            }
        };
        if let Some(next_slot) = slot {
            return Ok(Some(self.advance_slot(next_slot)));
        }

        // Current segment exhausted: requery the adjacent row.
        let row = {
            let mut cursor = self.store.cursor(&self.index)?;
            match cursor.seek(&row_key)? {
                Some((key, _)) if key == row_key => cursor.next()?,
                other => other,
            }
        };
        match self.peek_row(row) {
            Some(row) => self.adopt_row(Some(row), Edge::First),
            None => {
                // End of scan drops the cached segment, same as the
                // primary cursor; a further next() starts over.
                self.state = CursorState::Unpositioned;
                Ok(None)
            }
        }
    }

    pub fn prev(&mut self) -> Result<Option<(Vec<u8>, RecordNumber)>> {
        let (row_key, slot) = match &self.state {
            CursorState::Unpositioned => return self.last(),
            CursorState::Positioned { row_key, set, slot, .. } => {
                (row_key.clone(), set.prev_before(*slot))
            }
        };
        if let Some(prev_slot) = slot {
            return Ok(Some(self.advance_slot(prev_slot)));
        }

        let row = {
            let mut cursor = self.store.cursor(&self.index)?;
            if cursor.seek(&row_key)?.is_some() {
                cursor.prev()?
            } else {
                cursor.last()?
            }
        };
        match self.peek_row(row) {
            Some(row) => self.adopt_row(Some(row), Edge::Last),
            None => {
                self.state = CursorState::Unpositioned;
                Ok(None)
            }
        }
    }

    /// Position at the first entry whose value is >= `key` (and passes
    /// the filter).
    pub fn nearest(&mut self, key: &[u8]) -> Result<Option<(Vec<u8>, RecordNumber)>> {
        let target = escape_value(key);
        let start = self.scan_start();
        let seek_key = if target > start { target } else { start };
        let row = {
            let mut cursor = self.store.cursor(&self.index)?;
            cursor.seek(&seek_key)?
        };
        self.adopt_row(row, Edge::First)
    }

    /// Position at exactly (`key`, `record`); `None` when the value fails
    /// the filter or the record is absent from the resolved segment.
    pub fn setat(&mut self, key: &[u8], record: RecordNumber) -> Result<Option<RecordNumber>> {
        if !self.passes_filter(key) {
            return Ok(None);
        }
        let (segment, slot) = split_record(record, &self.config);
        let row_key = index_key(key, segment);
        let Some(bytes) = self.store.get(&self.index, &row_key)? else {
            return Ok(None);
        };
        let row = IndexRow::decode(&bytes)?;
        let set = row.to_set(self.store, &self.blobs, segment, &self.config)?;
        if !set.contains(slot) {
            return Ok(None);
        }
        self.state = CursorState::Positioned {
            row_key,
            value: key.to_vec(),
            segment,
            set,
            slot,
        };
        Ok(Some(record))
    }

    /// Rank of (`key`, `record`) in index order under the active filter.
    pub fn position_of(&self, key: &[u8], record: RecordNumber) -> Result<Option<u64>> {
        if !self.passes_filter(key) {
            return Ok(None);
        }
        let (segment, slot) = split_record(record, &self.config);
        let target = index_key(key, segment);

        let mut rank = 0u64;
        let mut cursor = self.store.cursor(&self.index)?;
        let mut row = cursor.seek(&self.scan_start())?;
        while let Some((row_key, bytes)) = row {
            if !self.key_in_scan(&row_key) {
                return Ok(None);
            }
            let index_row = IndexRow::decode(&bytes)?;
            if row_key == target {
                let set = index_row.to_set(self.store, &self.blobs, segment, &self.config)?;
                return Ok(set.position_of(slot).map(|r| rank + u64::from(r)));
            }
            rank += u64::from(index_row.count);
            row = cursor.next()?;
        }
        Ok(None)
    }

    /// Entry at rank `position` in index order; negative ranks count from
    /// the end. Positions the cursor on success.
    pub fn at_position(&mut self, position: i64) -> Result<Option<(Vec<u8>, RecordNumber)>> {
        let total = self.count_records()?;
        let Some(rank) = resolve_rank(position, total) else {
            return Ok(None);
        };

        let mut remaining = rank;
        let target = {
            let mut cursor = self.store.cursor(&self.index)?;
            let mut row = cursor.seek(&self.scan_start())?;
            loop {
                let Some((row_key, bytes)) = row else {
                    return Ok(None);
                };
                if !self.key_in_scan(&row_key) {
                    return Ok(None);
                }
                let index_row = IndexRow::decode(&bytes)?;
                if remaining < u64::from(index_row.count) {
                    break (row_key, index_row);
                }
                remaining -= u64::from(index_row.count);
                row = cursor.next()?;
            }
        };

        let (row_key, index_row) = target;
        let (value, segment) = split_index_key(&row_key)?;
        let set = index_row.to_set(self.store, &self.blobs, segment, &self.config)?;
        let slot = set
            .at_position(remaining as u32)
            .ok_or_else(|| SegstoreError::Corruption("index row count drifted".into()))?;
        let record = join_record(segment, slot, &self.config);
        self.state = CursorState::Positioned {
            row_key,
            value: value.clone(),
            segment,
            set,
            slot,
        };
        Ok(Some((value, record)))
    }

    /// Total entries under the active filter, from cached counts only.
    pub fn count_records(&self) -> Result<u64> {
        let mut total = 0u64;
        let mut cursor = self.store.cursor(&self.index)?;
        let mut row = cursor.seek(&self.scan_start())?;
        while let Some((row_key, bytes)) = row {
            if !self.key_in_scan(&row_key) {
                break;
            }
            total += u64::from(IndexRow::decode(&bytes)?.count);
            row = cursor.next()?;
        }
        Ok(total)
    }

    fn advance_slot(&mut self, new_slot: u16) -> (Vec<u8>, RecordNumber) {
        let CursorState::Positioned { value, segment, slot, .. } = &mut self.state else {
            unreachable!("advance_slot requires a positioned cursor");
        };
        *slot = new_slot;
        let record = join_record(*segment, new_slot, &self.config);
        (value.clone(), record)
    }

    /// Check a candidate row against the filter without adopting it.
    fn peek_row(&self, row: Option<(Vec<u8>, Vec<u8>)>) -> Option<(Vec<u8>, Vec<u8>)> {
        match row {
            Some((key, bytes)) if self.key_in_scan(&key) => Some((key, bytes)),
            _ => None,
        }
    }

    fn adopt_row(
        &mut self,
        row: Option<(Vec<u8>, Vec<u8>)>,
        edge: Edge,
    ) -> Result<Option<(Vec<u8>, RecordNumber)>> {
        let Some((row_key, bytes)) = row else {
            self.state = CursorState::Unpositioned;
            return Ok(None);
        };
        if !self.key_in_scan(&row_key) {
            self.state = CursorState::Unpositioned;
            return Ok(None);
        }
        let (value, segment) = split_index_key(&row_key)?;
        let index_row = IndexRow::decode(&bytes)?;
        let set = index_row.to_set(self.store, &self.blobs, segment, &self.config)?;
        let slot = match edge {
            Edge::First => set.first_slot(),
            Edge::Last => set.last_slot(),
        }
        .ok_or_else(|| SegstoreError::Corruption("empty index row".into()))?;
        let record = join_record(segment, slot, &self.config);
        self.state = CursorState::Positioned {
            row_key,
            value: value.clone(),
            segment,
            set,
            slot,
        };
        Ok(Some((value, record)))
    }

    fn passes_filter(&self, value: &[u8]) -> bool {
        match &self.partial {
            Some(partial) => value.starts_with(partial),
            None => true,
        }
    }

    fn key_in_scan(&self, row_key: &[u8]) -> bool {
        match &self.partial {
            Some(partial) => row_key.starts_with(&escape_value(partial)),
            None => true,
        }
    }

    fn scan_start(&self) -> Vec<u8> {
        match &self.partial {
            Some(partial) => escape_value(partial),
            None => Vec::new(),
        }
    }

    fn scan_end(&self) -> Option<Vec<u8>> {
        match &self.partial {
            Some(partial) => prefix_upper_bound(&escape_value(partial)),
            None => None,
        }
    }
}

enum Edge {
    First,
    Last,
}
