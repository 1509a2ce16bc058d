//! Per-file existence bitmap and record-number reuse
//!
//! One bitmap row per 1-based segment number tracks which record numbers
//! currently hold a primary row. Rows are created lazily and never deleted.
//! Reserved key 0 of the same table holds the freed-segment registry: the
//! sorted set of segment numbers known to contain at least one reusable
//! slot. The segment containing the current high record never supplies
//! reusable numbers.

use crate::config::SegmentConfig;
use crate::error::{Result, SegstoreError};
use crate::store::{RowStore, TableId};

use super::set::{bitmap_get, bitmap_set, bitmap_slots};
use super::types::{join_record, split_record, RecordNumber, SegmentNumber};

const REGISTRY_KEY: [u8; 4] = [0, 0, 0, 0];

fn segment_key(segment: SegmentNumber) -> [u8; 4] {
    // Bitmap rows are keyed by 1-based segment number; key 0 is reserved
    // for the freed-segment registry.
    (segment.0 + 1).to_be_bytes()
}

fn segment_from_key(key: &[u8]) -> Option<SegmentNumber> {
    let raw = u32::from_be_bytes(key.try_into().ok()?);
    if raw == 0 {
        return None;
    }
    Some(SegmentNumber(raw - 1))
}

/// Segmented occupancy bitmap for one file.
#[derive(Debug)]
pub struct ExistenceBitmap {
    table: TableId,
    config: SegmentConfig,
    freed: Vec<SegmentNumber>,
}

impl ExistenceBitmap {
    /// Open (creating if absent) the bitmap table and load the registry.
    pub fn open<S: RowStore>(store: &mut S, table: TableId, config: SegmentConfig) -> Result<Self> {
        store.create_table(&table)?;
        let mut ebm = Self {
            table,
            config,
            freed: Vec::new(),
        };
        ebm.reload_registry(store)?;
        Ok(ebm)
    }

    /// Re-read the freed-segment registry from its row, discarding the
    /// cached copy. Required after a transaction rollback, which rewinds
    /// the registry row underneath the cache.
    pub fn reload_registry<S: RowStore>(&mut self, store: &S) -> Result<()> {
        self.freed = match store.get(&self.table, &REGISTRY_KEY)? {
            Some(bytes) => {
                let raw: Vec<u32> = bincode::deserialize(&bytes)?;
                raw.into_iter().map(SegmentNumber).collect()
            }
            None => Vec::new(),
        };
        Ok(())
    }

    pub fn table(&self) -> &TableId {
        &self.table
    }

    /// Raw bitmap bytes for one segment, if the row exists.
    pub fn read_segment<S: RowStore>(
        &self,
        store: &S,
        segment: SegmentNumber,
    ) -> Result<Option<Vec<u8>>> {
        store.get(&self.table, &segment_key(segment))
    }

    fn expect_segment<S: RowStore>(&self, store: &S, segment: SegmentNumber) -> Result<Vec<u8>> {
        self.read_segment(store, segment)?
            .ok_or_else(|| SegstoreError::missing_row(&self.table.to_string(), segment))
    }

    /// Set the bit for `record`, lazily materializing the covering segment.
    pub fn allocate<S: RowStore>(&mut self, store: &mut S, record: RecordNumber) -> Result<()> {
        let (segment, slot) = split_record(record, &self.config);
        let mut bytes = self
            .read_segment(store, segment)?
            .unwrap_or_else(|| vec![0u8; self.config.bytes()]);
        bitmap_set(&mut bytes, slot, true);
        store.put(&self.table, &segment_key(segment), &bytes)
    }

    /// Clear the bit for `record`. The covering segment must exist.
    pub fn release<S: RowStore>(
        &mut self,
        store: &mut S,
        record: RecordNumber,
    ) -> Result<(SegmentNumber, u16)> {
        let (segment, slot) = split_record(record, &self.config);
        let mut bytes = self.expect_segment(store, segment)?;
        bitmap_set(&mut bytes, slot, false);
        store.put(&self.table, &segment_key(segment), &bytes)?;
        Ok((segment, slot))
    }

    pub fn is_allocated<S: RowStore>(&self, store: &S, record: RecordNumber) -> Result<bool> {
        let (segment, slot) = split_record(record, &self.config);
        Ok(self
            .read_segment(store, segment)?
            .is_some_and(|bytes| bitmap_get(&bytes, slot)))
    }

    /// Count of occupied record numbers in one segment.
    pub fn segment_count<S: RowStore>(&self, store: &S, segment: SegmentNumber) -> Result<u32> {
        Ok(self
            .read_segment(store, segment)?
            .map(|bytes| bytes.iter().map(|b| b.count_ones()).sum())
            .unwrap_or(0))
    }

    /// Highest currently occupied record number, if any.
    pub fn high_record<S: RowStore>(&self, store: &S) -> Result<Option<RecordNumber>> {
        let mut cursor = store.cursor(&self.table)?;
        let mut row = cursor.last()?;
        while let Some((key, bytes)) = row {
            if let Some(segment) = segment_from_key(&key) {
                if let Some(slot) = bitmap_slots(&bytes).last() {
                    return Ok(Some(join_record(segment, slot, &self.config)));
                }
            } else {
                // Hit the registry row at key 0; nothing above it was occupied.
                return Ok(None);
            }
            row = cursor.prev()?;
        }
        Ok(None)
    }

    /// Record `segment` as holding reusable slots, keeping the registry
    /// sorted and free of duplicates. Segments above the one containing
    /// `high_record` are not registered.
    pub fn note_freed_segment<S: RowStore>(
        &mut self,
        store: &mut S,
        segment: SegmentNumber,
        high_record: RecordNumber,
    ) -> Result<()> {
        let (high_segment, _) = split_record(high_record, &self.config);
        if segment > high_segment {
            return Ok(());
        }
        if let Err(pos) = self.freed.binary_search(&segment) {
            self.freed.insert(pos, segment);
            self.persist_registry(store)?;
        }
        Ok(())
    }

    /// Lowest reusable record number strictly below the top segment.
    ///
    /// Returns `None` when the registry is empty or every free slot lies in
    /// the segment containing the current high record. Exhausted registry
    /// entries are dropped as they are discovered.
    pub fn lowest_freed_number<S: RowStore>(
        &mut self,
        store: &mut S,
    ) -> Result<Option<RecordNumber>> {
        if self.freed.is_empty() {
            return Ok(None);
        }
        let Some(high) = self.high_record(store)? else {
            return Ok(None);
        };
        let (top_segment, _) = split_record(high, &self.config);

        let mut exhausted = Vec::new();
        let mut found = None;
        for &segment in &self.freed {
            if segment >= top_segment {
                break;
            }
            let bytes = self.expect_segment(store, segment)?;
            match first_clear_slot(&bytes, self.config.slots()) {
                Some(slot) => {
                    found = Some(join_record(segment, slot, &self.config));
                    break;
                }
                None => exhausted.push(segment),
            }
        }
        if !exhausted.is_empty() {
            self.freed.retain(|s| !exhausted.contains(s));
            self.persist_registry(store)?;
        }
        Ok(found)
    }

    /// Drop a registry entry once its segment has no free slots left.
    pub fn forget_freed_segment<S: RowStore>(
        &mut self,
        store: &mut S,
        segment: SegmentNumber,
    ) -> Result<()> {
        if let Ok(pos) = self.freed.binary_search(&segment) {
            self.freed.remove(pos);
            self.persist_registry(store)?;
        }
        Ok(())
    }

    pub fn freed_segments(&self) -> &[SegmentNumber] {
        &self.freed
    }

    fn persist_registry<S: RowStore>(&self, store: &mut S) -> Result<()> {
        let raw: Vec<u32> = self.freed.iter().map(|s| s.0).collect();
        store.put(&self.table, &REGISTRY_KEY, &bincode::serialize(&raw)?)
    }
}

fn first_clear_slot(bytes: &[u8], slots: u32) -> Option<u16> {
    for slot in 0..slots {
        if !bitmap_get(bytes, slot as u16) {
            return Some(slot as u16);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn open_bitmap() -> (MemoryStore, ExistenceBitmap) {
        let mut store = MemoryStore::new();
        let config = SegmentConfig::new(128).unwrap();
        let ebm =
            ExistenceBitmap::open(&mut store, TableId::named("games__ebm"), config).unwrap();
        (store, ebm)
    }

    #[test]
    fn test_allocate_release() {
        let (mut store, mut ebm) = open_bitmap();

        ebm.allocate(&mut store, 5).unwrap();
        ebm.allocate(&mut store, 300).unwrap();
        assert!(ebm.is_allocated(&store, 5).unwrap());
        assert!(ebm.is_allocated(&store, 300).unwrap());
        assert!(!ebm.is_allocated(&store, 6).unwrap());
        assert_eq!(ebm.high_record(&store).unwrap(), Some(300));

        let (segment, slot) = ebm.release(&mut store, 300).unwrap();
        assert_eq!((segment, slot), (SegmentNumber(2), 44));
        assert!(!ebm.is_allocated(&store, 300).unwrap());
        assert_eq!(ebm.high_record(&store).unwrap(), Some(5));
    }

    #[test]
    fn test_release_missing_segment_is_corruption() {
        let (mut store, mut ebm) = open_bitmap();
        assert!(matches!(
            ebm.release(&mut store, 500),
            Err(SegstoreError::Corruption(_))
        ));
    }

    #[test]
    fn test_reuse_skips_top_segment() {
        let (mut store, mut ebm) = open_bitmap();

        // Fill segments 0..2 and one record of segment 2.
        for record in 0..270u64 {
            ebm.allocate(&mut store, record).unwrap();
        }
        let high = ebm.high_record(&store).unwrap().unwrap();
        assert_eq!(high, 269);

        // Free one slot in segment 1 and one in the top segment (2).
        ebm.release(&mut store, 130).unwrap();
        ebm.note_freed_segment(&mut store, SegmentNumber(1), high).unwrap();
        ebm.release(&mut store, 260).unwrap();
        ebm.note_freed_segment(&mut store, SegmentNumber(2), high).unwrap();

        // Only the non-top freed slot is reusable.
        assert_eq!(ebm.lowest_freed_number(&mut store).unwrap(), Some(130));

        // Re-allocate it; segment 1 becomes full again and drops out.
        ebm.allocate(&mut store, 130).unwrap();
        assert_eq!(ebm.lowest_freed_number(&mut store).unwrap(), None);
        assert_eq!(ebm.freed_segments(), &[SegmentNumber(2)]);
    }

    #[test]
    fn test_reload_registry_discards_cache() {
        let (mut store, mut ebm) = open_bitmap();

        for record in 0..300u64 {
            ebm.allocate(&mut store, record).unwrap();
        }
        let high = ebm.high_record(&store).unwrap().unwrap();

        // Register segment 1, then rewind the store to before the
        // registration; the cache must follow the row.
        store.begin().unwrap();
        ebm.release(&mut store, 130).unwrap();
        ebm.note_freed_segment(&mut store, SegmentNumber(1), high).unwrap();
        assert_eq!(ebm.freed_segments(), &[SegmentNumber(1)]);
        store.rollback().unwrap();

        ebm.reload_registry(&store).unwrap();
        assert!(ebm.freed_segments().is_empty());
        assert_eq!(ebm.lowest_freed_number(&mut store).unwrap(), None);
    }

    #[test]
    fn test_registry_sorted_no_duplicates() {
        let (mut store, mut ebm) = open_bitmap();

        for record in 0..400u64 {
            ebm.allocate(&mut store, record).unwrap();
        }
        let high = ebm.high_record(&store).unwrap().unwrap();

        ebm.note_freed_segment(&mut store, SegmentNumber(2), high).unwrap();
        ebm.note_freed_segment(&mut store, SegmentNumber(0), high).unwrap();
        ebm.note_freed_segment(&mut store, SegmentNumber(2), high).unwrap();
        // Above the high segment: ignored.
        ebm.note_freed_segment(&mut store, SegmentNumber(9), high).unwrap();

        assert_eq!(
            ebm.freed_segments(),
            &[SegmentNumber(0), SegmentNumber(2)]
        );

        // Registry survives reopen.
        let config = SegmentConfig::new(128).unwrap();
        let reopened =
            ExistenceBitmap::open(&mut store, TableId::named("games__ebm"), config).unwrap();
        assert_eq!(
            reopened.freed_segments(),
            &[SegmentNumber(0), SegmentNumber(2)]
        );
    }
}
