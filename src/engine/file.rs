//! Primary row CRUD and record-number allocation
//!
//! Record numbers come from the freed-slot registry when a non-top segment
//! has reusable slots, and from the high-water mark otherwise. Deleting a
//! row clears its existence bit and registers its segment as reusable.

use crate::error::{Result, SegstoreError};
use crate::segment::{split_record, RecordNumber, SegmentNumber};
use crate::store::RowStore;

use super::keys::record_key;
use super::Database;

impl<S: RowStore> Database<S> {
    /// Insert a new primary row, allocating the record number.
    ///
    /// The lowest reusable freed number is taken first; otherwise the
    /// high-water mark advances.
    pub fn insert(&mut self, file: &str, value: &[u8]) -> Result<RecordNumber> {
        let record = self.next_record_number(file)?;
        self.insert_at(file, record, value)?;
        Ok(record)
    }

    /// Insert a primary row at an explicit record number (bulk loads).
    pub fn insert_at(&mut self, file: &str, record: RecordNumber, value: &[u8]) -> Result<()> {
        let (store, handle) = self.parts_mut(file)?;
        store.put(&handle.primary, &record_key(record), value)?;
        handle.ebm.allocate(store, record)
    }

    /// Fetch a primary row's value bytes.
    pub fn get(&self, file: &str, record: RecordNumber) -> Result<Option<Vec<u8>>> {
        let handle = self.file(file)?;
        self.store.get(&handle.primary, &record_key(record))
    }

    /// Overwrite an existing primary row's value bytes.
    pub fn replace(&mut self, file: &str, record: RecordNumber, value: &[u8]) -> Result<()> {
        let (store, handle) = self.parts_mut(file)?;
        if store.get(&handle.primary, &record_key(record))?.is_none() {
            return Err(SegstoreError::missing_row(
                &handle.primary.to_string(),
                record,
            ));
        }
        store.put(&handle.primary, &record_key(record), value)
    }

    /// Delete a primary row, clearing its existence bit and registering
    /// the freed segment for reuse.
    pub fn delete(&mut self, file: &str, record: RecordNumber) -> Result<()> {
        let (store, handle) = self.parts_mut(file)?;
        if !store.delete(&handle.primary, &record_key(record))? {
            return Err(SegstoreError::missing_row(
                &handle.primary.to_string(),
                record,
            ));
        }
        let (segment, _) = handle.ebm.release(store, record)?;
        if let Some(high) = handle.ebm.high_record(store)? {
            handle.ebm.note_freed_segment(store, segment, high)?;
        }
        Ok(())
    }

    /// Number of occupied records in one file.
    pub fn record_count(&self, file: &str) -> Result<u64> {
        let handle = self.file(file)?;
        let Some(high) = handle.ebm.high_record(&self.store)? else {
            return Ok(0);
        };
        let (top, _) = split_record(high, &self.config);
        let mut total = 0u64;
        for segment in 0..=top.0 {
            total += u64::from(
                handle
                    .ebm
                    .segment_count(&self.store, SegmentNumber(segment))?,
            );
        }
        Ok(total)
    }

    fn next_record_number(&mut self, file: &str) -> Result<RecordNumber> {
        let (store, handle) = self.parts_mut(file)?;
        if let Some(reused) = handle.ebm.lowest_freed_number(store)? {
            return Ok(reused);
        }
        Ok(match handle.ebm.high_record(store)? {
            Some(high) => high + 1,
            None => 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileDefinition, FileSpec, SegmentConfig};
    use crate::store::MemoryStore;

    fn open_db() -> Database<MemoryStore> {
        let spec = FileSpec::new(vec![FileDefinition::new("games", "game", &["site"])]);
        Database::open(
            MemoryStore::new(),
            &spec,
            SegmentConfig::new(128).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_get_replace_delete() {
        let mut db = open_db();

        let r0 = db.insert("games", b"first").unwrap();
        let r1 = db.insert("games", b"second").unwrap();
        assert_eq!((r0, r1), (0, 1));
        assert_eq!(db.get("games", r0).unwrap(), Some(b"first".to_vec()));

        db.replace("games", r0, b"changed").unwrap();
        assert_eq!(db.get("games", r0).unwrap(), Some(b"changed".to_vec()));

        db.delete("games", r0).unwrap();
        assert_eq!(db.get("games", r0).unwrap(), None);
        assert!(db.replace("games", r0, b"x").is_err());
        assert!(db.delete("games", r0).is_err());
    }

    #[test]
    fn test_record_number_reuse_below_top_segment() {
        let mut db = open_db();

        // Fill segments 0 and 1 plus a little of segment 2.
        for i in 0..260u64 {
            assert_eq!(db.insert("games", &i.to_be_bytes()).unwrap(), i);
        }

        // Free a slot in segment 1 (non-top) and one in segment 2 (top).
        db.delete("games", 140).unwrap();
        db.delete("games", 258).unwrap();

        // The non-top freed number is reused first.
        assert_eq!(db.insert("games", b"reused").unwrap(), 140);
        // The top-segment freed slot is not reusable; the high-water mark
        // advances instead.
        assert_eq!(db.insert("games", b"fresh").unwrap(), 260);
    }

    #[test]
    fn test_delete_high_record_reclaims_number_via_high_water() {
        let mut db = open_db();

        for _ in 0..5 {
            db.insert("games", b"row").unwrap();
        }
        db.delete("games", 4).unwrap();
        // 4 is in the top segment, so it comes back as high + 1.
        assert_eq!(db.insert("games", b"again").unwrap(), 4);
    }

    #[test]
    fn test_record_count() {
        let mut db = open_db();
        for i in 0..300u64 {
            db.insert("games", &i.to_be_bytes()).unwrap();
        }
        assert_eq!(db.record_count("games").unwrap(), 300);
        db.delete("games", 7).unwrap();
        assert_eq!(db.record_count("games").unwrap(), 299);
    }
}
