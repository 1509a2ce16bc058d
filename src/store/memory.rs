//! In-memory ordered row store
//!
//! Reference backend used by the test suites and by embedders that want a
//! self-contained engine. Rollback is snapshot-based, which is fine for the
//! single-writer transaction bracket the engine assumes.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::{Result, SegstoreError};

use super::{Row, RowStore, StoreCursor, TableId};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// BTreeMap-per-table row store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: BTreeMap<TableId, Table>,
    snapshot: Option<BTreeMap<TableId, Table>>,
    next_temp: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live temporary tables.
    pub fn temp_table_count(&self) -> usize {
        self.tables.keys().filter(|t| t.is_temp()).count()
    }

    fn table(&self, table: &TableId) -> Result<&Table> {
        self.tables
            .get(table)
            .ok_or_else(|| SegstoreError::Store(format!("no such table: {}", table)))
    }

    fn table_mut(&mut self, table: &TableId) -> Result<&mut Table> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| SegstoreError::Store(format!("no such table: {}", table)))
    }
}

impl RowStore for MemoryStore {
    fn create_table(&mut self, table: &TableId) -> Result<()> {
        self.tables.entry(table.clone()).or_default();
        Ok(())
    }

    fn create_temp_table(&mut self) -> Result<TableId> {
        let table = TableId::temp(self.next_temp);
        self.next_temp += 1;
        self.tables.insert(table.clone(), Table::new());
        Ok(table)
    }

    fn drop_table(&mut self, table: &TableId) -> Result<()> {
        self.tables.remove(table);
        Ok(())
    }

    fn get(&self, table: &TableId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.table(table)?.get(key).cloned())
    }

    fn put(&mut self, table: &TableId, key: &[u8], value: &[u8]) -> Result<()> {
        self.table_mut(table)?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, table: &TableId, key: &[u8]) -> Result<bool> {
        Ok(self.table_mut(table)?.remove(key).is_some())
    }

    fn cursor<'a>(&'a self, table: &TableId) -> Result<Box<dyn StoreCursor + 'a>> {
        let table = self.table(table)?;
        Ok(Box::new(MemoryCursor {
            table,
            position: None,
        }))
    }

    fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(SegstoreError::Store("transaction already active".into()));
        }
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.snapshot.take().is_none() {
            return Err(SegstoreError::Store("no active transaction".into()));
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        match self.snapshot.take() {
            Some(snapshot) => {
                self.tables = snapshot;
                Ok(())
            }
            None => Err(SegstoreError::Store("no active transaction".into())),
        }
    }
}

struct MemoryCursor<'a> {
    table: &'a Table,
    position: Option<Vec<u8>>,
}

impl MemoryCursor<'_> {
    fn settle(&mut self, row: Option<(&Vec<u8>, &Vec<u8>)>) -> Result<Option<Row>> {
        match row {
            Some((key, value)) => {
                self.position = Some(key.clone());
                Ok(Some((key.clone(), value.clone())))
            }
            None => {
                self.position = None;
                Ok(None)
            }
        }
    }
}

impl StoreCursor for MemoryCursor<'_> {
    fn first(&mut self) -> Result<Option<Row>> {
        let row = self.table.iter().next();
        self.settle(row)
    }

    fn last(&mut self) -> Result<Option<Row>> {
        let row = self.table.iter().next_back();
        self.settle(row)
    }

    fn next(&mut self) -> Result<Option<Row>> {
        match self.position.clone() {
            None => self.first(),
            Some(key) => {
                let row = self
                    .table
                    .range::<Vec<u8>, _>((Bound::Excluded(&key), Bound::Unbounded))
                    .next();
                self.settle(row)
            }
        }
    }

    fn prev(&mut self) -> Result<Option<Row>> {
        match self.position.clone() {
            None => self.last(),
            Some(key) => {
                let row = self
                    .table
                    .range::<Vec<u8>, _>((Bound::Unbounded, Bound::Excluded(&key)))
                    .next_back();
                self.settle(row)
            }
        }
    }

    fn seek(&mut self, key: &[u8]) -> Result<Option<Row>> {
        let row = self
            .table
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next();
        self.settle(row)
    }

    fn current(&self) -> Result<Option<Row>> {
        match &self.position {
            Some(key) => Ok(self
                .table
                .get(key)
                .map(|value| (key.clone(), value.clone()))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_rows(rows: &[(&[u8], &[u8])]) -> (MemoryStore, TableId) {
        let mut store = MemoryStore::new();
        let table = TableId::named("t");
        store.create_table(&table).unwrap();
        for (key, value) in rows {
            store.put(&table, key, value).unwrap();
        }
        (store, table)
    }

    #[test]
    fn test_crud() {
        let (mut store, table) = store_with_rows(&[(b"a", b"1")]);

        assert_eq!(store.get(&table, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(&table, b"b").unwrap(), None);

        assert!(store.delete(&table, b"a").unwrap());
        assert!(!store.delete(&table, b"a").unwrap());
    }

    #[test]
    fn test_cursor_traversal() {
        let (store, table) = store_with_rows(&[(b"a", b"1"), (b"c", b"3"), (b"e", b"5")]);
        let mut cursor = store.cursor(&table).unwrap();

        assert_eq!(cursor.first().unwrap().unwrap().0, b"a");
        assert_eq!(cursor.next().unwrap().unwrap().0, b"c");
        assert_eq!(cursor.next().unwrap().unwrap().0, b"e");
        assert!(cursor.next().unwrap().is_none());

        assert_eq!(cursor.last().unwrap().unwrap().0, b"e");
        assert_eq!(cursor.prev().unwrap().unwrap().0, b"c");

        assert_eq!(cursor.seek(b"b").unwrap().unwrap().0, b"c");
        assert_eq!(cursor.seek(b"c").unwrap().unwrap().0, b"c");
        assert!(cursor.seek(b"f").unwrap().is_none());
    }

    #[test]
    fn test_transactions() {
        let (mut store, table) = store_with_rows(&[(b"a", b"1")]);

        store.begin().unwrap();
        store.put(&table, b"b", b"2").unwrap();
        store.rollback().unwrap();
        assert_eq!(store.get(&table, b"b").unwrap(), None);

        store.begin().unwrap();
        store.put(&table, b"b", b"2").unwrap();
        store.commit().unwrap();
        assert_eq!(store.get(&table, b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_temp_tables_are_distinct() {
        let mut store = MemoryStore::new();
        let t1 = store.create_temp_table().unwrap();
        let t2 = store.create_temp_table().unwrap();
        assert_ne!(t1, t2);
        assert!(t1.is_temp());

        store.put(&t1, b"k", b"v").unwrap();
        assert_eq!(store.get(&t2, b"k").unwrap(), None);

        store.drop_table(&t1).unwrap();
        assert!(store.get(&t1, b"k").is_err());
    }
}
