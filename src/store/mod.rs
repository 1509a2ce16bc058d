//! Row store abstraction
//!
//! The engine never talks to a concrete database. It consumes an ordered
//! key/value surface with caller-managed transactions; SQL and KV backends
//! alike can implement it. Temporary tables used by the deferred-update
//! merge are first-class handles minted by the backend, so the engine never
//! composes table identifiers from strings.

mod memory;

pub use memory::MemoryStore;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque identifier for one table in the row store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(Repr);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
enum Repr {
    Named(String),
    Temp(u64),
}

impl TableId {
    /// A permanent, named table.
    pub fn named(name: impl Into<String>) -> Self {
        Self(Repr::Named(name.into()))
    }

    /// A backend-minted temporary table handle.
    pub fn temp(sequence: u64) -> Self {
        Self(Repr::Temp(sequence))
    }

    pub fn is_temp(&self) -> bool {
        matches!(self.0, Repr::Temp(_))
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Named(name) => write!(f, "{}", name),
            Repr::Temp(sequence) => write!(f, "temp_{}", sequence),
        }
    }
}

/// One row: key bytes and value bytes.
pub type Row = (Vec<u8>, Vec<u8>);

/// Ordered traversal over one table.
///
/// Implementations hold a live handle into the backend; callers must drop
/// the cursor before mutating the table again (the borrow checker enforces
/// this for in-process backends).
pub trait StoreCursor {
    fn first(&mut self) -> Result<Option<Row>>;
    fn last(&mut self) -> Result<Option<Row>>;
    /// Advance to the next row; positions at the first row when unpositioned.
    fn next(&mut self) -> Result<Option<Row>>;
    /// Step to the previous row; positions at the last row when unpositioned.
    fn prev(&mut self) -> Result<Option<Row>>;
    /// Position at the first row whose key is >= `key`.
    fn seek(&mut self, key: &[u8]) -> Result<Option<Row>>;
    fn current(&self) -> Result<Option<Row>>;
}

/// Generic row store: execute/insert/select/delete plus transactions.
pub trait RowStore {
    /// Create a permanent table if it does not exist.
    fn create_table(&mut self, table: &TableId) -> Result<()>;

    /// Mint and create a fresh temporary table.
    fn create_temp_table(&mut self) -> Result<TableId>;

    fn drop_table(&mut self, table: &TableId) -> Result<()>;

    fn get(&self, table: &TableId, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&mut self, table: &TableId, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a row; returns whether it existed.
    fn delete(&mut self, table: &TableId, key: &[u8]) -> Result<bool>;

    fn cursor<'a>(&'a self, table: &TableId) -> Result<Box<dyn StoreCursor + 'a>>;

    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}
