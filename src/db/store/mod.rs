//! Storage backends behind one capability trait.
//!
//! Both backends receive already-normalized input from
//! [`Persistence`](crate::db::persistence::Persistence): columns exist on the
//! schema and values have the column's kind.

pub mod diesel;
pub mod memory;

#[cfg(test)]
pub(crate) mod contract;

use std::sync::Arc;

use crate::db::error::PersistenceError;
use crate::db::persistence::filter::{Condition, Query};
use crate::db::persistence::record::TableSchema;
use crate::db::persistence::value::Row;

pub use self::diesel::DieselStore;
pub use self::memory::MemoryStore;

/// The work run inside [`Store::transaction`].
pub type TxWork<'a> = dyn FnMut(&dyn Store) -> Result<(), PersistenceError> + 'a;

pub trait Store {
    /// Inserts one row, returning its primary key.
    fn insert(&self, schema: &TableSchema, row: &Row) -> Result<i64, PersistenceError> {
        let ids = self.insert_many(schema, std::slice::from_ref(row))?;
        ids.into_iter()
            .next()
            .ok_or_else(|| PersistenceError::Database("insert returned no key".to_string()))
    }

    /// Inserts all rows in one statement, returning keys in input order.
    fn insert_many(&self, schema: &TableSchema, rows: &[Row]) -> Result<Vec<i64>, PersistenceError>;

    fn select(&self, schema: &TableSchema, query: &Query) -> Result<Vec<Row>, PersistenceError>;

    fn count(&self, schema: &TableSchema, conditions: &[Condition]) -> Result<u64, PersistenceError>;

    /// Applies `assignments` to every matching row, returning how many matched.
    fn update(
        &self,
        schema: &TableSchema,
        assignments: &Row,
        conditions: &[Condition],
    ) -> Result<u64, PersistenceError>;

    fn delete(&self, schema: &TableSchema, conditions: &[Condition]) -> Result<u64, PersistenceError>;

    /// Runs `work` against a transaction-bound store. Commits when it returns
    /// `Ok`, rolls back otherwise. Nested calls are allowed.
    fn transaction(&self, work: &mut TxWork<'_>) -> Result<(), PersistenceError>;

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}

/// The store handle shared by the whole application.
pub type SharedStore = Arc<dyn Store + Send + Sync>;
