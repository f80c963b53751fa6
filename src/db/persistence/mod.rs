//! Descriptor-driven persistence helper.
//!
//! [`Persistence`] maps any [`Record`] onto its table through the record's
//! static [`TableSchema`] and a [`Store`] backend. It validates every column
//! name against the schema before a statement is built, so callers only ever
//! pass structured input.

pub mod filter;
pub mod record;
pub mod sql;
pub mod value;

use std::time::Instant;

use chrono::{DateTime, Utc};

use self::filter::{Condition, OrderBy, Query, normalize_all};
use self::record::{CREATED_AT, DELETED_AT, FieldDef, Record, TableSchema, UPDATED_AT};
use self::value::{Row, Value};
use super::error::PersistenceError;
use super::store::Store;

/// Rows per transaction in [`Persistence::insert_batch`].
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// One window of a paginated listing.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub conditions: Vec<Condition>,
    pub order_by: Vec<OrderBy>,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct Page<R> {
    pub items: Vec<R>,
    pub total: u64,
}

/// Generic persistence operations over a borrowed store.
///
/// Carries the caller's deadline: every operation fails with
/// [`PersistenceError::Timeout`] once it has passed.
#[derive(Clone, Copy)]
pub struct Persistence<'s> {
    store: &'s dyn Store,
    deadline: Option<Instant>,
}

impl<'s> Persistence<'s> {
    pub fn new(store: &'s dyn Store) -> Self {
        Self {
            store,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn store(&self) -> &'s dyn Store {
        self.store
    }

    fn check_deadline(&self, operation: &'static str) -> Result<(), PersistenceError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                tracing::warn!(operation, "Deadline exceeded, aborting persistence call");
                Err(PersistenceError::Timeout(operation))
            }
            _ => Ok(()),
        }
    }

    /// Inserts `record`, then refreshes it with the generated key and
    /// timestamps.
    pub fn insert<R: Record>(&self, record: &mut R) -> Result<(), PersistenceError> {
        self.check_deadline("insert")?;
        let schema = R::schema();
        let primary_key = primary_key(schema)?;

        let mut row = stamp_for_insert(schema, record.to_row(), Utc::now())?;
        let id = self.store.insert(schema, &row)?;
        row.set(primary_key.column, id);

        *record = R::from_row(&row)?;
        Ok(())
    }

    /// Inserts `records` in chunks of `batch_size`, one transaction per chunk.
    ///
    /// A failing chunk is rolled back on its own; earlier chunks stay
    /// committed and later ones are not attempted. The error reports which
    /// chunk failed and how many rows were committed before it.
    pub fn insert_batch<R: Record>(
        &self,
        records: &mut [R],
        batch_size: usize,
    ) -> Result<(), PersistenceError> {
        if batch_size == 0 {
            return Err(PersistenceError::malformed("batch size must be positive"));
        }
        if records.is_empty() {
            return Ok(());
        }

        let schema = R::schema();
        let primary_key = primary_key(schema)?;
        let chunks = records.len().div_ceil(batch_size);
        let mut committed_rows = 0;

        for (index, chunk) in records.chunks_mut(batch_size).enumerate() {
            self.check_deadline("insert_batch")?;
            let now = Utc::now();
            let rows = chunk
                .iter()
                .map(|record| stamp_for_insert(schema, record.to_row(), now))
                .collect::<Result<Vec<_>, _>>()?;

            let mut ids = Vec::new();
            let outcome = self.store.transaction(&mut |tx| {
                ids = tx.insert_many(schema, &rows)?;
                Ok(())
            });

            if let Err(source) = outcome {
                tracing::error!(
                    table = schema.name(),
                    chunk = index + 1,
                    chunks,
                    committed_rows,
                    error = %source,
                    "Batch insert chunk failed"
                );
                return Err(PersistenceError::BatchFailed {
                    chunk: index,
                    chunks,
                    committed_rows,
                    source: Box::new(source),
                });
            }
            if ids.len() != rows.len() {
                return Err(PersistenceError::Database(format!(
                    "batch insert returned {} keys for {} rows",
                    ids.len(),
                    rows.len()
                )));
            }

            for ((record, mut row), id) in chunk.iter_mut().zip(rows).zip(ids) {
                row.set(primary_key.column, id);
                *record = R::from_row(&row)?;
            }
            committed_rows += chunk.len();
            tracing::debug!(table = schema.name(), chunk = index + 1, chunks, "Batch chunk committed");
        }

        Ok(())
    }

    /// Finds the first row matching every `(column, value)` pair.
    pub fn find_one_by_fields<R: Record>(&self, fields: &[(&str, Value)]) -> Result<R, PersistenceError> {
        if fields.is_empty() {
            return Err(PersistenceError::malformed(
                "find_one_by_fields needs at least one column/value pair",
            ));
        }
        let conditions = fields
            .iter()
            .map(|(column, value)| Condition::eq(*column, value.clone()))
            .collect();
        self.find_one(conditions)
    }

    pub fn find_one<R: Record>(&self, conditions: Vec<Condition>) -> Result<R, PersistenceError> {
        let schema = R::schema();
        let query = Query {
            conditions,
            limit: Some(1),
            ..Query::default()
        };
        let description = describe(&query.conditions);

        self.select::<R>(query)?
            .into_iter()
            .next()
            .ok_or_else(|| PersistenceError::not_found(format!("{} where {description}", schema.name())))
    }

    pub fn find_by_id<R: Record>(&self, id: i64) -> Result<R, PersistenceError> {
        let primary_key = primary_key(R::schema())?;
        self.find_one(vec![Condition::eq(primary_key.column, id)])
    }

    pub fn find_all<R: Record>(&self, query: Query) -> Result<Vec<R>, PersistenceError> {
        self.select(query)
    }

    pub fn count_all<R: Record>(&self) -> Result<u64, PersistenceError> {
        self.count_where::<R>(Vec::new())
    }

    pub fn count_where<R: Record>(&self, conditions: Vec<Condition>) -> Result<u64, PersistenceError> {
        self.check_deadline("count")?;
        let schema = R::schema();
        let conditions = visible(schema, normalize_all(schema, conditions)?);
        self.store.count(schema, &conditions)
    }

    /// One page of rows plus the total number of rows matching the filters.
    pub fn find_all_paginated<R: Record>(&self, page: PageRequest) -> Result<Page<R>, PersistenceError> {
        let total = self.count_where::<R>(page.conditions.clone())?;
        let items = self.select(Query {
            conditions: page.conditions,
            order_by: page.order_by,
            limit: Some(page.limit),
            offset: Some(page.offset),
        })?;
        Ok(Page { items, total })
    }

    /// Rewrites every non-key column of the row `id` from `record`.
    pub fn update_by_id<R: Record>(&self, record: &mut R, id: i64) -> Result<(), PersistenceError> {
        self.check_deadline("update")?;
        let schema = R::schema();
        let primary_key = primary_key(schema)?;

        let mut row = record.to_row();
        row.remove(primary_key.column);
        if schema.has_timestamp(UPDATED_AT) {
            row.set(UPDATED_AT, Utc::now());
        }
        let assignments = normalize_assignments(schema, row)?;

        let affected = self
            .store
            .update(schema, &assignments, &[Condition::eq(primary_key.column, id)])?;
        if affected == 0 {
            return Err(PersistenceError::not_found(format!("{} with id {id}", schema.name())));
        }

        let mut refreshed = assignments;
        refreshed.set(primary_key.column, id);
        *record = R::from_row(&refreshed)?;
        Ok(())
    }

    /// Updates only the given columns of row `id`, returning rows affected.
    pub fn update_partial_by_id<R: Record>(&self, fields: Row, id: i64) -> Result<u64, PersistenceError> {
        let primary_key = primary_key(R::schema())?;
        self.update_where::<R>(fields, vec![Condition::eq(primary_key.column, id)])
    }

    /// Conditional update: applies `fields` to every row matching
    /// `conditions` and reports how many rows changed. `updated_at` is
    /// injected unless supplied.
    pub fn update_where<R: Record>(
        &self,
        mut fields: Row,
        conditions: Vec<Condition>,
    ) -> Result<u64, PersistenceError> {
        self.check_deadline("update")?;
        let schema = R::schema();
        if schema.has_timestamp(UPDATED_AT) && fields.value(UPDATED_AT).is_none() {
            fields.set(UPDATED_AT, Utc::now());
        }
        let assignments = normalize_assignments(schema, fields)?;
        let conditions = normalize_all(schema, conditions)?;
        self.store.update(schema, &assignments, &conditions)
    }

    /// Soft-deletes when the type has a `deleted_at` timestamp, hard-deletes
    /// otherwise.
    pub fn delete_by_id<R: Record>(&self, id: i64) -> Result<(), PersistenceError> {
        self.check_deadline("delete")?;
        let schema = R::schema();
        let primary_key = primary_key(schema)?;
        let by_id = Condition::eq(primary_key.column, id);

        let affected = if schema.is_soft_deletable() {
            let now: DateTime<Utc> = Utc::now();
            let mut fields = Row::new().with(DELETED_AT, now);
            if schema.has_timestamp(UPDATED_AT) {
                fields.set(UPDATED_AT, now);
            }
            self.store
                .update(schema, &fields, &[by_id, Condition::is_null(DELETED_AT)])?
        } else {
            self.store.delete(schema, &[by_id])?
        };

        if affected == 0 {
            return Err(PersistenceError::not_found(format!("{} with id {id}", schema.name())));
        }
        Ok(())
    }

    /// Runs `work` in one transaction. Any error returned by `work` rolls
    /// the transaction back and is handed back unchanged.
    pub fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Persistence<'_>) -> Result<T, E>,
        E: From<PersistenceError>,
    {
        self.check_deadline("transaction")?;
        let deadline = self.deadline;
        let mut work = Some(work);
        let mut outcome: Option<Result<T, E>> = None;

        let result = self.store.transaction(&mut |tx| {
            let work = work
                .take()
                .ok_or_else(|| PersistenceError::Database("transaction body ran twice".to_string()))?;
            let scoped = Persistence { store: tx, deadline };
            match work(&scoped) {
                Ok(value) => {
                    outcome = Some(Ok(value));
                    Ok(())
                }
                Err(err) => {
                    outcome = Some(Err(err));
                    Err(PersistenceError::RolledBack)
                }
            }
        });

        match (result, outcome) {
            (_, Some(Err(err))) => Err(err),
            (Ok(()), Some(Ok(value))) => Ok(value),
            (Err(err), _) => Err(E::from(err)),
            (Ok(()), None) => Err(E::from(PersistenceError::Database(
                "transaction body did not run".to_string(),
            ))),
        }
    }

    fn select<R: Record>(&self, query: Query) -> Result<Vec<R>, PersistenceError> {
        self.check_deadline("select")?;
        let schema = R::schema();
        let mut query = query.normalize(schema)?;
        query.conditions = visible(schema, query.conditions);

        self.store
            .select(schema, &query)?
            .iter()
            .map(R::from_row)
            .collect()
    }
}

fn primary_key(schema: &TableSchema) -> Result<&'static FieldDef, PersistenceError> {
    schema.primary_key().ok_or_else(|| {
        PersistenceError::malformed(format!("`{}` declares no primary key", schema.name()))
    })
}

/// Drops a generated key and stamps `created_at`/`updated_at` when the type
/// declares them as timestamps.
fn stamp_for_insert(schema: &TableSchema, mut row: Row, now: DateTime<Utc>) -> Result<Row, PersistenceError> {
    if schema.insert_fields().next().is_none() {
        return Err(PersistenceError::NoColumns(schema.name().to_string()));
    }
    if let Some(key) = schema.primary_key().filter(|key| key.serial) {
        row.remove(key.column);
    }
    for column in [CREATED_AT, UPDATED_AT] {
        if schema.has_timestamp(column) {
            row.set(column, now);
        }
    }
    normalize_assignments(schema, row)
}

fn normalize_assignments(schema: &TableSchema, row: Row) -> Result<Row, PersistenceError> {
    let mut normalized = Row::new();
    for (column, value) in row.columns() {
        let field = schema.require(column)?;
        normalized.set(field.column, value.clone().coerce(field.kind)?);
    }
    Ok(normalized)
}

/// Hides soft-deleted rows.
fn visible(schema: &TableSchema, mut conditions: Vec<Condition>) -> Vec<Condition> {
    if schema.is_soft_deletable() {
        conditions.push(Condition::is_null(DELETED_AT));
    }
    conditions
}

fn describe(conditions: &[Condition]) -> String {
    conditions
        .iter()
        .map(|c| format!("{} {:?}", c.column, c.op))
        .collect::<Vec<_>>()
        .join(" and ")
}
