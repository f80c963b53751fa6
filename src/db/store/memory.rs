use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::{Store, TxWork};
use crate::db::error::PersistenceError;
use crate::db::persistence::filter::{Condition, Direction, FilterOp, Operand, Query};
use crate::db::persistence::record::{FieldDef, FieldKind, TableSchema};
use crate::db::persistence::value::{Row, Value};

/// In-process store enforcing the same descriptor constraints as the SQL
/// schema: primary key, unique, not null, defaults and foreign keys.
///
/// One mutex guards all tables. A transaction holds it for its whole
/// duration, so transactions are serialized.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Debug, Default, Clone)]
struct Tables {
    by_name: HashMap<String, Table>,
}

#[derive(Debug, Default, Clone)]
struct Table {
    rows: Vec<Row>,
    last_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, PersistenceError> {
        self.tables
            .lock()
            .map_err(|_| PersistenceError::Connection("memory store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn insert_many(&self, schema: &TableSchema, rows: &[Row]) -> Result<Vec<i64>, PersistenceError> {
        self.lock()?.insert_many(schema, rows)
    }

    fn select(&self, schema: &TableSchema, query: &Query) -> Result<Vec<Row>, PersistenceError> {
        Ok(self.lock()?.select(schema, query))
    }

    fn count(&self, schema: &TableSchema, conditions: &[Condition]) -> Result<u64, PersistenceError> {
        Ok(self.lock()?.count(schema, conditions))
    }

    fn update(
        &self,
        schema: &TableSchema,
        assignments: &Row,
        conditions: &[Condition],
    ) -> Result<u64, PersistenceError> {
        self.lock()?.update(schema, assignments, conditions)
    }

    fn delete(&self, schema: &TableSchema, conditions: &[Condition]) -> Result<u64, PersistenceError> {
        Ok(self.lock()?.delete(schema, conditions))
    }

    fn transaction(&self, work: &mut TxWork<'_>) -> Result<(), PersistenceError> {
        let mut tables = self.lock()?;
        run_in_snapshot(&mut tables, work)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Store view handed to transaction work; writes go to the locked tables.
struct MemoryTx<'a> {
    tables: RefCell<&'a mut Tables>,
}

impl Store for MemoryTx<'_> {
    fn insert_many(&self, schema: &TableSchema, rows: &[Row]) -> Result<Vec<i64>, PersistenceError> {
        self.tables.borrow_mut().insert_many(schema, rows)
    }

    fn select(&self, schema: &TableSchema, query: &Query) -> Result<Vec<Row>, PersistenceError> {
        Ok(self.tables.borrow().select(schema, query))
    }

    fn count(&self, schema: &TableSchema, conditions: &[Condition]) -> Result<u64, PersistenceError> {
        Ok(self.tables.borrow().count(schema, conditions))
    }

    fn update(
        &self,
        schema: &TableSchema,
        assignments: &Row,
        conditions: &[Condition],
    ) -> Result<u64, PersistenceError> {
        self.tables.borrow_mut().update(schema, assignments, conditions)
    }

    fn delete(&self, schema: &TableSchema, conditions: &[Condition]) -> Result<u64, PersistenceError> {
        Ok(self.tables.borrow_mut().delete(schema, conditions))
    }

    fn transaction(&self, work: &mut TxWork<'_>) -> Result<(), PersistenceError> {
        let mut tables = self.tables.borrow_mut();
        run_in_snapshot(&mut **tables, work)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

fn run_in_snapshot(tables: &mut Tables, work: &mut TxWork<'_>) -> Result<(), PersistenceError> {
    let snapshot = tables.clone();
    let result = {
        let tx = MemoryTx {
            tables: RefCell::new(&mut *tables),
        };
        work(&tx)
    };
    if result.is_err() {
        *tables = snapshot;
    }
    result
}

impl Tables {
    fn rows(&self, schema: &TableSchema) -> &[Row] {
        self.by_name
            .get(schema.name())
            .map(|table| table.rows.as_slice())
            .unwrap_or_default()
    }

    fn insert_many(&mut self, schema: &TableSchema, rows: &[Row]) -> Result<Vec<i64>, PersistenceError> {
        if schema.insert_fields().next().is_none() {
            return Err(PersistenceError::NoColumns(schema.name().to_string()));
        }

        // a multi-row insert is one statement: all rows or none
        let snapshot = self.by_name.get(schema.name()).cloned();
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            match self.insert_one(schema, row) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    match snapshot {
                        Some(table) => self.by_name.insert(schema.name().to_string(), table),
                        None => self.by_name.remove(schema.name()),
                    };
                    return Err(err);
                }
            }
        }
        Ok(ids)
    }

    fn insert_one(&mut self, schema: &TableSchema, input: &Row) -> Result<i64, PersistenceError> {
        let last_id = self.by_name.get(schema.name()).map_or(0, |table| table.last_id);
        let mut row = Row::new();
        let mut id = None;

        for field in schema.fields() {
            let mut value = input.value(field.column).cloned().unwrap_or(Value::Null);

            if field.primary_key && field.serial && value.is_null() {
                value = Value::Int(last_id + 1);
            }
            if value.is_null()
                && let Some(default) = field.default
            {
                value = default_value(field, default)?;
            }
            if value.is_null() && field.not_null {
                return Err(PersistenceError::NotNullViolation {
                    table: schema.name().to_string(),
                    column: field.column.to_string(),
                });
            }
            if field.primary_key {
                id = match value {
                    Value::Int(key) => Some(key),
                    _ => {
                        return Err(PersistenceError::malformed(format!(
                            "primary key `{}` must be an integer",
                            field.column
                        )));
                    }
                };
            }
            row.set(field.column, value);
        }

        let id = id.ok_or_else(|| {
            PersistenceError::malformed(format!("`{}` declares no primary key", schema.name()))
        })?;
        self.check_unique(schema, &row, None)?;
        self.check_foreign_keys(schema, &row)?;

        let table = self.by_name.entry(schema.name().to_string()).or_default();
        table.last_id = table.last_id.max(id);
        table.rows.push(row);
        Ok(id)
    }

    fn check_unique(
        &self,
        schema: &TableSchema,
        row: &Row,
        skip: Option<usize>,
    ) -> Result<(), PersistenceError> {
        for field in schema.fields().iter().filter(|f| f.unique || f.primary_key) {
            let Some(value) = row.value(field.column).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = self.rows(schema).iter().enumerate().any(|(i, existing)| {
                Some(i) != skip && existing.value(field.column) == Some(value)
            });
            if clash {
                let suffix = if field.primary_key { "pkey" } else { "key" };
                return Err(PersistenceError::UniqueViolation {
                    table: schema.name().to_string(),
                    constraint: format!("{}_{}_{suffix}", schema.name(), field.column),
                    column: Some(field.column.to_string()),
                });
            }
        }
        Ok(())
    }

    fn check_foreign_keys(&self, schema: &TableSchema, row: &Row) -> Result<(), PersistenceError> {
        for field in schema.fields() {
            let Some((table, column)) = field.references else {
                continue;
            };
            let Some(value) = row.value(field.column).filter(|v| !v.is_null()) else {
                continue;
            };
            let exists = self.by_name.get(table).is_some_and(|target| {
                target.rows.iter().any(|r| r.value(column) == Some(value))
            });
            if !exists {
                return Err(PersistenceError::ForeignKeyViolation(format!(
                    "{}.{} = {value:?} has no match in {table}.{column}",
                    schema.name(),
                    field.column
                )));
            }
        }
        Ok(())
    }

    fn select(&self, schema: &TableSchema, query: &Query) -> Vec<Row> {
        let mut rows: Vec<Row> = self
            .rows(schema)
            .iter()
            .filter(|row| matches_all(row, &query.conditions))
            .cloned()
            .collect();

        if !query.order_by.is_empty() {
            rows.sort_by(|a, b| {
                for order in &query.order_by {
                    let left = a.value(&order.column).unwrap_or(&Value::Null);
                    let right = b.value(&order.column).unwrap_or(&Value::Null);
                    let ordering = compare_for_sort(left, right);
                    let ordering = match order.direction {
                        Direction::Asc => ordering,
                        Direction::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let offset = usize::try_from(query.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        rows.into_iter().skip(offset).take(limit).collect()
    }

    fn count(&self, schema: &TableSchema, conditions: &[Condition]) -> u64 {
        let matching = self
            .rows(schema)
            .iter()
            .filter(|row| matches_all(row, conditions))
            .count();
        u64::try_from(matching).unwrap_or(u64::MAX)
    }

    fn update(
        &mut self,
        schema: &TableSchema,
        assignments: &Row,
        conditions: &[Condition],
    ) -> Result<u64, PersistenceError> {
        let targets: Vec<usize> = self
            .rows(schema)
            .iter()
            .enumerate()
            .filter(|(_, row)| matches_all(row, conditions))
            .map(|(i, _)| i)
            .collect();

        let mut updated = Vec::with_capacity(targets.len());
        for &i in &targets {
            let mut row = self.rows(schema)[i].clone();
            for (column, value) in assignments.columns() {
                let field = schema.require(column)?;
                if value.is_null() && field.not_null {
                    return Err(PersistenceError::NotNullViolation {
                        table: schema.name().to_string(),
                        column: column.to_string(),
                    });
                }
                row.set(column, value.clone());
            }
            self.check_unique(schema, &row, Some(i))?;
            self.check_foreign_keys(schema, &row)?;
            updated.push((i, row));
        }

        if let Some(table) = self.by_name.get_mut(schema.name()) {
            for (i, row) in updated {
                table.rows[i] = row;
            }
        }
        Ok(targets.len() as u64)
    }

    fn delete(&mut self, schema: &TableSchema, conditions: &[Condition]) -> u64 {
        let Some(table) = self.by_name.get_mut(schema.name()) else {
            return 0;
        };
        let before = table.rows.len();
        table.rows.retain(|row| !matches_all(row, conditions));
        (before - table.rows.len()) as u64
    }
}

fn default_value(field: &FieldDef, raw: &str) -> Result<Value, PersistenceError> {
    match (field.kind, raw) {
        (FieldKind::Timestamp, "now") => Ok(Value::Timestamp(Utc::now())),
        _ => Value::Text(raw.to_string()).coerce(field.kind),
    }
}

/// NULLs compare greater than any value, as Postgres sorts them by default.
fn compare_for_sort(left: &Value, right: &Value) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => left.compare(right).unwrap_or(Ordering::Equal),
    }
}

fn matches_all(row: &Row, conditions: &[Condition]) -> bool {
    conditions.iter().all(|condition| matches(row, condition))
}

fn matches(row: &Row, condition: &Condition) -> bool {
    let actual = row.value(&condition.column).unwrap_or(&Value::Null);

    match (&condition.operand, condition.op) {
        (Operand::Single(expected), FilterOp::Equals) => {
            if expected.is_null() {
                actual.is_null()
            } else {
                actual.compare(expected) == Some(Ordering::Equal)
            }
        }
        (Operand::Single(expected), FilterOp::NotEquals) => {
            if expected.is_null() {
                !actual.is_null()
            } else {
                matches!(actual.compare(expected), Some(o) if o != Ordering::Equal)
            }
        }
        (Operand::Single(expected), FilterOp::Like) => match (actual.as_text(), expected.as_text()) {
            (Some(haystack), Some(needle)) => haystack.contains(needle),
            _ => false,
        },
        (Operand::Single(expected), FilterOp::ILike) => match (actual.as_text(), expected.as_text()) {
            (Some(haystack), Some(needle)) => haystack.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        },
        (Operand::Single(expected), FilterOp::GreaterThan) => {
            actual.compare(expected) == Some(Ordering::Greater)
        }
        (Operand::Single(expected), FilterOp::LessThan) => actual.compare(expected) == Some(Ordering::Less),
        (Operand::Single(expected), FilterOp::GreaterThanOrEqual) => {
            matches!(actual.compare(expected), Some(Ordering::Greater | Ordering::Equal))
        }
        (Operand::Single(expected), FilterOp::LessThanOrEqual) => {
            matches!(actual.compare(expected), Some(Ordering::Less | Ordering::Equal))
        }
        (Operand::List(values), FilterOp::In) => values
            .iter()
            .any(|value| actual.compare(value) == Some(Ordering::Equal)),
        (Operand::List(values), FilterOp::NotIn) => {
            !actual.is_null()
                && !values
                    .iter()
                    .any(|value| actual.compare(value) == Some(Ordering::Equal))
        }
        // shapes are rejected by Condition::normalize before reaching a store
        _ => false,
    }
}
