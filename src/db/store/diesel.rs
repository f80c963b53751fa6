use std::cell::RefCell;

use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{BigInt, Bool, Double, Nullable, Text, Timestamptz};

use super::{Store, TxWork};
use crate::db::connection::{PoolSettings, build_pool};
use crate::db::error::PersistenceError;
use crate::db::persistence::filter::{Condition, Query};
use crate::db::persistence::record::{FieldKind, TableSchema};
use crate::db::persistence::sql::{self, Projection, Statement};
use crate::db::persistence::value::{Row, Value};
use crate::db::{DbConnection, DbPool};

/// Postgres backend going through diesel and an r2d2 pool.
#[derive(Clone)]
pub struct DieselStore {
    pool: DbPool,
}

impl DieselStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn connect(settings: &PoolSettings) -> Result<Self, PersistenceError> {
        build_pool(settings).map(Self::new)
    }

    /// Creates missing tables from their descriptors, in the given order.
    pub fn ensure_schema(&self, tables: &[&TableSchema]) -> Result<(), PersistenceError> {
        let mut conn = self.conn()?;
        for schema in tables {
            let ddl = sql::create_table(schema)?;
            conn.batch_execute(&ddl)?;
            tracing::info!(table = schema.name(), "Table ready");
        }
        Ok(())
    }

    fn conn(&self) -> Result<DbConnection, PersistenceError> {
        self.pool.get().map_err(|e| {
            PersistenceError::Connection(format!("Unable to get a connection from the pool: {e}"))
        })
    }
}

impl Store for DieselStore {
    fn insert_many(&self, schema: &TableSchema, rows: &[Row]) -> Result<Vec<i64>, PersistenceError> {
        let mut conn = self.conn()?;
        exec::insert_many(&mut conn, schema, rows)
    }

    fn select(&self, schema: &TableSchema, query: &Query) -> Result<Vec<Row>, PersistenceError> {
        let mut conn = self.conn()?;
        exec::select(&mut conn, schema, query)
    }

    fn count(&self, schema: &TableSchema, conditions: &[Condition]) -> Result<u64, PersistenceError> {
        let mut conn = self.conn()?;
        exec::count(&mut conn, schema, conditions)
    }

    fn update(
        &self,
        schema: &TableSchema,
        assignments: &Row,
        conditions: &[Condition],
    ) -> Result<u64, PersistenceError> {
        let mut conn = self.conn()?;
        exec::update(&mut conn, schema, assignments, conditions)
    }

    fn delete(&self, schema: &TableSchema, conditions: &[Condition]) -> Result<u64, PersistenceError> {
        let mut conn = self.conn()?;
        exec::delete(&mut conn, schema, conditions)
    }

    fn transaction(&self, work: &mut TxWork<'_>) -> Result<(), PersistenceError> {
        let mut conn = self.conn()?;
        exec::transaction(&mut conn, work)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

/// Store view bound to the connection holding an open transaction.
struct PgTx<'c> {
    conn: RefCell<&'c mut PgConnection>,
}

impl Store for PgTx<'_> {
    fn insert_many(&self, schema: &TableSchema, rows: &[Row]) -> Result<Vec<i64>, PersistenceError> {
        exec::insert_many(&mut self.conn.borrow_mut(), schema, rows)
    }

    fn select(&self, schema: &TableSchema, query: &Query) -> Result<Vec<Row>, PersistenceError> {
        exec::select(&mut self.conn.borrow_mut(), schema, query)
    }

    fn count(&self, schema: &TableSchema, conditions: &[Condition]) -> Result<u64, PersistenceError> {
        exec::count(&mut self.conn.borrow_mut(), schema, conditions)
    }

    fn update(
        &self,
        schema: &TableSchema,
        assignments: &Row,
        conditions: &[Condition],
    ) -> Result<u64, PersistenceError> {
        exec::update(&mut self.conn.borrow_mut(), schema, assignments, conditions)
    }

    fn delete(&self, schema: &TableSchema, conditions: &[Condition]) -> Result<u64, PersistenceError> {
        exec::delete(&mut self.conn.borrow_mut(), schema, conditions)
    }

    // diesel turns a nested transaction into a savepoint
    fn transaction(&self, work: &mut TxWork<'_>) -> Result<(), PersistenceError> {
        exec::transaction(&mut self.conn.borrow_mut(), work)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

mod exec {
    use super::{
        BigInt, Bool, BoxedSqlQuery, DateTime, Double, FieldKind, Nullable, Pg, PersistenceError,
        PgConnection, PgTx, Projection, Query, RefCell, Row, SqlQuery, Statement, TableSchema,
        Text, Timestamptz, TxWork, Utc, Value, sql,
    };
    use crate::db::persistence::filter::Condition;
    use diesel::prelude::*;

    #[derive(QueryableByName)]
    struct InsertedId {
        #[diesel(sql_type = BigInt)]
        inserted_id: i64,
    }

    #[derive(QueryableByName)]
    struct Total {
        #[diesel(sql_type = BigInt)]
        total: i64,
    }

    #[derive(QueryableByName)]
    struct JsonRow {
        #[diesel(sql_type = Text)]
        data: String,
    }

    fn prepare(statement: Statement) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
        let Statement { sql, params } = statement;
        let mut query = diesel::sql_query(sql).into_boxed::<Pg>();

        for param in params {
            query = match (param.value, param.kind) {
                (Value::Null, FieldKind::BigInt) => query.bind::<Nullable<BigInt>, _>(None::<i64>),
                (Value::Null, FieldKind::Double) => query.bind::<Nullable<Double>, _>(None::<f64>),
                (Value::Null, FieldKind::Bool) => query.bind::<Nullable<Bool>, _>(None::<bool>),
                (Value::Null, FieldKind::Text) => query.bind::<Nullable<Text>, _>(None::<String>),
                (Value::Null, FieldKind::Timestamp) => {
                    query.bind::<Nullable<Timestamptz>, _>(None::<DateTime<Utc>>)
                }
                (Value::Int(v), _) => query.bind::<BigInt, _>(v),
                (Value::Float(v), _) => query.bind::<Double, _>(v),
                (Value::Bool(v), _) => query.bind::<Bool, _>(v),
                (Value::Text(v), _) => query.bind::<Text, _>(v),
                (Value::Timestamp(v), _) => query.bind::<Timestamptz, _>(v),
            };
        }

        query
    }

    pub(super) fn insert_many(
        conn: &mut PgConnection,
        schema: &TableSchema,
        rows: &[Row],
    ) -> Result<Vec<i64>, PersistenceError> {
        let statement = sql::insert(schema, rows)?;
        let ids = prepare(statement).load::<InsertedId>(conn)?;
        Ok(ids.into_iter().map(|row| row.inserted_id).collect())
    }

    pub(super) fn select(
        conn: &mut PgConnection,
        schema: &TableSchema,
        query: &Query,
    ) -> Result<Vec<Row>, PersistenceError> {
        let statement = sql::select(schema, query, Projection::Json)?;
        prepare(statement)
            .load::<JsonRow>(conn)?
            .iter()
            .map(|row| decode_row(schema, &row.data))
            .collect()
    }

    pub(super) fn count(
        conn: &mut PgConnection,
        schema: &TableSchema,
        conditions: &[Condition],
    ) -> Result<u64, PersistenceError> {
        let statement = sql::count(schema, conditions)?;
        let total = prepare(statement).get_result::<Total>(conn)?.total;
        u64::try_from(total).map_err(|_| PersistenceError::Decode(format!("negative count {total}")))
    }

    pub(super) fn update(
        conn: &mut PgConnection,
        schema: &TableSchema,
        assignments: &Row,
        conditions: &[Condition],
    ) -> Result<u64, PersistenceError> {
        let statement = sql::update(schema, assignments, conditions)?;
        Ok(prepare(statement).execute(conn)? as u64)
    }

    pub(super) fn delete(
        conn: &mut PgConnection,
        schema: &TableSchema,
        conditions: &[Condition],
    ) -> Result<u64, PersistenceError> {
        let statement = sql::delete(schema, conditions)?;
        Ok(prepare(statement).execute(conn)? as u64)
    }

    pub(super) fn transaction(
        conn: &mut PgConnection,
        work: &mut TxWork<'_>,
    ) -> Result<(), PersistenceError> {
        conn.transaction::<(), PersistenceError, _>(|conn| {
            let tx = PgTx {
                conn: RefCell::new(conn),
            };
            work(&tx)
        })
    }

    /// Maps a `row_to_json` object onto the descriptor fields.
    pub(super) fn decode_row(schema: &TableSchema, data: &str) -> Result<Row, PersistenceError> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(data)?;
        let mut row = Row::new();

        for field in schema.fields() {
            let raw = object.get(field.column).unwrap_or(&serde_json::Value::Null);
            row.set(field.column, decode_value(field.column, field.kind, raw)?);
        }

        Ok(row)
    }

    fn decode_value(
        column: &str,
        kind: FieldKind,
        raw: &serde_json::Value,
    ) -> Result<Value, PersistenceError> {
        use serde_json::Value as Json;

        let value = match (raw, kind) {
            (Json::Null, _) => Some(Value::Null),
            (Json::Number(n), FieldKind::BigInt) => n.as_i64().map(Value::Int),
            (Json::Number(n), FieldKind::Double) => n.as_f64().map(Value::Float),
            (Json::Bool(b), FieldKind::Bool) => Some(Value::Bool(*b)),
            (Json::String(s), FieldKind::Text) => Some(Value::Text(s.clone())),
            (Json::String(s), FieldKind::Timestamp) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| Value::Timestamp(ts.with_timezone(&Utc))),
            _ => None,
        };

        value.ok_or_else(|| {
            PersistenceError::Decode(format!("column `{column}`: {raw} is not a {kind:?}"))
        })
    }
}
