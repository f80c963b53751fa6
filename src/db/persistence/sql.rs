//! Renders parameterized PostgreSQL statements from table descriptors.
//!
//! Identifiers only ever come from [`TableSchema`] descriptors and values are
//! always bound as `$n` parameters.

use std::fmt::Write;

use super::filter::{Condition, FilterOp, Operand, Query};
use super::record::{FieldDef, FieldKind, TableSchema, UPDATED_AT};
use super::value::{Row, Value};
use crate::db::error::PersistenceError;

pub const INSERTED_ID: &str = "inserted_id";
pub const TOTAL: &str = "total";
pub const ROW_JSON: &str = "data";

/// A bound parameter together with the column kind it targets, so that a
/// NULL can be sent with the right type.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub value: Value,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

/// How a SELECT returns its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// One column per descriptor field.
    Columns,
    /// Each row as a single JSON text column named [`ROW_JSON`].
    Json,
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

struct Builder {
    sql: String,
    params: Vec<Param>,
}

impl Builder {
    fn new(sql: String) -> Self {
        Self {
            sql,
            params: Vec::new(),
        }
    }

    fn bind(&mut self, value: Value, kind: FieldKind) -> String {
        self.params.push(Param { value, kind });
        format!("${}", self.params.len())
    }

    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn where_clause(
        &mut self,
        schema: &TableSchema,
        conditions: &[Condition],
    ) -> Result<(), PersistenceError> {
        for (i, condition) in conditions.iter().enumerate() {
            self.push(if i == 0 { " WHERE " } else { " AND " });
            let predicate = self.predicate(schema, condition)?;
            self.push(&predicate);
        }
        Ok(())
    }

    fn predicate(
        &mut self,
        schema: &TableSchema,
        condition: &Condition,
    ) -> Result<String, PersistenceError> {
        let field = schema.require(&condition.column)?;
        let column = quote_ident(field.column);

        let single = || match &condition.operand {
            Operand::Single(value) => Ok(value.clone()),
            Operand::List(_) => Err(PersistenceError::malformed(format!(
                "{:?} on `{}` expects a single value",
                condition.op, condition.column
            ))),
        };

        let predicate = match condition.op {
            FilterOp::Equals | FilterOp::NotEquals => {
                let value = single()?;
                let negate = condition.op == FilterOp::NotEquals;
                if value.is_null() {
                    format!("{column} IS {}NULL", if negate { "NOT " } else { "" })
                } else {
                    let placeholder = self.bind(value, field.kind);
                    format!("{column} {} {placeholder}", if negate { "<>" } else { "=" })
                }
            }
            FilterOp::Like | FilterOp::ILike => {
                let needle = single()?;
                let needle = needle.as_text().ok_or_else(|| {
                    PersistenceError::malformed(format!("pattern on `{}` must be text", field.column))
                })?;
                let pattern = format!("%{}%", escape_like(needle));
                let placeholder = self.bind(Value::Text(pattern), FieldKind::Text);
                let keyword = if condition.op == FilterOp::Like { "LIKE" } else { "ILIKE" };
                format!("{column} {keyword} {placeholder}")
            }
            FilterOp::GreaterThan
            | FilterOp::LessThan
            | FilterOp::GreaterThanOrEqual
            | FilterOp::LessThanOrEqual => {
                let operator = match condition.op {
                    FilterOp::GreaterThan => ">",
                    FilterOp::LessThan => "<",
                    FilterOp::GreaterThanOrEqual => ">=",
                    _ => "<=",
                };
                let placeholder = self.bind(single()?, field.kind);
                format!("{column} {operator} {placeholder}")
            }
            FilterOp::In | FilterOp::NotIn => {
                let Operand::List(values) = &condition.operand else {
                    return Err(PersistenceError::malformed(format!(
                        "{:?} on `{}` expects a list",
                        condition.op, condition.column
                    )));
                };
                let negate = condition.op == FilterOp::NotIn;
                if values.is_empty() {
                    // x IN () is invalid SQL; an empty set matches nothing
                    return Ok(if negate { "TRUE" } else { "FALSE" }.to_string());
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|value| self.bind(value.clone(), field.kind))
                    .collect();
                format!(
                    "{column} {}IN ({})",
                    if negate { "NOT " } else { "" },
                    placeholders.join(", ")
                )
            }
        };

        Ok(predicate)
    }

    fn finish(self) -> Statement {
        tracing::debug!(sql = %self.sql, params = self.params.len(), "Rendered statement");
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn column_list<'a>(fields: impl Iterator<Item = &'a FieldDef>) -> String {
    fields
        .map(|field| quote_ident(field.column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Multi-row `INSERT ... RETURNING pk`. Generated keys are skipped.
pub fn insert(schema: &TableSchema, rows: &[Row]) -> Result<Statement, PersistenceError> {
    let fields: Vec<&FieldDef> = schema.insert_fields().collect();
    if fields.is_empty() {
        return Err(PersistenceError::NoColumns(schema.name().to_string()));
    }
    let primary_key = schema.primary_key().ok_or_else(|| {
        PersistenceError::malformed(format!("`{}` declares no primary key", schema.name()))
    })?;
    if rows.is_empty() {
        return Err(PersistenceError::malformed("insert without rows"));
    }

    let mut builder = Builder::new(format!(
        "INSERT INTO {} ({}) VALUES ",
        quote_ident(schema.name()),
        column_list(fields.iter().copied())
    ));

    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        let placeholders: Vec<String> = fields
            .iter()
            .map(|field| match row.value(field.column) {
                Some(value) if !value.is_null() => builder.bind(value.clone(), field.kind),
                // NULL would bypass the column default
                _ if field.default.is_some() => "DEFAULT".to_string(),
                _ => builder.bind(Value::Null, field.kind),
            })
            .collect();
        builder.push(&format!("({})", placeholders.join(", ")));
    }

    builder.push(&format!(
        " RETURNING {} AS {INSERTED_ID}",
        quote_ident(primary_key.column)
    ));
    Ok(builder.finish())
}

pub fn select(
    schema: &TableSchema,
    query: &Query,
    projection: Projection,
) -> Result<Statement, PersistenceError> {
    let table = quote_ident(schema.name());
    let head = match projection {
        Projection::Columns => format!(
            "SELECT {} FROM {table}",
            column_list(schema.fields().iter())
        ),
        Projection::Json => format!("SELECT row_to_json(t)::text AS {ROW_JSON} FROM {table} AS t"),
    };

    let mut builder = Builder::new(head);
    builder.where_clause(schema, &query.conditions)?;

    for (i, order) in query.order_by.iter().enumerate() {
        let field = schema.require(&order.column)?;
        builder.push(if i == 0 { " ORDER BY " } else { ", " });
        builder.push(&format!("{} {}", quote_ident(field.column), order.direction));
    }
    if let Some(limit) = query.limit {
        builder.push(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = query.offset {
        builder.push(&format!(" OFFSET {offset}"));
    }

    Ok(builder.finish())
}

pub fn count(schema: &TableSchema, conditions: &[Condition]) -> Result<Statement, PersistenceError> {
    let mut builder = Builder::new(format!(
        "SELECT COUNT(*) AS {TOTAL} FROM {}",
        quote_ident(schema.name())
    ));
    builder.where_clause(schema, conditions)?;
    Ok(builder.finish())
}

/// `UPDATE ... SET ... WHERE ...`; refuses to render without a WHERE clause.
pub fn update(
    schema: &TableSchema,
    assignments: &Row,
    conditions: &[Condition],
) -> Result<Statement, PersistenceError> {
    if conditions.is_empty() {
        return Err(PersistenceError::malformed("update without conditions"));
    }

    let mut builder = Builder::new(format!("UPDATE {} SET ", quote_ident(schema.name())));
    let mut sets = Vec::new();
    for (column, value) in assignments.columns() {
        let field = schema.require(column)?;
        let placeholder = builder.bind(value.clone(), field.kind);
        sets.push(format!("{} = {placeholder}", quote_ident(field.column)));
    }
    if sets.is_empty() {
        return Err(PersistenceError::NoColumns(schema.name().to_string()));
    }
    builder.push(&sets.join(", "));
    builder.where_clause(schema, conditions)?;
    Ok(builder.finish())
}

pub fn delete(schema: &TableSchema, conditions: &[Condition]) -> Result<Statement, PersistenceError> {
    if conditions.is_empty() {
        return Err(PersistenceError::malformed("delete without conditions"));
    }
    let mut builder = Builder::new(format!("DELETE FROM {}", quote_ident(schema.name())));
    builder.where_clause(schema, conditions)?;
    Ok(builder.finish())
}

fn default_literal(field: &FieldDef, raw: &str) -> String {
    match (field.kind, raw) {
        (FieldKind::Timestamp, "now") => "CURRENT_TIMESTAMP".to_string(),
        (FieldKind::Text, _) => format!("'{}'", raw.replace('\'', "''")),
        (FieldKind::Bool, _) => raw.to_ascii_uppercase(),
        _ => raw.to_string(),
    }
}

/// `CREATE TABLE IF NOT EXISTS` plus an `updated_at` trigger when a field is
/// flagged auto-update. The result is a multi-statement script.
pub fn create_table(schema: &TableSchema) -> Result<String, PersistenceError> {
    if schema.fields().is_empty() {
        return Err(PersistenceError::NoColumns(schema.name().to_string()));
    }

    let table = quote_ident(schema.name());
    let mut lines = Vec::new();
    let mut foreign_keys = Vec::new();

    for field in schema.fields() {
        let mut line = format!("    {} ", quote_ident(field.column));
        if field.primary_key && field.serial {
            line.push_str("BIGSERIAL PRIMARY KEY");
        } else {
            line.push_str(field.kind.sql_type());
            if field.primary_key {
                line.push_str(" PRIMARY KEY");
            }
            if field.not_null && !field.primary_key {
                line.push_str(" NOT NULL");
            }
            if field.unique {
                line.push_str(" UNIQUE");
            }
            if let Some(default) = field.default {
                let _ = write!(line, " DEFAULT {}", default_literal(field, default));
            }
        }
        lines.push(line);

        if let Some((ref_table, ref_column)) = field.references {
            foreign_keys.push(format!(
                "    FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_ident(field.column),
                quote_ident(ref_table),
                quote_ident(ref_column)
            ));
        }
    }
    lines.extend(foreign_keys);

    let mut script = format!("CREATE TABLE IF NOT EXISTS {table} (\n{}\n);\n", lines.join(",\n"));

    if schema.fields().iter().any(|f| f.auto_update && f.is_timestamp(UPDATED_AT)) {
        let trigger = quote_ident(&format!("set_{}_updated_at", schema.name()));
        let _ = write!(
            script,
            "CREATE OR REPLACE FUNCTION authgate_set_updated_at() RETURNS TRIGGER AS $$\n\
             BEGIN\n    NEW.updated_at = NOW();\n    RETURN NEW;\nEND;\n$$ LANGUAGE plpgsql;\n\
             DROP TRIGGER IF EXISTS {trigger} ON {table};\n\
             CREATE TRIGGER {trigger} BEFORE UPDATE ON {table} \
             FOR EACH ROW EXECUTE FUNCTION authgate_set_updated_at();\n"
        );
    }

    Ok(script)
}
