use std::fmt;

use super::record::{FieldKind, TableSchema};
use super::value::Value;
use crate::db::error::PersistenceError;

/// The allow-listed comparison operators of the filter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equals,
    NotEquals,
    Like,
    ILike,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    In,
    NotIn,
}

impl FilterOp {
    /// Parses the operator name used in `field[op]=value` query parameters.
    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "equals" | "eq" => FilterOp::Equals,
            "notEquals" | "ne" => FilterOp::NotEquals,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::ILike,
            "moreThan" | "greaterThan" | "gt" => FilterOp::GreaterThan,
            "lessThan" | "lt" => FilterOp::LessThan,
            "greaterThanOrEqual" | "gte" => FilterOp::GreaterThanOrEqual,
            "lessThanOrEqual" | "lte" => FilterOp::LessThanOrEqual,
            "in" => FilterOp::In,
            "notIn" => FilterOp::NotIn,
            _ => return None,
        };
        Some(op)
    }

    fn takes_list(self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn)
    }

    fn is_pattern(self) -> bool {
        matches!(self, FilterOp::Like | FilterOp::ILike)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Single(Value),
    List(Vec<Value>),
}

/// One conjunct of a WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: FilterOp,
    pub operand: Operand,
}

impl Condition {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            operand: Operand::Single(value.into()),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Equals, value)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::new(column, FilterOp::Equals, Value::Null)
    }

    pub fn list(column: impl Into<String>, op: FilterOp, values: Vec<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            operand: Operand::List(values),
        }
    }

    /// Checks the column exists, the operand shape matches the operator
    /// and coerces values to the column kind.
    pub fn normalize(self, schema: &TableSchema) -> Result<Self, PersistenceError> {
        let field = schema.require(&self.column)?;

        if self.op.is_pattern() && field.kind != FieldKind::Text {
            return Err(PersistenceError::malformed(format!(
                "{:?} requires a text column, `{}` is {:?}",
                self.op, self.column, field.kind
            )));
        }

        let operand = match (self.operand, self.op.takes_list()) {
            (Operand::List(values), true) => Operand::List(
                values
                    .into_iter()
                    .map(|value| value.coerce(field.kind))
                    .collect::<Result<_, _>>()?,
            ),
            (Operand::Single(value), false) => {
                if value.is_null() && !matches!(self.op, FilterOp::Equals | FilterOp::NotEquals) {
                    return Err(PersistenceError::malformed(format!(
                        "{:?} on `{}` cannot compare against null",
                        self.op, self.column
                    )));
                }
                Operand::Single(value.coerce(field.kind)?)
            }
            (_, expects_list) => {
                return Err(PersistenceError::malformed(format!(
                    "{:?} on `{}` expects {}",
                    self.op,
                    self.column,
                    if expects_list { "a list" } else { "a single value" }
                )));
            }
        };

        Ok(Self { operand, ..self })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }

    /// Parses `"column"`, `"column asc"` or `"column desc"`.
    pub fn parse(input: &str) -> Result<Self, PersistenceError> {
        let mut parts = input.split_whitespace();
        let column = parts
            .next()
            .ok_or_else(|| PersistenceError::malformed("empty order clause"))?;
        let direction = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => Direction::Asc,
            Some("desc") => Direction::Desc,
            Some(other) => {
                return Err(PersistenceError::malformed(format!(
                    "unknown sort direction `{other}`"
                )));
            }
        };
        if parts.next().is_some() {
            return Err(PersistenceError::malformed(format!(
                "unexpected trailing input in order clause `{input}`"
            )));
        }
        Ok(Self {
            column: column.to_string(),
            direction,
        })
    }
}

/// Structured select input: conjunctive conditions, ordering and a window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub conditions: Vec<Condition>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Query {
    pub fn filter(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            ..Self::default()
        }
    }

    pub fn normalize(self, schema: &TableSchema) -> Result<Self, PersistenceError> {
        let conditions = normalize_all(schema, self.conditions)?;
        for order in &self.order_by {
            schema.require(&order.column)?;
        }
        Ok(Self { conditions, ..self })
    }
}

pub fn normalize_all(
    schema: &TableSchema,
    conditions: Vec<Condition>,
) -> Result<Vec<Condition>, PersistenceError> {
    conditions
        .into_iter()
        .map(|condition| condition.normalize(schema))
        .collect()
}

/// Builds conditions from `field[op]=value` / `field=value` query pairs.
///
/// Pairs whose key is in `reserved` (paging, sorting) are skipped. Only
/// columns listed in `allowed` may be filtered on.
pub fn parse_params<'a, I>(
    params: I,
    allowed: &[&str],
    reserved: &[&str],
) -> Result<Vec<Condition>, PersistenceError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut conditions = Vec::new();

    for (key, raw) in params {
        if reserved.contains(&key) {
            continue;
        }

        let (column, op) = match key.split_once('[') {
            Some((column, rest)) => {
                let name = rest.strip_suffix(']').ok_or_else(|| {
                    PersistenceError::malformed(format!("malformed filter key `{key}`"))
                })?;
                let op = FilterOp::parse(name).ok_or_else(|| {
                    PersistenceError::malformed(format!("unsupported filter operator `{name}`"))
                })?;
                (column, op)
            }
            None => (key, FilterOp::Equals),
        };

        if !allowed.contains(&column) {
            return Err(PersistenceError::malformed(format!(
                "filtering on `{column}` is not allowed"
            )));
        }

        let condition = if op.takes_list() {
            let values = raw
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(Value::from)
                .collect();
            Condition::list(column, op, values)
        } else {
            Condition::new(column, op, raw)
        };
        conditions.push(condition);
    }

    Ok(conditions)
}
