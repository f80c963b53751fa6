use super::value::Row;
use crate::db::error::PersistenceError;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const DELETED_AT: &str = "deleted_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    BigInt,
    Double,
    Bool,
    Text,
    Timestamp,
}

impl FieldKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldKind::BigInt => "BIGINT",
            FieldKind::Double => "DOUBLE PRECISION",
            FieldKind::Bool => "BOOLEAN",
            FieldKind::Text => "TEXT",
            FieldKind::Timestamp => "TIMESTAMPTZ",
        }
    }
}

/// Column descriptor: the mapping name plus its modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub column: &'static str,
    pub kind: FieldKind,
    pub primary_key: bool,
    pub serial: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<&'static str>,
    pub references: Option<(&'static str, &'static str)>,
    pub auto_update: bool,
}

impl FieldDef {
    pub const fn new(column: &'static str, kind: FieldKind) -> Self {
        Self {
            column,
            kind,
            primary_key: false,
            serial: false,
            not_null: false,
            unique: false,
            default: None,
            references: None,
            auto_update: false,
        }
    }

    /// Auto-generated (serial) primary key.
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.serial = true;
        self.not_null = true;
        self
    }

    pub const fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Literal default; `now` on a timestamp means the insertion time.
    pub const fn default_value(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }

    pub const fn references(mut self, table: &'static str, column: &'static str) -> Self {
        self.references = Some((table, column));
        self
    }

    pub const fn auto_update(mut self) -> Self {
        self.auto_update = true;
        self
    }

    pub fn is_timestamp(&self, column: &str) -> bool {
        self.column == column && self.kind == FieldKind::Timestamp
    }
}

/// Static description of a record type, resolved once per type.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    fields: &'static [FieldDef],
}

impl TableSchema {
    /// Uses `table_name` when given, otherwise derives it from `type_name`.
    pub fn new(type_name: &str, table_name: Option<&str>, fields: &'static [FieldDef]) -> Self {
        let name = table_name.map_or_else(|| derive_table_name(type_name), str::to_string);
        Self { name, fields }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &'static [FieldDef] {
        self.fields
    }

    pub fn field(&self, column: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|field| field.column == column)
    }

    pub fn primary_key(&self) -> Option<&'static FieldDef> {
        self.fields.iter().find(|field| field.primary_key)
    }

    /// Columns written by an insert: everything except a generated key.
    pub fn insert_fields(&self) -> impl Iterator<Item = &'static FieldDef> {
        self.fields
            .iter()
            .filter(|field| !(field.primary_key && field.serial))
    }

    /// True when the type declares `column` as a timestamp field.
    pub fn has_timestamp(&self, column: &str) -> bool {
        self.fields.iter().any(|field| field.is_timestamp(column))
    }

    pub fn is_soft_deletable(&self) -> bool {
        self.has_timestamp(DELETED_AT)
    }

    /// Looks up a column, failing for names the type does not declare.
    pub fn require(&self, column: &str) -> Result<&'static FieldDef, PersistenceError> {
        self.field(column).ok_or_else(|| {
            PersistenceError::malformed(format!("unknown column `{column}` on `{}`", self.name))
        })
    }
}

/// A type mapped onto a table through its [`TableSchema`].
pub trait Record: Sized {
    fn schema() -> &'static TableSchema;

    fn to_row(&self) -> Row;

    fn from_row(row: &Row) -> Result<Self, PersistenceError>;
}

/// `AccessToken` -> `access_tokens`, `HTTPRequest` -> `http_requests`.
pub fn derive_table_name(type_name: &str) -> String {
    let mut name = to_snake_case(type_name);
    name.push('s');
    name
}

pub fn to_snake_case(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }

    out
}
