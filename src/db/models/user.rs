use std::sync::LazyLock;

use authgate_api::UserResponse;
use chrono::{DateTime, Utc};

use crate::db::error::PersistenceError;
use crate::db::persistence::record::{FieldDef, FieldKind, Record, TableSchema};
use crate::db::persistence::value::Row;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

static FIELDS: &[FieldDef] = &[
    FieldDef::new("id", FieldKind::BigInt).primary_key(),
    FieldDef::new("email", FieldKind::Text).not_null().unique(),
    FieldDef::new("username", FieldKind::Text).not_null().unique(),
    FieldDef::new("password_hash", FieldKind::Text).not_null(),
    FieldDef::new("created_at", FieldKind::Timestamp).not_null().default_value("now"),
    FieldDef::new("updated_at", FieldKind::Timestamp).not_null().default_value("now").auto_update(),
];

static SCHEMA: LazyLock<TableSchema> = LazyLock::new(|| TableSchema::new("User", None, FIELDS));

impl User {
    /// A user ready for insertion; id and timestamps are set by the insert.
    pub fn new(email: impl Into<String>, username: impl Into<String>, password_hash: String) -> Self {
        Self {
            id: 0,
            email: email.into(),
            username: username.into(),
            password_hash,
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }
}

impl Record for User {
    fn schema() -> &'static TableSchema {
        &SCHEMA
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("email", self.email.as_str())
            .with("username", self.username.as_str())
            .with("password_hash", self.password_hash.as_str())
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_row(row: &Row) -> Result<Self, PersistenceError> {
        Ok(Self {
            id: row.get("id")?,
            email: row.get("email")?,
            username: row.get("username")?,
            password_hash: row.get("password_hash")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            email: user.email,
            username: user.username,
        }
    }
}
