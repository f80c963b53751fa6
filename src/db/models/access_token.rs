use std::sync::LazyLock;

use chrono::{DateTime, Utc};

use crate::db::error::PersistenceError;
use crate::db::persistence::record::{FieldDef, FieldKind, Record, TableSchema};
use crate::db::persistence::value::Row;

/// One issued access token. `revoked` only ever goes from false to true.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

static FIELDS: &[FieldDef] = &[
    FieldDef::new("id", FieldKind::BigInt).primary_key(),
    FieldDef::new("user_id", FieldKind::BigInt).not_null().references("users", "id"),
    FieldDef::new("token", FieldKind::Text).not_null().unique(),
    FieldDef::new("expires_at", FieldKind::Timestamp).not_null(),
    FieldDef::new("revoked", FieldKind::Bool).not_null().default_value("false"),
    FieldDef::new("created_at", FieldKind::Timestamp).not_null().default_value("now"),
    FieldDef::new("updated_at", FieldKind::Timestamp).not_null().default_value("now").auto_update(),
];

static SCHEMA: LazyLock<TableSchema> =
    LazyLock::new(|| TableSchema::new("AccessToken", None, FIELDS));

impl AccessToken {
    pub fn new(user_id: i64, token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            user_id,
            token,
            expires_at,
            revoked: false,
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }
}

impl Record for AccessToken {
    fn schema() -> &'static TableSchema {
        &SCHEMA
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("user_id", self.user_id)
            .with("token", self.token.as_str())
            .with("expires_at", self.expires_at)
            .with("revoked", self.revoked)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_row(row: &Row) -> Result<Self, PersistenceError> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            token: row.get("token")?,
            expires_at: row.get("expires_at")?,
            revoked: row.get("revoked")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
