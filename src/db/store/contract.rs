//! Behaviour every [`Store`] must share. The memory backend runs these
//! checks below; the Postgres backend runs them when a database is available.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::Store;
use crate::db::error::PersistenceError;
use crate::db::persistence::filter::{Condition, FilterOp, OrderBy, Query};
use crate::db::persistence::record::{FieldDef, FieldKind, Record, TableSchema};
use crate::db::persistence::value::{Row, Value};
use crate::db::persistence::{PageRequest, Persistence};

#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

static WIDGET_FIELDS: &[FieldDef] = &[
    FieldDef::new("id", FieldKind::BigInt).primary_key(),
    FieldDef::new("sku", FieldKind::Text).not_null().unique(),
    FieldDef::new("name", FieldKind::Text).not_null(),
    FieldDef::new("quantity", FieldKind::BigInt).not_null().default_value("0"),
    FieldDef::new("created_at", FieldKind::Timestamp).not_null().default_value("now"),
    FieldDef::new("updated_at", FieldKind::Timestamp).not_null().default_value("now").auto_update(),
];

static WIDGET_SCHEMA: LazyLock<TableSchema> =
    LazyLock::new(|| TableSchema::new("Widget", None, WIDGET_FIELDS));

impl Widget {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, quantity: i64) -> Self {
        Self {
            id: 0,
            sku: sku.into(),
            name: name.into(),
            quantity,
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }
}

impl Record for Widget {
    fn schema() -> &'static TableSchema {
        &WIDGET_SCHEMA
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("sku", self.sku.as_str())
            .with("name", self.name.as_str())
            .with("quantity", self.quantity)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_row(row: &Row) -> Result<Self, PersistenceError> {
        Ok(Self {
            id: row.get("id")?,
            sku: row.get("sku")?,
            name: row.get("name")?,
            quantity: row.get("quantity")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Soft-deletable record with an explicit table name.
#[derive(Debug, Clone, PartialEq)]
pub struct Gadget {
    pub id: i64,
    pub label: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

static GADGET_FIELDS: &[FieldDef] = &[
    FieldDef::new("id", FieldKind::BigInt).primary_key(),
    FieldDef::new("label", FieldKind::Text).not_null(),
    FieldDef::new("deleted_at", FieldKind::Timestamp),
];

static GADGET_SCHEMA: LazyLock<TableSchema> =
    LazyLock::new(|| TableSchema::new("Gadget", Some("gadget_bin"), GADGET_FIELDS));

impl Record for Gadget {
    fn schema() -> &'static TableSchema {
        &GADGET_SCHEMA
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("label", self.label.as_str())
            .with("deleted_at", self.deleted_at)
    }

    fn from_row(row: &Row) -> Result<Self, PersistenceError> {
        Ok(Self {
            id: row.get("id")?,
            label: row.get("label")?,
            deleted_at: row.get("deleted_at")?,
        })
    }
}

/// Child rows referencing widgets.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetPart {
    pub id: i64,
    pub widget_id: i64,
}

static PART_FIELDS: &[FieldDef] = &[
    FieldDef::new("id", FieldKind::BigInt).primary_key(),
    FieldDef::new("widget_id", FieldKind::BigInt).not_null().references("widgets", "id"),
];

static PART_SCHEMA: LazyLock<TableSchema> =
    LazyLock::new(|| TableSchema::new("WidgetPart", None, PART_FIELDS));

impl Record for WidgetPart {
    fn schema() -> &'static TableSchema {
        &PART_SCHEMA
    }

    fn to_row(&self) -> Row {
        Row::new().with("id", self.id).with("widget_id", self.widget_id)
    }

    fn from_row(row: &Row) -> Result<Self, PersistenceError> {
        Ok(Self {
            id: row.get("id")?,
            widget_id: row.get("widget_id")?,
        })
    }
}

pub fn schemas() -> Vec<&'static TableSchema> {
    vec![Widget::schema(), Gadget::schema(), WidgetPart::schema()]
}

/// Unique marker so the checks can share a long-lived database.
fn tag() -> String {
    Uuid::new_v4().simple().to_string()
}

fn tagged(tag: &str) -> Condition {
    Condition::new("name", FilterOp::Like, tag)
}

pub fn insert_assigns_key_and_timestamps(store: &dyn Store) {
    let db = Persistence::new(store);
    let t = tag();
    let before = Utc::now() - Duration::seconds(1);

    let mut widget = Widget::new(format!("sku-{t}"), format!("bolt {t}"), 3);
    db.insert(&mut widget).unwrap();

    assert!(widget.id > 0);
    assert!(widget.created_at >= before);
    assert_eq!(widget.created_at, widget.updated_at);

    let found: Widget = db.find_by_id(widget.id).unwrap();
    assert_eq!(found.sku, widget.sku);
    assert_eq!(found.quantity, 3);
    assert_eq!(found.created_at.timestamp_micros(), widget.created_at.timestamp_micros());

    let mut second = Widget::new(format!("sku2-{t}"), format!("nut {t}"), 1);
    db.insert(&mut second).unwrap();
    assert_ne!(second.id, widget.id);
}

pub fn find_one_by_fields_is_conjunctive(store: &dyn Store) {
    let db = Persistence::new(store);
    let t = tag();
    let mut widget = Widget::new(format!("sku-{t}"), format!("gear {t}"), 7);
    db.insert(&mut widget).unwrap();

    let found: Widget = db
        .find_one_by_fields(&[("name", Value::from(format!("gear {t}"))), ("quantity", Value::Int(7))])
        .unwrap();
    assert_eq!(found.id, widget.id);

    let miss = db.find_one_by_fields::<Widget>(&[
        ("name", Value::from(format!("gear {t}"))),
        ("quantity", Value::Int(8)),
    ]);
    assert!(matches!(miss, Err(PersistenceError::NotFound(_))));

    let empty = db.find_one_by_fields::<Widget>(&[]);
    assert!(matches!(empty, Err(PersistenceError::MalformedQuery(_))));

    let unknown = db.find_one_by_fields::<Widget>(&[("colour", Value::from("red"))]);
    assert!(matches!(unknown, Err(PersistenceError::MalformedQuery(_))));
}

pub fn unique_constraint_rejects_duplicates(store: &dyn Store) {
    let db = Persistence::new(store);
    let t = tag();
    db.insert(&mut Widget::new(format!("sku-{t}"), format!("a {t}"), 1)).unwrap();

    let err = db
        .insert(&mut Widget::new(format!("sku-{t}"), format!("b {t}"), 1))
        .unwrap_err();

    assert!(err.is_unique_violation_on("sku"), "unexpected error: {err:?}");
    assert_eq!(db.count_where::<Widget>(vec![tagged(&t)]).unwrap(), 1);
}

pub fn foreign_keys_are_enforced(store: &dyn Store) {
    let db = Persistence::new(store);
    let t = tag();
    let mut widget = Widget::new(format!("sku-{t}"), format!("frame {t}"), 1);
    db.insert(&mut widget).unwrap();

    let mut part = WidgetPart { id: 0, widget_id: widget.id };
    db.insert(&mut part).unwrap();
    assert!(part.id > 0);

    let err = db
        .insert(&mut WidgetPart { id: 0, widget_id: i64::MAX })
        .unwrap_err();
    assert!(matches!(err, PersistenceError::ForeignKeyViolation(_)), "unexpected error: {err:?}");
}

pub fn updates_rewrite_and_report_matches(store: &dyn Store) {
    let db = Persistence::new(store);
    let t = tag();
    let mut widget = Widget::new(format!("sku-{t}"), format!("spring {t}"), 0);
    db.insert(&mut widget).unwrap();
    let inserted_at = widget.updated_at;

    widget.quantity = 10;
    widget.name = format!("coil {t}");
    let id = widget.id;
    db.update_by_id(&mut widget, id).unwrap();
    assert!(widget.updated_at >= inserted_at);

    let stored: Widget = db.find_by_id(id).unwrap();
    assert_eq!(stored.quantity, 10);
    assert_eq!(stored.name, format!("coil {t}"));

    let missing = db.update_by_id(&mut widget.clone(), i64::MAX);
    assert!(matches!(missing, Err(PersistenceError::NotFound(_))));

    let affected = db
        .update_partial_by_id::<Widget>(Row::new().with("quantity", 11_i64), id)
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(db.find_by_id::<Widget>(id).unwrap().quantity, 11);

    // conditional update: only the first flip matches
    let flip = || {
        db.update_where::<Widget>(
            Row::new().with("quantity", 0_i64),
            vec![Condition::eq("id", id), Condition::new("quantity", FilterOp::GreaterThan, 0_i64)],
        )
        .unwrap()
    };
    assert_eq!(flip(), 1);
    assert_eq!(flip(), 0);

    let bad = db.update_partial_by_id::<Widget>(Row::new().with("colour", "red"), id);
    assert!(matches!(bad, Err(PersistenceError::MalformedQuery(_))));
}

pub fn delete_is_hard_without_deleted_at(store: &dyn Store) {
    let db = Persistence::new(store);
    let t = tag();
    let mut widget = Widget::new(format!("sku-{t}"), format!("pin {t}"), 1);
    db.insert(&mut widget).unwrap();

    db.delete_by_id::<Widget>(widget.id).unwrap();

    assert!(db.find_by_id::<Widget>(widget.id).unwrap_err().is_not_found());
    assert!(db.delete_by_id::<Widget>(widget.id).unwrap_err().is_not_found());
    let raw = store
        .select(Widget::schema(), &Query::filter(vec![Condition::eq("id", widget.id)]))
        .unwrap();
    assert!(raw.is_empty());
}

pub fn delete_is_soft_with_deleted_at(store: &dyn Store) {
    let db = Persistence::new(store);
    let mut gadget = Gadget {
        id: 0,
        label: format!("lamp {}", tag()),
        deleted_at: None,
    };
    db.insert(&mut gadget).unwrap();

    db.delete_by_id::<Gadget>(gadget.id).unwrap();

    assert!(db.find_by_id::<Gadget>(gadget.id).unwrap_err().is_not_found());
    assert!(db.delete_by_id::<Gadget>(gadget.id).unwrap_err().is_not_found());
    assert_eq!(
        db.count_where::<Gadget>(vec![Condition::eq("id", gadget.id)]).unwrap(),
        0
    );

    let raw = store
        .select(Gadget::schema(), &Query::filter(vec![Condition::eq("id", gadget.id)]))
        .unwrap();
    assert_eq!(raw.len(), 1);
    let kept = Gadget::from_row(&raw[0]).unwrap();
    assert!(kept.deleted_at.is_some());
}

pub fn filters_order_and_paginate(store: &dyn Store) {
    let db = Persistence::new(store);
    let t = tag();
    for quantity in 1..=5 {
        db.insert(&mut Widget::new(format!("sku-{quantity}-{t}"), format!("cog {t}"), quantity))
            .unwrap();
    }

    assert_eq!(db.count_where::<Widget>(vec![tagged(&t)]).unwrap(), 5);

    let page = db
        .find_all_paginated::<Widget>(PageRequest {
            conditions: vec![
                tagged(&t),
                Condition::new("quantity", FilterOp::GreaterThanOrEqual, "2"),
            ],
            order_by: vec![OrderBy::desc("quantity")],
            limit: 2,
            offset: 1,
        })
        .unwrap();
    assert_eq!(page.total, 4);
    let quantities: Vec<i64> = page.items.iter().map(|w| w.quantity).collect();
    assert_eq!(quantities, vec![4, 3]);

    let picked: Vec<Widget> = db
        .find_all(Query {
            conditions: vec![
                tagged(&t),
                Condition::list("quantity", FilterOp::In, vec![Value::Int(1), Value::Int(5)]),
            ],
            order_by: vec![OrderBy::asc("quantity")],
            ..Query::default()
        })
        .unwrap();
    assert_eq!(picked.iter().map(|w| w.quantity).collect::<Vec<_>>(), vec![1, 5]);

    let rest = db
        .count_where::<Widget>(vec![
            tagged(&t),
            Condition::list("quantity", FilterOp::NotIn, vec![Value::Int(1), Value::Int(5)]),
            Condition::new("name", FilterOp::ILike, "COG"),
            Condition::new("quantity", FilterOp::LessThan, 5_i64),
        ])
        .unwrap();
    assert_eq!(rest, 3);

    let empty_in = db
        .count_where::<Widget>(vec![tagged(&t), Condition::list("quantity", FilterOp::In, vec![])])
        .unwrap();
    assert_eq!(empty_in, 0);
}

pub fn transactions_commit_or_roll_back(store: &dyn Store) {
    let db = Persistence::new(store);
    let t = tag();

    let failed: Result<(), PersistenceError> = db.transaction(|tx| {
        tx.insert(&mut Widget::new(format!("sku-a-{t}"), format!("tx {t}"), 1))?;
        Err(PersistenceError::malformed("abort"))
    });
    assert!(matches!(failed, Err(PersistenceError::MalformedQuery(_))));
    assert_eq!(db.count_where::<Widget>(vec![tagged(&t)]).unwrap(), 0);

    let id = db
        .transaction(|tx| {
            let mut widget = Widget::new(format!("sku-b-{t}"), format!("tx {t}"), 1);
            tx.insert(&mut widget)?;

            // the inner failure only undoes the inner write
            let inner: Result<(), PersistenceError> = tx.transaction(|inner| {
                inner.insert(&mut Widget::new(format!("sku-c-{t}"), format!("tx {t}"), 1))?;
                Err(PersistenceError::malformed("inner abort"))
            });
            assert!(inner.is_err());

            Ok::<_, PersistenceError>(widget.id)
        })
        .unwrap();

    assert_eq!(db.count_where::<Widget>(vec![tagged(&t)]).unwrap(), 1);
    assert_eq!(db.find_by_id::<Widget>(id).unwrap().sku, format!("sku-b-{t}"));
}

/// Runs every check against `store` after `prepare` has set up the tables.
pub fn run_all(store: &dyn Store, prepare: &dyn Fn(&[&TableSchema]) -> Result<(), PersistenceError>) {
    prepare(&schemas()).unwrap();

    insert_assigns_key_and_timestamps(store);
    find_one_by_fields_is_conjunctive(store);
    unique_constraint_rejects_duplicates(store);
    foreign_keys_are_enforced(store);
    updates_rewrite_and_report_matches(store);
    delete_is_hard_without_deleted_at(store);
    delete_is_soft_with_deleted_at(store);
    filters_order_and_paginate(store);
    transactions_commit_or_roll_back(store);
}

#[cfg(test)]
mod memory {
    use super::*;
    use crate::db::store::MemoryStore;

    #[test]
    fn insert_assigns_key_and_timestamps_in_memory() {
        insert_assigns_key_and_timestamps(&MemoryStore::new());
    }

    #[test]
    fn find_one_by_fields_in_memory() {
        find_one_by_fields_is_conjunctive(&MemoryStore::new());
    }

    #[test]
    fn unique_constraint_in_memory() {
        unique_constraint_rejects_duplicates(&MemoryStore::new());
    }

    #[test]
    fn foreign_keys_in_memory() {
        foreign_keys_are_enforced(&MemoryStore::new());
    }

    #[test]
    fn updates_in_memory() {
        updates_rewrite_and_report_matches(&MemoryStore::new());
    }

    #[test]
    fn hard_delete_in_memory() {
        delete_is_hard_without_deleted_at(&MemoryStore::new());
    }

    #[test]
    fn soft_delete_in_memory() {
        delete_is_soft_with_deleted_at(&MemoryStore::new());
    }

    #[test]
    fn filters_and_pagination_in_memory() {
        filters_order_and_paginate(&MemoryStore::new());
    }

    #[test]
    fn transactions_in_memory() {
        transactions_commit_or_roll_back(&MemoryStore::new());
    }

    #[test]
    fn whole_suite_shares_one_memory_store() {
        let store = MemoryStore::new();
        run_all(&store, &|_| Ok(()));
    }
}
