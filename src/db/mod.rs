pub mod connection;
pub mod error;
pub mod models;
pub mod persistence;
pub mod repositories;
pub mod store;

use std::sync::Arc;

use diesel::PgConnection;
use diesel::r2d2::{self, ConnectionManager};

use self::connection::PoolSettings;
use self::error::PersistenceError;
use self::store::{DieselStore, MemoryStore, SharedStore};

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;
pub type DbConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Which store the application runs on.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Postgres(PoolSettings),
    Memory,
}

impl StoreBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory => "memory",
        }
    }
}

/// Opens the configured store once at startup. The Postgres backend
/// creates any missing auth tables before it is handed out.
pub fn open_store(backend: &StoreBackend) -> Result<SharedStore, PersistenceError> {
    match backend {
        StoreBackend::Postgres(settings) => {
            let store = DieselStore::connect(settings)?;
            store.ensure_schema(&models::all_schemas())?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store, data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
