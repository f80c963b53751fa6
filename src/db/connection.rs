use std::time::Duration;

use diesel::PgConnection;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};

use super::DbPool;
use super::error::PersistenceError;

/// Settings for the Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub url: String,
    pub max_size: u32,
    pub connection_timeout: Duration,
    pub statement_timeout: Duration,
}

/// Applies the per-session statement timeout to every new connection, so
/// a slow query is cancelled by the server instead of pinning a connection.
#[derive(Debug, Clone, Copy)]
struct StatementTimeout(Duration);

impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for StatementTimeout {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!("SET statement_timeout = {}", self.0.as_millis()))
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Builds the pool. The store built on top of it is created once at startup
/// and handed to everything that needs the database.
pub fn build_pool(settings: &PoolSettings) -> Result<DbPool, PersistenceError> {
    let manager = ConnectionManager::<PgConnection>::new(&settings.url);

    Pool::builder()
        .max_size(settings.max_size)
        .connection_timeout(settings.connection_timeout)
        .connection_customizer(Box::new(StatementTimeout(settings.statement_timeout)))
        .build(manager)
        .map_err(|e| PersistenceError::Connection(format!("failed to create pool: {e}")))
}

/// Pool for tests that need a real database; `None` when `DATABASE_URL`
/// is not set.
#[cfg(test)]
pub fn test_pool() -> Option<DbPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let settings = PoolSettings {
        url,
        max_size: 4,
        connection_timeout: Duration::from_secs(5),
        statement_timeout: Duration::from_secs(5),
    };
    match build_pool(&settings) {
        Ok(pool) => Some(pool),
        Err(e) => {
            eprintln!("⚠️ DATABASE_URL is set but the pool could not be built: {e}");
            None
        }
    }
}
