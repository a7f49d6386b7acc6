use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};

use crate::error::CatalogError;

#[cfg(not(feature = "mysql"))]
pub(crate) type DbConnection = SqliteConnection;
#[cfg(feature = "mysql")]
pub(crate) type DbConnection = MysqlConnection;

pub(crate) type DbPool = r2d2::Pool<ConnectionManager<DbConnection>>;

#[cfg(not(feature = "mysql"))]
const SCHEMA: &str = include_str!("../sql/sqlite.sql");
#[cfg(feature = "mysql")]
const SCHEMA: &str = include_str!("../sql/mysql.sql");

pub(crate) const BACKEND: &str = if cfg!(feature = "mysql") {
    "mysql"
} else {
    "sqlite"
};

mod functions {
    #[cfg(not(feature = "mysql"))]
    no_arg_sql_function!(
        last_insert_rowid,
        diesel::sql_types::BigInt,
        "id assigned by the last insert on this connection"
    );

    #[cfg(feature = "mysql")]
    no_arg_sql_function!(
        last_insert_id,
        diesel::sql_types::Unsigned<diesel::sql_types::BigInt>,
        "id assigned by the last insert on this connection"
    );
}

/// Id generated by the most recent insert on `conn`. Must run inside the same
/// transaction as the insert.
#[cfg(not(feature = "mysql"))]
pub(crate) fn last_insert_id(conn: &DbConnection) -> QueryResult<i64> {
    diesel::select(functions::last_insert_rowid).get_result::<i64>(conn)
}

#[cfg(feature = "mysql")]
pub(crate) fn last_insert_id(conn: &DbConnection) -> QueryResult<i64> {
    let id = diesel::select(functions::last_insert_id).get_result::<u64>(conn)?;
    Ok(id as i64)
}

/// Runs `f` as one write transaction. On SQLite the write lock is taken at
/// `BEGIN IMMEDIATE`, so a concurrent writer waits on `busy_timeout` instead of
/// failing when it upgrades a read lock mid-transaction.
#[cfg(not(feature = "mysql"))]
pub(crate) fn write_transaction<T, F>(conn: &DbConnection, f: F) -> Result<T, CatalogError>
where
    F: FnOnce() -> Result<T, CatalogError>,
{
    conn.immediate_transaction(f)
}

#[cfg(feature = "mysql")]
pub(crate) fn write_transaction<T, F>(conn: &DbConnection, f: F) -> Result<T, CatalogError>
where
    F: FnOnce() -> Result<T, CatalogError>,
{
    conn.transaction(f)
}

/// Creates the catalog tables when they do not exist yet.
pub(crate) fn init_schema(conn: &DbConnection) -> Result<(), CatalogError> {
    conn.batch_execute(SCHEMA)?;
    Ok(())
}

#[cfg(not(feature = "mysql"))]
#[derive(Debug)]
struct SqlitePragmas;

#[cfg(not(feature = "mysql"))]
impl r2d2::CustomizeConnection<SqliteConnection, r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute(
            "PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;",
        )
            .map_err(r2d2::Error::QueryError)
    }
}

pub(crate) fn build_pool(database_url: &str, max_size: u32) -> Result<DbPool, CatalogError> {
    let manager = ConnectionManager::<DbConnection>::new(database_url);
    let mut builder = r2d2::Pool::builder().max_size(max_size);

    #[cfg(not(feature = "mysql"))]
    {
        builder = builder.connection_customizer(Box::new(SqlitePragmas));
        if database_url == ":memory:" {
            // every connection to :memory: is its own database, so keep exactly one alive
            builder = builder
                .max_size(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
    }
    #[cfg(feature = "mysql")]
    {
        builder = builder.connection_timeout(Duration::from_secs(10));
    }

    let pool = builder.build(manager)?;
    let conn = pool.get()?;
    init_schema(&conn)?;
    drop(conn);
    log::info!("{} catalog store ready at {}", BACKEND, database_url);
    Ok(pool)
}

/// Liveness check used by the health endpoint.
pub(crate) fn ping(pool: &DbPool) -> bool {
    match pool.get_timeout(Duration::from_secs(2)) {
        Ok(conn) => conn.batch_execute("SELECT 1").is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
pub(crate) fn test_connection() -> DbConnection {
    let conn = DbConnection::establish(":memory:").unwrap();
    conn.batch_execute("PRAGMA foreign_keys = ON;").unwrap();
    init_schema(&conn).unwrap();
    conn
}
