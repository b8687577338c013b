use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    ops::Deref,
    path::Path,
};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions},
    Column, Row,
};
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};

use super::entities::{is_builtin, is_valid_key, RESERVED_KEY};

const TABLE: &str = "stats";
/// The application tracks exactly one person.
pub const DEFAULT_USER: &str = "default_user";

/// Interface for the persistent counter record. Every counter key is a field of a single record
/// holding an integer count.
pub trait CounterStore {
    /// Adds every missing field with a count of 0. Existing fields are left untouched.
    fn ensure_schema(&self, keys: &[String]) -> impl Future<Output = Result<()>>;

    /// Removes the field of a user defined counter. Missing fields are ignored.
    fn drop_field(&self, key: &str) -> impl Future<Output = Result<()>>;

    /// Adds 1 to a field, creating the field first if it's missing.
    fn increment(&self, key: &str) -> impl Future<Output = Result<i64>>;

    /// Sets every field back to 0.
    fn reset(&self) -> impl Future<Output = Result<()>>;

    /// Returns every known field with its current count.
    fn read_all(&self) -> impl Future<Output = Result<BTreeMap<String, i64>>>;
}

impl<T: Deref> CounterStore for T
where
    T::Target: CounterStore,
{
    fn ensure_schema(&self, keys: &[String]) -> impl Future<Output = Result<()>> {
        self.deref().ensure_schema(keys)
    }

    fn drop_field(&self, key: &str) -> impl Future<Output = Result<()>> {
        self.deref().drop_field(key)
    }

    fn increment(&self, key: &str) -> impl Future<Output = Result<i64>> {
        self.deref().increment(key)
    }

    fn reset(&self) -> impl Future<Output = Result<()>> {
        self.deref().reset()
    }

    fn read_all(&self) -> impl Future<Output = Result<BTreeMap<String, i64>>> {
        self.deref().read_all()
    }
}

/// [CounterStore] backed by a single row SQLite table where each counter is a column.
pub struct SqliteCounterStore {
    pool: SqlitePool,
    user_id: String,
}

impl SqliteCounterStore {
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Opening counter database {db_path:?}");
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Columns come and go with counter definitions, so cached statements would describe rows
        // that no longer exist.
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .statement_cache_capacity(0);

        // One connection serializes every writer, schema changes included.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            user_id: DEFAULT_USER.into(),
        };
        store.initialize_tables().await?;
        Ok(store)
    }

    async fn initialize_tables(&self) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} ({RESERVED_KEY} TEXT PRIMARY KEY)"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "INSERT OR IGNORE INTO {TABLE} ({RESERVED_KEY}) VALUES (?)"
        ))
        .bind(&self.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn columns(conn: &mut SqliteConnection) -> Result<BTreeSet<String>> {
        let names = sqlx::query_scalar::<_, String>(&format!(
            "SELECT name FROM pragma_table_info('{TABLE}')"
        ))
        .fetch_all(&mut *conn)
        .await?;
        Ok(names
            .into_iter()
            .filter(|v| v != RESERVED_KEY)
            .collect())
    }

    async fn add_column(conn: &mut SqliteConnection, key: &str) -> Result<()> {
        let key = checked_key(key)?;
        sqlx::query(&format!(
            "ALTER TABLE {TABLE} ADD COLUMN \"{key}\" INTEGER NOT NULL DEFAULT 0"
        ))
        .execute(&mut *conn)
        .await?;
        info!("Added counter column {key}");
        Ok(())
    }
}

fn checked_key(key: &str) -> Result<&str> {
    if is_valid_key(key) {
        Ok(key)
    } else {
        Err(Error::UnknownCounter(key.into()))
    }
}

impl CounterStore for SqliteCounterStore {
    #[instrument(skip(self))]
    async fn ensure_schema(&self, keys: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let existing = Self::columns(&mut tx).await?;
        for key in keys.iter().filter(|v| !existing.contains(*v)) {
            Self::add_column(&mut tx, key).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn drop_field(&self, key: &str) -> Result<()> {
        if is_builtin(key) {
            return Err(Error::ProtectedDefinition(key.into()));
        }
        let key = checked_key(key)?;

        let mut tx = self.pool.begin().await?;
        if Self::columns(&mut tx).await?.contains(key) {
            sqlx::query(&format!("ALTER TABLE {TABLE} DROP COLUMN \"{key}\""))
                .execute(&mut *tx)
                .await?;
            info!("Dropped counter column {key}");
        } else {
            debug!("Column {key} is already absent");
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn increment(&self, key: &str) -> Result<i64> {
        let key = checked_key(key)?;

        let mut tx = self.pool.begin().await?;
        if !Self::columns(&mut tx).await?.contains(key) {
            warn!("Column {key} is missing, recreating it before incrementing");
            Self::add_column(&mut tx, key).await?;
        }

        sqlx::query(&format!(
            "INSERT OR IGNORE INTO {TABLE} ({RESERVED_KEY}) VALUES (?)"
        ))
        .bind(&self.user_id)
        .execute(&mut *tx)
        .await?;

        let count = sqlx::query_scalar::<_, i64>(&format!(
            "UPDATE {TABLE} SET \"{key}\" = \"{key}\" + 1 WHERE {RESERVED_KEY} = ? RETURNING \"{key}\""
        ))
        .bind(&self.user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Counter {key} is now {count}");
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM {TABLE} WHERE {RESERVED_KEY} = ?"))
            .bind(&self.user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("INSERT INTO {TABLE} ({RESERVED_KEY}) VALUES (?)"))
            .bind(&self.user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!("Reset every counter");
        Ok(())
    }

    async fn read_all(&self) -> Result<BTreeMap<String, i64>> {
        let row = sqlx::query(&format!("SELECT * FROM {TABLE} WHERE {RESERVED_KEY} = ?"))
            .persistent(false)
            .bind(&self.user_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(BTreeMap::new());
        };

        let mut counts = BTreeMap::new();
        for column in row.columns() {
            let name = column.name();
            if name == RESERVED_KEY {
                continue;
            }
            let value = row.try_get::<Option<i64>, _>(name)?;
            counts.insert(name.to_string(), value.unwrap_or(0));
        }
        Ok(counts)
    }
}
