//! SQLite target store implementation.

use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Connection lock poisoned")]
    Poisoned,
    #[error("Not found")]
    NotFound,
}

/// Persistence of target definitions, keyed by URL.
pub trait TargetStore: Send + Sync {
    /// All targets in insertion order.
    fn get_targets(&self) -> Result<Vec<Target>, DbError>;

    fn add_target(&self, target: &Target) -> Result<(), DbError>;

    /// Overwrite the record currently stored under `original_url`.
    fn update_target(&self, original_url: &str, target: &Target) -> Result<(), DbError>;

    fn delete_target(&self, url: &str) -> Result<(), DbError>;
}

const SELECT_TARGETS: &str = "SELECT name, url, position, interval_seconds, timeout_seconds, grp, tags, enabled FROM targets";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Create a store backed by an in-memory database.
    pub fn in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Get a target by URL.
    pub fn get_target(&self, url: &str) -> Result<Target, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE url = ?1", SELECT_TARGETS))?;
        let mut rows = stmt.query_map(params![url], read_row)?;

        match rows.next() {
            Some(row) => decode(row?),
            None => Err(DbError::NotFound),
        }
    }
}

impl TargetStore for Store {
    fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id ASC", SELECT_TARGETS))?;

        let rows = stmt
            .query_map([], read_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter().map(decode).collect()
    }

    fn add_target(&self, target: &Target) -> Result<(), DbError> {
        let tags = serde_json::to_string(&target.tags)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO targets (name, url, position, interval_seconds, timeout_seconds, grp, tags, enabled) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                target.name,
                target.url,
                target.order,
                target.interval_seconds,
                target.timeout_seconds,
                target.group,
                tags,
                target.enabled,
            ],
        )?;
        Ok(())
    }

    fn update_target(&self, original_url: &str, target: &Target) -> Result<(), DbError> {
        let tags = serde_json::to_string(&target.tags)?;

        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE targets SET name=?1, url=?2, position=?3, interval_seconds=?4, timeout_seconds=?5, grp=?6, tags=?7, enabled=?8 WHERE url=?9",
            params![
                target.name,
                target.url,
                target.order,
                target.interval_seconds,
                target.timeout_seconds,
                target.group,
                tags,
                target.enabled,
                original_url,
            ],
        )?;

        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    fn delete_target(&self, url: &str) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM targets WHERE url = ?1", params![url])?;
        Ok(())
    }
}

type TargetRow = (String, String, i64, i64, i64, String, String, bool);

fn read_row(row: &Row<'_>) -> SqlResult<TargetRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn decode(row: TargetRow) -> Result<Target, DbError> {
    let (name, url, order, interval_seconds, timeout_seconds, group, tags, enabled) = row;
    Ok(Target {
        name,
        url,
        order,
        interval_seconds,
        timeout_seconds,
        group,
        tags: serde_json::from_str(&tags)?,
        enabled,
    })
}
