pub mod collections;
pub mod duplicates;
pub mod fingerprints;
pub mod grants;
pub mod images;
pub mod labels;
pub mod principals;
pub mod schema;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::domain::BankStats;
use crate::error::Result;

/// SQLite-backed store for principals, collections, labels, images and their
/// fingerprints. One `Catalog` wraps one connection.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open or create a catalog at the given path with WAL mode.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::initialize(&conn)?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory catalog (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::initialize(&conn)?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a write transaction. `IMMEDIATE` takes the write lock up front so
    /// lookups made inside the transaction cannot be invalidated by another
    /// writer before commit. Dropping the transaction rolls it back.
    pub fn write(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    pub fn stats(&self) -> Result<BankStats> {
        let stats = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM principals),
                (SELECT COUNT(*) FROM collections),
                (SELECT COUNT(*) FROM images),
                (SELECT COUNT(*) FROM duplicate_links),
                (SELECT COUNT(*) FROM labels)",
            [],
            |row| {
                Ok(BankStats {
                    principals: row.get::<_, i64>(0)? as usize,
                    collections: row.get::<_, i64>(1)? as usize,
                    images: row.get::<_, i64>(2)? as usize,
                    duplicates: row.get::<_, i64>(3)? as usize,
                    labels: row.get::<_, i64>(4)? as usize,
                })
            },
        )?;
        Ok(stats)
    }
}

/// Current time as stored in the catalog (microseconds since the epoch).
pub(crate) fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod test_support {
    use rusqlite::Connection;
    use uuid::Uuid;

    use super::*;

    pub fn catalog() -> Catalog {
        Catalog::open_in_memory().unwrap()
    }

    /// Insert a bare principal row (no default collection).
    pub fn principal(conn: &Connection, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        principals::insert(conn, id, username, "Test User", "hash", now_micros()).unwrap();
        id
    }

    pub fn collection(conn: &Connection, owner: Uuid, name: &str, is_default: bool) -> Uuid {
        let id = Uuid::new_v4();
        collections::insert(conn, id, owner, name, is_default, now_micros()).unwrap();
        id
    }
}
