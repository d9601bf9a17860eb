use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OpenFlags, params};
use schemata_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::connection::{AppliedMigrationRecord, MigrationConnection, parse_datetime};

/// Where a database URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    Memory,
    File(PathBuf),
}

impl SqliteTarget {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if matches!(url, "sqlite::memory:" | ":memory:") {
            return Ok(Self::Memory);
        }
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        if path.is_empty() {
            return Err(Error::Connection("database url has no path".into()));
        }
        if let Some((scheme, _)) = path.split_once("://") {
            return Err(Error::Connection(format!(
                "unsupported database scheme {scheme:?}; only sqlite is supported"
            )));
        }
        Ok(Self::File(PathBuf::from(path)))
    }
}

/// A single SQLite connection held for the duration of one run.
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    pub fn connect(url: &str, busy_timeout: Duration) -> Result<Self> {
        let conn = match SqliteTarget::parse(url)? {
            SqliteTarget::Memory => Connection::open_in_memory().map_err(|e| {
                Error::Connection(format!("failed to open in-memory database: {e}"))
            })?,
            SqliteTarget::File(path) => open_file(&path)?,
        };

        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::Connection(format!("failed to set busy timeout: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Connection(format!("failed to set pragmas: {e}")))?;

        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", Duration::from_millis(0))
    }

    /// The underlying connection, for inspection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Close explicitly so close-time errors are reported instead of dropped.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| Error::Database(format!("failed to close connection: {e}")))
    }
}

fn open_file(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            return Err(Error::Connection(format!(
                "database directory does not exist: {}",
                parent.display()
            )));
        }
    }
    info!("opening database at {}", path.display());
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Connection::open_with_flags(path, flags).map_err(|e| {
        Error::Connection(format!(
            "failed to open database at {}: {e}",
            path.display()
        ))
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

impl MigrationConnection for SqliteConnection {
    fn bootstrap(&mut self, table: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS {table}_lock (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    holder TEXT NOT NULL,
                    acquired_at TEXT NOT NULL DEFAULT (datetime('now'))
                );"
            ))
            .map_err(|e| Error::Database(format!("failed to create {table}: {e}")))
    }

    fn applied(&mut self, table: &str) -> Result<Vec<AppliedMigrationRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT name, applied_at FROM {table} ORDER BY id ASC"))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| Error::Database(format!("failed to query {table}: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            let (name, applied_at) =
                row.map_err(|e| Error::Database(format!("failed to read {table} row: {e}")))?;
            let applied_at = parse_datetime(&applied_at).ok_or_else(|| {
                Error::Database(format!(
                    "unreadable applied_at {applied_at:?} for migration {name}"
                ))
            })?;
            records.push(AppliedMigrationRecord { name, applied_at });
        }
        Ok(records)
    }

    fn begin(&mut self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))
    }

    fn commit(&mut self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| Error::Database(format!("failed to commit: {e}")))
    }

    fn rollback(&mut self) -> Result<()> {
        // SQLite rolls back by itself on some errors (e.g. SQLITE_FULL).
        if !self.in_transaction() {
            debug!("no open transaction to roll back");
            return Ok(());
        }
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| Error::Database(format!("failed to roll back: {e}")))
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| Error::Database(e.to_string()))
    }

    fn record(&mut self, table: &str, name: &str) -> Result<()> {
        self.conn
            .execute(&format!("INSERT INTO {table} (name) VALUES (?1)"), params![name])
            .map_err(|e| Error::Database(format!("failed to record migration: {e}")))?;
        Ok(())
    }

    fn acquire_lock(&mut self, table: &str, holder: &str) -> Result<()> {
        let inserted = self.conn.execute(
            &format!("INSERT INTO {table}_lock (id, holder) VALUES (1, ?1)"),
            params![holder],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => {
                let holder = self
                    .conn
                    .query_row(
                        &format!(
                            "SELECT holder || ' since ' || acquired_at \
                             FROM {table}_lock WHERE id = 1"
                        ),
                        [],
                        |row| row.get::<_, String>(0),
                    )
                    .unwrap_or_else(|e| {
                        warn!("failed to read lock holder: {e}");
                        "another run".to_string()
                    });
                Err(Error::Locked { holder })
            }
            Err(e) => Err(Error::Database(format!("failed to take run lock: {e}"))),
        }
    }

    fn release_lock(&mut self, table: &str) -> Result<()> {
        self.conn
            .execute(&format!("DELETE FROM {table}_lock WHERE id = 1"), [])
            .map_err(|e| Error::Database(format!("failed to release run lock: {e}")))?;
        Ok(())
    }

    fn force_unlock(&mut self, table: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute(&format!("DELETE FROM {table}_lock"), [])
            .map_err(|e| Error::Database(format!("failed to clear run lock: {e}")))?;
        Ok(removed > 0)
    }

    fn ping(&mut self) -> Result<String> {
        self.conn
            .query_row("SELECT datetime('now')", [], |row| row.get(0))
            .map_err(|e| Error::Database(format!("health check failed: {e}")))
    }
}
