use chrono::{DateTime, Utc};
use schemata_common::Result;
use serde::{Deserialize, Serialize};

/// A persisted fact that a migration file committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigrationRecord {
    /// The migration's file name, byte for byte.
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// The database operations a migration run needs.
///
/// Every method reports failures as `Error::Database`; the applier decides
/// which stage of the run they belong to. `table` is always a validated
/// identifier, and the run lock lives in `<table>_lock`.
pub trait MigrationConnection {
    /// Create the bookkeeping and lock tables if they do not exist.
    fn bootstrap(&mut self, table: &str) -> Result<()>;

    /// All recorded migrations, in the order they were applied.
    fn applied(&mut self, table: &str) -> Result<Vec<AppliedMigrationRecord>>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Whether a transaction opened by `begin` is still open.
    fn in_transaction(&self) -> bool;

    /// Run arbitrary SQL text, which may hold several statements.
    fn execute_script(&mut self, sql: &str) -> Result<()>;

    /// Insert one bookkeeping row for `name`.
    fn record(&mut self, table: &str, name: &str) -> Result<()>;

    /// Take the single-run lock. Fails with `Error::Locked` if it is held.
    fn acquire_lock(&mut self, table: &str, holder: &str) -> Result<()>;

    fn release_lock(&mut self, table: &str) -> Result<()>;

    /// Clear the lock regardless of holder; returns whether one was held.
    fn force_unlock(&mut self, table: &str) -> Result<bool>;

    /// Health probe; returns the database's notion of the current time.
    fn ping(&mut self) -> Result<String>;
}

/// Parse the timestamps SQLite's `datetime('now')` produces, or RFC 3339.
pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .ok()
        })
}
