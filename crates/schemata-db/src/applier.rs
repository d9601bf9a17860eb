//! Applying pending migrations.
//!
//! A run connects once, makes sure the bookkeeping table exists, takes the
//! run lock, and then walks the sorted migration files. Each file not yet
//! recorded is executed in its own transaction together with the insert of
//! its bookkeeping row, so a migration is either applied and recorded or
//! neither. The first failure rolls back that file and stops the run.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use schemata_common::{Error, Result};
use schemata_config::MigrateConfig;
use tracing::{debug, info, warn};

use crate::connection::MigrationConnection;
use crate::migrations::{MigrationFile, discover};
use crate::sqlite::SqliteConnection;

const ENDED_TRANSACTION: &str = "migration ended the enclosing transaction";

/// What a successful run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// File names applied by this run, in order.
    pub applied: Vec<String>,
    /// Files found on disk that were already recorded.
    pub skipped: usize,
}

/// Applies migrations through any `MigrationConnection`.
pub struct Migrator {
    table: String,
    holder: String,
}

impl Migrator {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            holder: format!("pid {}", std::process::id()),
        }
    }

    pub fn run<C: MigrationConnection>(&self, conn: &mut C, dir: &Path) -> Result<ApplyReport> {
        conn.bootstrap(&self.table)
            .map_err(|e| Error::Bootstrap(db_message(e)))?;
        debug!("bookkeeping table {} ready", self.table);

        conn.acquire_lock(&self.table, &self.holder)?;
        let result = self.apply_pending(conn, dir);
        if let Err(e) = conn.release_lock(&self.table) {
            warn!("failed to release run lock: {e}");
        }
        result
    }

    fn apply_pending<C: MigrationConnection>(
        &self,
        conn: &mut C,
        dir: &Path,
    ) -> Result<ApplyReport> {
        let applied: HashSet<String> = conn
            .applied(&self.table)?
            .into_iter()
            .map(|record| record.name)
            .collect();
        let files = discover(dir)?;
        info!(
            "{} migration file(s) on disk, {} already applied",
            files.len(),
            applied.len()
        );

        let mut report = ApplyReport::default();
        for file in &files {
            if applied.contains(&file.file_name) {
                report.skipped += 1;
                continue;
            }
            self.apply_one(conn, file)?;
            report.applied.push(file.file_name.clone());
        }
        Ok(report)
    }

    fn apply_one<C: MigrationConnection>(&self, conn: &mut C, file: &MigrationFile) -> Result<()> {
        info!("applying migration: {}", file.file_name);
        let sql = file.read_sql().map_err(|e| Error::Migration {
            file: file.file_name.clone(),
            message: format!("failed to read {}: {e}", file.path.display()),
        })?;

        conn.begin().map_err(|e| migration_error(file, e))?;

        let outcome = conn
            .execute_script(&sql)
            .and_then(|()| {
                // A body with its own COMMIT or ROLLBACK would leave the record in autocommit.
                if conn.in_transaction() {
                    conn.record(&self.table, &file.file_name)
                } else {
                    Err(Error::Database(ENDED_TRANSACTION.into()))
                }
            })
            .and_then(|()| conn.commit());

        if let Err(e) = outcome {
            let mut message = db_message(e);
            if let Err(rollback) = conn.rollback() {
                warn!("rollback of {} failed: {rollback}", file.file_name);
                message = format!("{message} (rollback also failed: {})", db_message(rollback));
            }
            warn!("migration {} failed and was rolled back", file.file_name);
            return Err(Error::Migration {
                file: file.file_name.clone(),
                message,
            });
        }

        info!("applied migration: {}", file.file_name);
        Ok(())
    }
}

fn migration_error(file: &MigrationFile, e: Error) -> Error {
    Error::Migration {
        file: file.file_name.clone(),
        message: db_message(e),
    }
}

/// The bare message of a database error, without the variant prefix.
pub(crate) fn db_message(e: Error) -> String {
    match e {
        Error::Database(message) => message,
        other => other.to_string(),
    }
}

pub(crate) fn open(config: &MigrateConfig) -> Result<SqliteConnection> {
    let url = config.require_database_url()?;
    info!("connecting to database");
    SqliteConnection::connect(url, Duration::from_millis(config.busy_timeout_ms))
}

/// Close the run's connection on every exit path, keeping the run's error first.
pub(crate) fn finish<T>(conn: SqliteConnection, result: Result<T>) -> Result<T> {
    let closed = conn.close();
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close)) => {
            warn!("{close}");
            Err(e)
        }
    }
}

/// Apply every pending migration in `config.migrations_dir`.
pub fn apply(config: &MigrateConfig) -> Result<ApplyReport> {
    config.validate()?;
    let mut conn = open(config)?;
    let result = Migrator::new(&config.table).run(&mut conn, &config.migrations_dir);
    finish(conn, result)
}

/// Remove a run lock left behind by a crashed run.
pub fn unlock(config: &MigrateConfig) -> Result<bool> {
    config.validate()?;
    let mut conn = open(config)?;
    let result = conn
        .bootstrap(&config.table)
        .map_err(|e| Error::Bootstrap(db_message(e)))
        .and_then(|()| conn.force_unlock(&config.table));
    finish(conn, result)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::connection::AppliedMigrationRecord;

    fn write(dir: &Path, name: &str, sql: &str) {
        std::fs::write(dir.join(name), sql).unwrap();
    }

    fn table_exists(conn: &SqliteConnection, name: &str) -> bool {
        conn.connection()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get::<_, i64>(0),
            )
            .unwrap()
            == 1
    }

    fn recorded(conn: &mut SqliteConnection) -> Vec<String> {
        conn.applied("migrations")
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect()
    }

    #[test]
    fn applies_in_lexicographic_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "002-b.sql", "CREATE TABLE b (a_id INTEGER REFERENCES a(id));");
        write(dir.path(), "001-a.sql", "CREATE TABLE a (id INTEGER PRIMARY KEY);");
        write(dir.path(), "003-c.sql", "ALTER TABLE b ADD COLUMN note TEXT;");

        let mut conn = SqliteConnection::in_memory().unwrap();
        let report = Migrator::new("migrations").run(&mut conn, dir.path()).unwrap();

        assert_eq!(report.applied, ["001-a.sql", "002-b.sql", "003-c.sql"]);
        assert_eq!(report.skipped, 0);
        assert_eq!(recorded(&mut conn), report.applied);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001-a.sql", "CREATE TABLE a (id INTEGER);");

        let mut conn = SqliteConnection::in_memory().unwrap();
        let migrator = Migrator::new("migrations");
        migrator.run(&mut conn, dir.path()).unwrap();
        let report = migrator.run(&mut conn, dir.path()).unwrap();

        assert!(report.applied.is_empty());
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn failure_rolls_back_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001-a.sql", "CREATE TABLE a (id INTEGER);");
        write(dir.path(), "002-b.sql", "CREATE TABLE b (id INTEGER); NOT VALID SQL;");
        write(dir.path(), "003-c.sql", "CREATE TABLE c (id INTEGER);");

        let mut conn = SqliteConnection::in_memory().unwrap();
        let err = Migrator::new("migrations")
            .run(&mut conn, dir.path())
            .unwrap_err();

        assert_eq!(err.migration_file(), Some("002-b.sql"));
        assert!(table_exists(&conn, "a"));
        assert!(!table_exists(&conn, "b"));
        assert!(!table_exists(&conn, "c"));
        assert_eq!(recorded(&mut conn), ["001-a.sql"]);
    }

    #[test]
    fn lock_is_released_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001-bad.sql", "SELEKT 1;");

        let mut conn = SqliteConnection::in_memory().unwrap();
        let migrator = Migrator::new("migrations");
        assert!(migrator.run(&mut conn, dir.path()).is_err());
        conn.acquire_lock("migrations", "next run").unwrap();
    }

    #[test]
    fn refuses_to_run_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001-a.sql", "CREATE TABLE a (id INTEGER);");

        let mut conn = SqliteConnection::in_memory().unwrap();
        conn.bootstrap("migrations").unwrap();
        conn.acquire_lock("migrations", "pid 42").unwrap();

        let err = Migrator::new("migrations")
            .run(&mut conn, dir.path())
            .unwrap_err();
        assert!(matches!(err, Error::Locked { .. }));
        assert!(!table_exists(&conn, "a"));
    }

    #[test]
    fn missing_directory_is_reported_after_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = SqliteConnection::in_memory().unwrap();
        let err = Migrator::new("migrations")
            .run(&mut conn, &dir.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(table_exists(&conn, "migrations"));
    }

    /// Delegates to SQLite but can fail the bookkeeping insert or bootstrap.
    struct Faulty {
        inner: SqliteConnection,
        fail_record_for: Option<&'static str>,
        fail_bootstrap: bool,
        executed: Vec<String>,
    }

    impl Faulty {
        fn new() -> Self {
            Self {
                inner: SqliteConnection::in_memory().unwrap(),
                fail_record_for: None,
                fail_bootstrap: false,
                executed: Vec::new(),
            }
        }
    }

    impl MigrationConnection for Faulty {
        fn bootstrap(&mut self, table: &str) -> Result<()> {
            if self.fail_bootstrap {
                return Err(Error::Database("permission denied".into()));
            }
            self.inner.bootstrap(table)
        }
        fn applied(&mut self, table: &str) -> Result<Vec<AppliedMigrationRecord>> {
            self.inner.applied(table)
        }
        fn begin(&mut self) -> Result<()> {
            self.inner.begin()
        }
        fn commit(&mut self) -> Result<()> {
            self.inner.commit()
        }
        fn rollback(&mut self) -> Result<()> {
            self.inner.rollback()
        }
        fn in_transaction(&self) -> bool {
            self.inner.in_transaction()
        }
        fn execute_script(&mut self, sql: &str) -> Result<()> {
            self.executed.push(sql.to_string());
            self.inner.execute_script(sql)
        }
        fn record(&mut self, table: &str, name: &str) -> Result<()> {
            if self.fail_record_for == Some(name) {
                return Err(Error::Database("disk I/O error".into()));
            }
            self.inner.record(table, name)
        }
        fn acquire_lock(&mut self, table: &str, holder: &str) -> Result<()> {
            self.inner.acquire_lock(table, holder)
        }
        fn release_lock(&mut self, table: &str) -> Result<()> {
            self.inner.release_lock(table)
        }
        fn force_unlock(&mut self, table: &str) -> Result<bool> {
            self.inner.force_unlock(table)
        }
        fn ping(&mut self) -> Result<String> {
            self.inner.ping()
        }
    }

    #[test]
    fn failed_record_insert_rolls_back_the_migration() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001-a.sql", "CREATE TABLE a (id INTEGER);");
        write(dir.path(), "002-b.sql", "CREATE TABLE b (id INTEGER);");

        let mut conn = Faulty::new();
        conn.fail_record_for = Some("001-a.sql");
        let err = Migrator::new("migrations")
            .run(&mut conn, dir.path())
            .unwrap_err();

        match err {
            Error::Migration { file, message } => {
                assert_eq!(file, "001-a.sql");
                assert_eq!(message, "disk I/O error");
            }
            other => panic!("expected Migration error, got {other:?}"),
        }
        assert!(!table_exists(&conn.inner, "a"));
        assert_eq!(conn.executed.len(), 1);
    }

    #[test]
    fn body_that_rolls_back_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001-a.sql", "CREATE TABLE a (id INTEGER); ROLLBACK;");

        let mut conn = SqliteConnection::in_memory().unwrap();
        let err = Migrator::new("migrations")
            .run(&mut conn, dir.path())
            .unwrap_err();

        match err {
            Error::Migration { file, message } => {
                assert_eq!(file, "001-a.sql");
                assert_eq!(message, ENDED_TRANSACTION);
            }
            other => panic!("expected Migration error, got {other:?}"),
        }
        assert!(recorded(&mut conn).is_empty());
        assert!(!conn.in_transaction());
    }

    #[test]
    fn bootstrap_failure_applies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001-a.sql", "CREATE TABLE a (id INTEGER);");

        let mut conn = Faulty::new();
        conn.fail_bootstrap = true;
        let err = Migrator::new("migrations")
            .run(&mut conn, dir.path())
            .unwrap_err();

        assert!(matches!(err, Error::Bootstrap(ref m) if m == "permission denied"));
        assert!(conn.executed.is_empty());
    }

    #[test]
    fn apply_requires_a_database_url() {
        let config = MigrateConfig {
            migrations_dir: PathBuf::from("unused"),
            ..Default::default()
        };
        assert!(matches!(apply(&config), Err(Error::Config(_))));
    }
}
