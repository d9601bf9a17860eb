use std::collections::HashSet;
use std::path::Path;

use schemata_common::{Error, Result};
use schemata_config::MigrateConfig;
use serde::Serialize;
use tracing::debug;

use crate::applier::{db_message, finish, open};
use crate::connection::{AppliedMigrationRecord, MigrationConnection};
use crate::migrations::discover;

/// Disk state reconciled against database state. Takes no run lock.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub server_time: String,
    pub applied: Vec<AppliedMigrationRecord>,
    /// Files that `apply` would run, in order.
    pub pending: Vec<String>,
    /// Recorded as applied but no longer on disk.
    pub missing: Vec<String>,
}

impl MigrationStatus {
    pub fn collect<C: MigrationConnection>(conn: &mut C, table: &str, dir: &Path) -> Result<Self> {
        let server_time = conn.ping()?;
        conn.bootstrap(table)
            .map_err(|e| Error::Bootstrap(db_message(e)))?;
        let applied = conn.applied(table)?;
        let files = discover(dir)?;

        let recorded: HashSet<&str> = applied.iter().map(|r| r.name.as_str()).collect();
        let on_disk: HashSet<&str> = files.iter().map(|f| f.file_name.as_str()).collect();

        let pending = files
            .iter()
            .filter(|f| !recorded.contains(f.file_name.as_str()))
            .map(|f| f.file_name.clone())
            .collect::<Vec<_>>();
        let missing = applied
            .iter()
            .filter(|r| !on_disk.contains(r.name.as_str()))
            .map(|r| r.name.clone())
            .collect::<Vec<_>>();

        debug!(
            "{} applied, {} pending, {} missing",
            applied.len(),
            pending.len(),
            missing.len()
        );
        Ok(Self {
            server_time,
            applied,
            pending,
            missing,
        })
    }

    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

pub fn status(config: &MigrateConfig) -> Result<MigrationStatus> {
    config.validate()?;
    let mut conn = open(config)?;
    let result = MigrationStatus::collect(&mut conn, &config.table, &config.migrations_dir);
    finish(conn, result)
}
