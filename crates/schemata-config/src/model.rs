use std::path::PathBuf;

use schemata_common::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations/sql";
pub const DEFAULT_TABLE: &str = "migrations";
pub const DEFAULT_SEQUENCE_WIDTH: usize = 3;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const MAX_SEQUENCE_WIDTH: usize = 9;
const MAX_TABLE_NAME_LEN: usize = 63;

/// Everything a migration run needs, passed explicitly into each entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// `sqlite::memory:`, `sqlite://path`, `sqlite:path` or a bare file path.
    pub database_url: Option<String>,
    pub migrations_dir: PathBuf,
    /// Bookkeeping table; the run lock lives in `<table>_lock`.
    pub table: String,
    /// Zero-padding width of generated sequence numbers.
    pub sequence_width: usize,
    pub busy_timeout_ms: u64,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            table: DEFAULT_TABLE.to_string(),
            sequence_width: DEFAULT_SEQUENCE_WIDTH,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl MigrateConfig {
    pub fn validate(&self) -> Result<()> {
        validate_table_name(&self.table)?;
        if !(1..=MAX_SEQUENCE_WIDTH).contains(&self.sequence_width) {
            return Err(Error::Config(format!(
                "sequence_width must be between 1 and {MAX_SEQUENCE_WIDTH}, got {}",
                self.sequence_width
            )));
        }
        Ok(())
    }

    /// The database URL, or a config error naming how to provide one.
    pub fn require_database_url(&self) -> Result<&str> {
        match self.database_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(Error::Config(
                "no database configured; set DATABASE_URL or pass --database-url".into(),
            )),
        }
    }
}

/// The table name is spliced into DDL, so only plain identifiers pass.
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("table name cannot be empty".into()));
    }
    if name.len() > MAX_TABLE_NAME_LEN {
        return Err(Error::Config("table name too long".into()));
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Config(format!(
            "table name {name:?} must be letters, digits and underscores"
        )));
    }
    Ok(())
}
