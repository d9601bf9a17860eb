//! Migration files on disk.
//!
//! A migration is a flat `.sql` file named `<NNN>-<slug>.sql`, where `NNN`
//! is a zero-padded sequence number. The file name is the migration's
//! identity in the bookkeeping table. Ordering is plain lexicographic
//! ordering of file names, which equals numeric ordering only while every
//! prefix has the same width.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use schemata_common::Result;
use tracing::{debug, warn};

pub const MIGRATION_EXTENSION: &str = "sql";

static FILE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<seq>[0-9]+)-(?P<name>.+)\.sql$").expect("static regex compiles")
});

/// A migration file found in the migrations directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// `None` when the file does not follow the `NNN-slug.sql` convention.
    pub sequence: Option<u32>,
    pub name: String,
    pub file_name: String,
    pub path: PathBuf,
}

impl MigrationFile {
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?.to_string();
        Some(Self::new(file_name, path))
    }

    fn new(file_name: String, path: PathBuf) -> Self {
        let (sequence, name) = match parse_file_name(&file_name) {
            Some((seq, name)) => (Some(seq), name.to_string()),
            None => (None, file_name.trim_end_matches(".sql").to_string()),
        };
        Self {
            sequence,
            name,
            file_name,
            path,
        }
    }

    /// Raw SQL body. Never parsed or validated.
    pub fn read_sql(&self) -> std::io::Result<String> {
        std::fs::read_to_string(&self.path)
    }
}

/// Split `007-add-users.sql` into `(7, "add-users")`.
pub fn parse_file_name(file_name: &str) -> Option<(u32, &str)> {
    let caps = FILE_NAME_RE.captures(file_name)?;
    let seq = caps.name("seq")?.as_str().parse().ok()?;
    Some((seq, caps.name("name")?.as_str()))
}

pub fn format_file_name(sequence: u32, name: &str, width: usize) -> String {
    format!("{sequence:0width$}-{name}.{MIGRATION_EXTENSION}")
}

fn has_migration_extension(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == MIGRATION_EXTENSION)
}

/// Names and paths of the regular `.sql` files in `dir`, unordered.
/// Non UTF-8 names are skipped with a warning.
pub(crate) fn sql_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() || !has_migration_extension(&path) {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => files.push((name, path)),
            Err(_) => warn!(
                "skipping migration with non UTF-8 file name: {}",
                path.display()
            ),
        }
    }
    Ok(files)
}

/// List the `.sql` files in `dir`, sorted lexicographically by file name.
pub fn discover(dir: &Path) -> Result<Vec<MigrationFile>> {
    let mut files: Vec<MigrationFile> = sql_files(dir)?
        .into_iter()
        .map(|(file_name, path)| MigrationFile::new(file_name, path))
        .collect();

    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    debug!("discovered {} migration file(s) in {}", files.len(), dir.display());
    Ok(files)
}
