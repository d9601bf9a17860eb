use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use schemata_common::{Error, Result};
use tracing::{info, warn};

use crate::migrations::{format_file_name, parse_file_name, sql_files};

/// Scaffolds new, empty migration files.
///
/// The next sequence number is the number of `.sql` files already present
/// plus one. Deleting a file therefore makes the next number collide with
/// the highest surviving one; that case is logged, not corrected.
pub struct MigrationGenerator {
    dir: PathBuf,
    width: usize,
}

impl MigrationGenerator {
    pub fn new(dir: impl Into<PathBuf>, width: usize) -> Self {
        Self {
            dir: dir.into(),
            width,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create `<NNN>-<name>.sql` and return its file name.
    pub fn generate(&self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument("migration name is required".into()));
        }
        if name.contains(['/', '\\']) {
            return Err(Error::InvalidArgument(format!(
                "migration name {name:?} must not contain path separators"
            )));
        }

        std::fs::create_dir_all(&self.dir)?;

        let existing: Vec<String> = sql_files(&self.dir)?
            .into_iter()
            .map(|(file_name, _)| file_name)
            .collect();
        let next = u32::try_from(existing.len() + 1)
            .map_err(|_| Error::InvalidArgument("too many migrations".into()))?;

        if let Some(clash) = existing
            .iter()
            .find(|f| parse_file_name(f).is_some_and(|(seq, _)| seq == next))
        {
            warn!(
                "sequence number {next} is already used by {clash}; \
                 a migration file was probably deleted or renamed"
            );
        }
        if next.to_string().len() > self.width {
            warn!(
                "sequence number {next} is wider than {} digits; \
                 lexicographic order no longer matches numeric order",
                self.width
            );
        }

        let file_name = format_file_name(next, name, self.width);
        let path = self.dir.join(&file_name);
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(format!("-- Migration: {name}\n\n").as_bytes())?;

        info!("created migration {}", path.display());
        Ok(file_name)
    }
}
