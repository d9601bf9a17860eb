pub mod applier;
pub mod connection;
pub mod generator;
pub mod migrations;
pub mod sqlite;
pub mod status;

pub use applier::{ApplyReport, Migrator, apply, unlock};
pub use connection::{AppliedMigrationRecord, MigrationConnection};
pub use generator::MigrationGenerator;
pub use migrations::{MIGRATION_EXTENSION, MigrationFile, discover};
pub use sqlite::SqliteConnection;
pub use status::{MigrationStatus, status};
