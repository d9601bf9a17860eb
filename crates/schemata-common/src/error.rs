use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    /// Another run holds the migration lock.
    #[error("migrations are locked by {holder}; run `schemata unlock` if that run is gone")]
    Locked { holder: String },

    /// A specific migration failed and was rolled back.
    #[error("migration {file} failed: {message}")]
    Migration { file: String, message: String },

    #[error("database error: {0}")]
    Database(String),
}

impl Error {
    /// Name of the migration file this error is about, if any.
    pub fn migration_file(&self) -> Option<&str> {
        match self {
            Error::Migration { file, .. } => Some(file),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn error_display_includes_context() {
        let e = Error::InvalidArgument("migration name is required".into());
        assert_eq!(e.to_string(), "invalid argument: migration name is required");

        let e = Error::Connection("unreachable".into());
        assert_eq!(e.to_string(), "connection error: unreachable");

        let e = Error::Migration {
            file: "002-add-index.sql".into(),
            message: "near \"INDX\": syntax error".into(),
        };
        assert_eq!(
            e.to_string(),
            "migration 002-add-index.sql failed: near \"INDX\": syntax error"
        );
    }

    #[test]
    fn migration_file_only_set_for_migration_errors() {
        let e = Error::Migration {
            file: "001-init.sql".into(),
            message: "boom".into(),
        };
        assert_eq!(e.migration_file(), Some("001-init.sql"));
        assert_eq!(Error::Bootstrap("x".into()).migration_file(), None);
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
        assert_eq!(e.to_string(), "io error: denied");
    }
}
