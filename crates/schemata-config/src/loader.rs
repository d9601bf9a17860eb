use std::path::{Path, PathBuf};

use schemata_common::{Error, Result};
use tracing::{debug, info};

use crate::model::MigrateConfig;

/// Config file names probed in the working directory, in order.
const CANDIDATE_FILES: &[&str] = &["schemata.yml", "schemata.yaml", "schemata.toml"];

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_MIGRATIONS_DIR: &str = "MIGRATIONS_DIR";

/// Builds a `MigrateConfig` from an optional file, then environment overrides.
pub struct ConfigLoader {
    base_dir: PathBuf,
    explicit: Option<PathBuf>,
    env: Box<dyn Fn(&str) -> Option<String>>,
}

impl ConfigLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            explicit: None,
            env: Box::new(|key: &str| std::env::var(key).ok()),
        }
    }

    /// Use this file instead of probing; it must exist.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    /// Replace the environment lookup (tests inject a map here).
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    pub fn load(&self) -> Result<MigrateConfig> {
        let mut config = match self.config_path()? {
            Some(path) => {
                info!("loading config from {}", path.display());
                load_file(&path)?
            }
            None => {
                debug!("no config file found, using defaults");
                MigrateConfig::default()
            }
        };

        if let Some(url) = (self.env)(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty()) {
            debug!("{ENV_DATABASE_URL} set in environment");
            config.database_url = Some(url);
        }
        if let Some(dir) = (self.env)(ENV_MIGRATIONS_DIR).filter(|v| !v.trim().is_empty()) {
            config.migrations_dir = PathBuf::from(dir);
        }

        if config.migrations_dir.is_relative() {
            config.migrations_dir = self.base_dir.join(&config.migrations_dir);
        }

        config.validate()?;
        Ok(config)
    }

    fn config_path(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.explicit {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Some(path.clone()));
        }
        Ok(CANDIDATE_FILES
            .iter()
            .map(|name| self.base_dir.join(name))
            .find(|p| p.is_file()))
    }
}

fn load_file(path: &Path) -> Result<MigrateConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
        "toml" => {
            toml::from_str(&contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
        }
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}
