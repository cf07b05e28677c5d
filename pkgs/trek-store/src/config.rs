use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the SQLite store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file, created when missing (default: trek-chat.db)
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("trek-chat.db"),
        }
    }
}

impl StoreConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// SQLite connection URL for `db_path`, opened read-write-create
    pub fn database_url(&self) -> Result<String> {
        let path = self
            .db_path
            .to_str()
            .context("Invalid database path")?
            .replace('\\', "/");
        Ok(format!("sqlite:{}?mode=rwc", path))
    }
}
