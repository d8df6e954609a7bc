//! Runtime settings, read from an optional YAML file.
//!
//! Every field has a default so an empty or partial file is valid. Command-line
//! flags override whatever the file provides.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::{
    importer::{DEFAULT_IMPORT_BATCH, DEFAULT_TABLE_PREFIX},
    matcher::ReferenceCatalog,
    writer::DEFAULT_WRITE_BATCH,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database holding the import tables.
    pub database: PathBuf,
    /// Optional separate database file with the reference catalog; attached as `catalog.schema`.
    pub catalog_database: Option<PathBuf>,
    pub table_prefix: String,
    pub import_batch_size: usize,
    pub write_batch_size: usize,
    /// Directory receiving mapped files and exports.
    pub output_dir: PathBuf,
    pub ephemeral_ttl_hours: i64,
    pub preview_rows: usize,
    pub catalog: ReferenceCatalog,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("sku-reconcile.db"),
            catalog_database: None,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            import_batch_size: DEFAULT_IMPORT_BATCH,
            write_batch_size: DEFAULT_WRITE_BATCH,
            output_dir: PathBuf::from("mapped"),
            ephemeral_ttl_hours: 24,
            preview_rows: 5,
            catalog: ReferenceCatalog::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("Reading settings file {path:?}"))?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).with_context(|| format!("Parsing settings file {path:?}"))
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn ephemeral_ttl(&self) -> Duration {
        Duration::hours(self.ephemeral_ttl_hours.max(0))
    }
}
