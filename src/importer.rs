//! Loads a delimited file into a freshly created import table.
//!
//! Table names follow `<prefix><vendor_slug>_<unix_epoch>`. Every declared
//! column is `TEXT`; a surrogate `id` and an `is_flagged` marker are always
//! added. Rows are inserted in fixed-size batches, one transaction per batch.
//! A failed batch is rolled back whole and counted as skipped while earlier
//! batches stay committed.

use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    time::Instant,
};

use chrono::{DateTime, Duration, Utc};
use heck::ToSnakeCase;
use itertools::Itertools;
use log::{debug, info, warn};
use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, PipelineResult},
    io_utils::{self, CsvFormat},
    registry::TableRegistry,
    store::{Database, quote_ident},
};

pub const DEFAULT_TABLE_PREFIX: &str = "csv_import_";
pub const DEFAULT_IMPORT_BATCH: usize = 500;
pub const ID_COLUMN: &str = "id";
pub const FLAG_COLUMN: &str = "is_flagged";

/// Lowercase `[a-z0-9_]` slug used for vendor names and raw header keys.
pub fn slugify(value: &str) -> String {
    value
        .to_snake_case()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .split('_')
        .filter(|part| !part.is_empty())
        .join("_")
}

/// A validated table definition, built once and handed to [`create_or_replace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> PipelineResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PipelineError::validation("Table name cannot be empty"));
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if column.is_empty() {
                return Err(PipelineError::validation(format!(
                    "Table '{name}' declares an empty column name"
                )));
            }
            let lowered = column.to_ascii_lowercase();
            if lowered == ID_COLUMN || lowered == FLAG_COLUMN {
                return Err(PipelineError::validation(format!(
                    "Column '{column}' is reserved in import tables"
                )));
            }
            if !seen.insert(lowered) {
                return Err(PipelineError::validation(format!(
                    "Column '{column}' is declared twice for table '{name}'"
                )));
            }
        }
        Ok(Self { name, columns })
    }

    /// Builds `<prefix><vendor_slug>_<epoch>`.
    pub fn for_vendor(
        prefix: &str,
        vendor_name: &str,
        epoch: i64,
        columns: Vec<String>,
    ) -> PipelineResult<Self> {
        let slug = slugify(vendor_name);
        if slug.is_empty() {
            return Err(PipelineError::validation("Vendor name is required"));
        }
        Self::new(format!("{prefix}{slug}_{epoch}"), columns)
    }

    fn create_sql(&self) -> String {
        let mut definitions = vec![
            format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(ID_COLUMN)),
            format!("{} INTEGER NOT NULL DEFAULT 0", quote_ident(FLAG_COLUMN)),
        ];
        definitions.extend(self.columns.iter().map(|c| format!("{} TEXT", quote_ident(c))));
        format!(
            "CREATE TABLE {} (\n    {}\n)",
            quote_ident(&self.name),
            definitions.join(",\n    ")
        )
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.name),
            self.columns.iter().map(|c| quote_ident(c)).join(", "),
            (1..=self.columns.len()).map(|i| format!("?{i}")).join(", ")
        )
    }
}

/// Drops any table of the same name, then creates it. Last writer wins.
pub fn create_or_replace(db: &Database, spec: &TableSpec) -> PipelineResult<()> {
    let schema_error = |err: rusqlite::Error| PipelineError::Schema {
        table: spec.name.clone(),
        message: err.to_string(),
    };
    if db.table_exists(&spec.name)? {
        warn!("Table '{}' already exists; replacing it", spec.name);
    }
    db.connection()
        .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&spec.name)))
        .map_err(schema_error)?;
    db.connection()
        .execute_batch(&spec.create_sql())
        .map_err(schema_error)?;
    debug!(
        "Created table '{}' with columns [{}]",
        spec.name,
        spec.columns.join(", ")
    );
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub imported: usize,
    pub skipped: usize,
}

/// Accumulates rows and commits them one batch per transaction.
pub struct BatchLoader<'a> {
    db: &'a mut Database,
    table: String,
    sql: String,
    width: usize,
    batch_size: usize,
    pending: Vec<Vec<String>>,
    counts: ImportCounts,
    batches: usize,
}

impl<'a> BatchLoader<'a> {
    pub fn new(db: &'a mut Database, spec: &TableSpec, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            db,
            table: spec.name.clone(),
            sql: spec.insert_sql(),
            width: spec.columns.len(),
            batch_size,
            pending: Vec::with_capacity(batch_size),
            counts: ImportCounts::default(),
            batches: 0,
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.pending.push(io_utils::align_record(row, self.width));
        if self.pending.len() >= self.batch_size {
            self.flush();
        }
    }

    /// Counts a row that never reached the database (e.g. undecodable input).
    pub fn skip(&mut self) {
        self.counts.skipped += 1;
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.batches += 1;
        let size = self.pending.len();
        match insert_rows(self.db, &self.sql, &self.pending) {
            Ok(()) => {
                self.counts.imported += size;
                debug!(
                    "Committed batch {} ({} row(s)) into '{}'",
                    self.batches, size, self.table
                );
            }
            Err(err) => {
                self.counts.skipped += size;
                warn!(
                    "Batch {} ({} row(s)) into '{}' rolled back: {}",
                    self.batches, size, self.table, err
                );
            }
        }
        // Release the batch buffer rather than keeping its peak capacity.
        self.pending = Vec::with_capacity(self.batch_size);
    }

    pub fn finish(mut self) -> ImportCounts {
        self.flush();
        self.counts
    }
}

fn insert_rows(db: &mut Database, sql: &str, rows: &[Vec<String>]) -> rusqlite::Result<()> {
    let tx = db.connection_mut().transaction()?;
    {
        let mut stmt = tx.prepare_cached(sql)?;
        for row in rows {
            stmt.execute(params_from_iter(row.iter()))?;
        }
    }
    tx.commit()
}

/// Inserts `rows` (positionally aligned to `spec.columns`) in batches of `batch_size`.
pub fn import_batch(
    db: &mut Database,
    spec: &TableSpec,
    rows: impl IntoIterator<Item = Vec<String>>,
    batch_size: usize,
) -> ImportCounts {
    let mut loader = BatchLoader::new(db, spec, batch_size);
    for row in rows {
        loader.push(row);
    }
    loader.finish()
}

/// How file headers become table columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnNaming {
    /// Keep mapped target names as they are.
    Verbatim,
    /// Slugify raw vendor headers (legacy direct import).
    Sanitized,
}

/// Resolves headers into unique, non-reserved column names.
pub fn column_names(headers: &[String], naming: ColumnNaming) -> Vec<String> {
    let mut used: HashSet<String> = [ID_COLUMN.to_string(), FLAG_COLUMN.to_string()]
        .into_iter()
        .collect();
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let base = match naming {
                ColumnNaming::Verbatim => header.trim().to_string(),
                ColumnNaming::Sanitized => slugify(header),
            };
            let base = if base.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                base
            };
            let mut candidate = base.clone();
            let mut counter = 2usize;
            while used.contains(&candidate.to_ascii_lowercase()) {
                candidate = format!("{base}_{counter}");
                counter += 1;
            }
            used.insert(candidate.to_ascii_lowercase());
            candidate
        })
        .collect()
}

/// Parameters for one import run.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub vendor_name: String,
    pub permanent: bool,
    pub table_prefix: String,
    pub batch_size: usize,
    pub ephemeral_ttl: Duration,
}

impl ImportRequest {
    pub fn new(vendor_name: impl Into<String>) -> Self {
        Self {
            vendor_name: vendor_name.into(),
            permanent: false,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            batch_size: DEFAULT_IMPORT_BATCH,
            ephemeral_ttl: Duration::hours(24),
        }
    }
}

/// Outcome of one import, persisted for the matching stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportStats {
    pub table_name: String,
    pub vendor_name: String,
    pub rows_imported: usize,
    pub rows_skipped: usize,
    pub execution_time: f64,
    pub is_permanent: bool,
    pub created_at: DateTime<Utc>,
}

impl ImportStats {
    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        let file = File::create(path)
            .map_err(|err| PipelineError::io(format!("Creating stats file {path:?}"), err))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|err| PipelineError::io(format!("Writing stats file {path:?}"), err.into()))
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let file = File::open(path)
            .map_err(|_| PipelineError::not_found(format!("import stats not found: {path:?}")))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|err| {
            PipelineError::validation(format!("Parsing stats file {path:?}: {err}"))
        })
    }
}

/// Imports a mapped file; its headers are the target fields.
pub fn import_mapped_file(
    db: &mut Database,
    mapped: &Path,
    request: &ImportRequest,
) -> PipelineResult<ImportStats> {
    if !mapped.exists() {
        return Err(PipelineError::not_found(format!(
            "mapped file not found: {mapped:?}"
        )));
    }
    import_file(
        db,
        mapped,
        CsvFormat::default(),
        ColumnNaming::Verbatim,
        request,
    )
}

/// Legacy path: imports a raw vendor file using its own sanitized headers as columns.
pub fn import_raw_csv(
    db: &mut Database,
    source: &Path,
    format: CsvFormat,
    request: &ImportRequest,
) -> PipelineResult<ImportStats> {
    if !source.exists() {
        return Err(PipelineError::not_found(format!(
            "source file not found: {source:?}"
        )));
    }
    import_file(db, source, format, ColumnNaming::Sanitized, request)
}

fn import_file(
    db: &mut Database,
    path: &Path,
    format: CsvFormat,
    naming: ColumnNaming,
    request: &ImportRequest,
) -> PipelineResult<ImportStats> {
    let started = Instant::now();
    let mut reader = io_utils::open_csv_reader_from_path(path, format.delimiter)?;
    let headers = io_utils::reader_headers(&mut reader, format.encoding)?;
    let created_at = Utc::now();
    let spec = TableSpec::for_vendor(
        &request.table_prefix,
        &request.vendor_name,
        created_at.timestamp(),
        column_names(&headers, naming),
    )?;

    info!(
        "Importing {:?} into '{}' in batches of {}",
        path, spec.name, request.batch_size
    );
    create_or_replace(db, &spec)?;

    let counts = {
        let mut loader = BatchLoader::new(db, &spec, request.batch_size);
        let mut record = csv::ByteRecord::new();
        let mut line = 1usize;
        loop {
            line += 1;
            match reader.read_byte_record(&mut record) {
                Ok(true) => match io_utils::decode_record(&record, format.encoding) {
                    Ok(decoded) => loader.push(decoded),
                    Err(err) => {
                        warn!("Skipping row {line}: {err}");
                        loader.skip();
                    }
                },
                Ok(false) => break,
                Err(err) if err.is_io_error() => {
                    drop(loader);
                    discard_table(db, &spec.name);
                    return Err(PipelineError::csv(format!("Reading row {line}"), err));
                }
                Err(err) => {
                    warn!("Skipping row {line}: {err}");
                    loader.skip();
                }
            }
        }
        loader.finish()
    };

    let stats = ImportStats {
        table_name: spec.name.clone(),
        vendor_name: request.vendor_name.clone(),
        rows_imported: counts.imported,
        rows_skipped: counts.skipped,
        execution_time: started.elapsed().as_secs_f64(),
        is_permanent: request.permanent,
        created_at,
    };
    let expires_at = (!request.permanent).then(|| created_at + request.ephemeral_ttl);
    let recorded =
        TableRegistry::new(db, &request.table_prefix).record_import(&stats, expires_at);
    if let Err(err) = recorded {
        discard_table(db, &stats.table_name);
        return Err(err);
    }

    info!(
        "Imported {} row(s) into '{}' ({} skipped) in {:.3}s",
        stats.rows_imported, stats.table_name, stats.rows_skipped, stats.execution_time
    );
    Ok(stats)
}

fn discard_table(db: &Database, table: &str) {
    if let Err(err) = db
        .connection()
        .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
    {
        warn!("Failed to drop incomplete table '{table}': {err}");
    }
}
