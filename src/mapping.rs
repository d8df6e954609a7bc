//! Operator-supplied column mapping from canonical target fields onto the
//! headers of a vendor file.
//!
//! The mapping is persisted as JSON between requests. A target whose source
//! header is missing from the file being processed projects to `""` rather
//! than failing, since operators routinely map optional columns.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, PipelineResult},
    io_utils::{self, CsvFormat},
    preview::Preview,
    rows::ProjectedRow,
};

pub const SKU: &str = "sku";
pub const PRICE: &str = "price";
pub const LOCATION: &str = "location";
pub const QUANTITY: &str = "quantity";
pub const DESCRIPTION: &str = "description";

/// Canonical target fields offered to operators. Custom targets are allowed too.
pub const STANDARD_TARGETS: [&str; 5] = [SKU, PRICE, LOCATION, QUANTITY, DESCRIPTION];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub target: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub columns: Vec<MappingEntry>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: &str, source: &str) -> Self {
        self.insert(target, source);
        self
    }

    /// Sets the source for `target`, replacing an earlier entry in place.
    pub fn insert(&mut self, target: &str, source: &str) {
        let target = target.trim().to_ascii_lowercase();
        if let Some(entry) = self.columns.iter_mut().find(|e| e.target == target) {
            entry.source = source.to_string();
        } else {
            self.columns.push(MappingEntry {
                target,
                source: source.to_string(),
            });
        }
    }

    /// Parses `target=Source Header` pairs as given on the command line.
    pub fn parse_pairs(pairs: &[String]) -> PipelineResult<Self> {
        let mut mapping = Self::new();
        for pair in pairs {
            let (target, source) = pair.split_once('=').ok_or_else(|| {
                PipelineError::validation(format!(
                    "Invalid mapping '{pair}'; expected target=Source Header"
                ))
            })?;
            if target.trim().is_empty() {
                return Err(PipelineError::validation(format!(
                    "Invalid mapping '{pair}'; target field cannot be empty"
                )));
            }
            mapping.insert(target, source.trim());
        }
        Ok(mapping)
    }

    pub fn source_for(&self, target: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|e| e.target == target)
            .map(|e| e.source.as_str())
    }

    pub fn validate(&self) -> PipelineResult<()> {
        match self.source_for(SKU) {
            Some(source) if !source.trim().is_empty() => Ok(()),
            _ => Err(PipelineError::validation(format!(
                "missing required field: {SKU}"
            ))),
        }
    }

    /// Target field names in mapping order; these become the mapped file's headers.
    pub fn target_headers(&self) -> Vec<String> {
        self.columns.iter().map(|e| e.target.clone()).collect()
    }

    /// Resolves source header positions once for a given file.
    pub fn projector(&self, headers: &[String]) -> Projector {
        let indices = self
            .columns
            .iter()
            .map(|entry| {
                if entry.source.is_empty() {
                    return None;
                }
                let position = headers.iter().position(|h| *h == entry.source);
                if position.is_none() {
                    debug!(
                        "Source column '{}' for target '{}' not present; projecting empty values",
                        entry.source, entry.target
                    );
                }
                position
            })
            .collect();
        Projector {
            targets: self.target_headers(),
            indices,
        }
    }

    pub fn apply(&self, headers: &[String], record: &[String]) -> ProjectedRow {
        self.projector(headers).project(record)
    }

    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        let file = File::create(path)
            .map_err(|err| PipelineError::io(format!("Creating mapping file {path:?}"), err))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|err| PipelineError::io(format!("Writing mapping file {path:?}"), err.into()))
    }

    pub fn load(path: &Path) -> PipelineResult<Self> {
        let file = File::open(path)
            .map_err(|_| PipelineError::not_found(format!("mapping not found: {path:?}")))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|err| {
            PipelineError::validation(format!("Parsing mapping file {path:?}: {err}"))
        })
    }
}

/// A mapping bound to one file's header layout.
#[derive(Debug, Clone)]
pub struct Projector {
    targets: Vec<String>,
    indices: Vec<Option<usize>>,
}

impl Projector {
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn project(&self, record: &[String]) -> ProjectedRow {
        self.targets
            .iter()
            .zip(&self.indices)
            .map(|(target, index)| {
                let value = index
                    .and_then(|idx| record.get(idx))
                    .cloned()
                    .unwrap_or_default();
                (target.clone(), value)
            })
            .collect()
    }
}

/// Projects the first `rows` records of `source` through `mapping`.
pub fn mapped_preview(
    source: &Path,
    mapping: &ColumnMapping,
    rows: usize,
    format: CsvFormat,
) -> PipelineResult<Preview> {
    mapping.validate()?;
    let mut reader = io_utils::open_csv_reader_from_path(source, format.delimiter)?;
    let headers = io_utils::reader_headers(&mut reader, format.encoding)?;
    let projector = mapping.projector(&headers);
    let mut projected = Vec::new();
    for (idx, record) in reader.byte_records().enumerate() {
        if idx >= rows {
            break;
        }
        let record =
            record.map_err(|err| PipelineError::csv(format!("Reading row {}", idx + 2), err))?;
        let decoded = io_utils::decode_record(&record, format.encoding)?;
        projected.push(projector.project(&decoded));
    }
    Ok(Preview {
        headers: projector.targets().to_vec(),
        rows: projected,
    })
}
