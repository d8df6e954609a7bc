//! The mapping stage: source file → projected rows → optional grouping or
//! deduplication → mapped file.
//!
//! Without grouping or deduplication rows stream straight from reader to
//! writer. Either reduction needs the whole file in memory first; only the
//! write side streams in that case.

use std::{io::Read, path::Path};

use log::{info, warn};

use crate::{
    aggregate::{self, AggregateSpec},
    dedup,
    error::{PipelineError, PipelineResult},
    io_utils::{self, CsvFormat},
    mapping::{ColumnMapping, Projector},
    rows::ProjectedRow,
    writer::{MappedFile, MappedFileWriter},
};

#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    pub group_by: Vec<String>,
    pub aggregates: AggregateSpec,
    pub deduplicate: bool,
    pub write_batch_size: usize,
}

impl MapOptions {
    fn materializes(&self) -> bool {
        !self.group_by.is_empty() || self.deduplicate
    }

    fn validate(&self, targets: &[String]) -> PipelineResult<()> {
        for field in &self.group_by {
            if !targets.contains(field) {
                return Err(PipelineError::validation(format!(
                    "Cannot group by unmapped field '{field}'"
                )));
            }
        }
        if !self.aggregates.is_empty() && self.group_by.is_empty() {
            return Err(PipelineError::validation(
                "Aggregate functions require at least one group-by field",
            ));
        }
        self.aggregates.validate_against(targets)
    }
}

pub fn create_mapped_file(
    source: &Path,
    mapping: &ColumnMapping,
    options: &MapOptions,
    format: CsvFormat,
    out_dir: &Path,
) -> PipelineResult<MappedFile> {
    mapping.validate()?;
    let targets = mapping.target_headers();
    options.validate(&targets)?;
    if !options.group_by.is_empty() && options.deduplicate {
        warn!("Both grouping and deduplication requested; grouping takes precedence");
    }

    info!(
        "Mapping '{}' (delimiter '{}') into {} target column(s)",
        source.display(),
        io_utils::printable_delimiter(format.delimiter),
        targets.len()
    );

    let mut reader = io_utils::open_csv_reader_from_path(source, format.delimiter)?;
    let headers = io_utils::reader_headers(&mut reader, format.encoding)?;
    let projector = mapping.projector(&headers);
    let batch_size = if options.write_batch_size == 0 {
        crate::writer::DEFAULT_WRITE_BATCH
    } else {
        options.write_batch_size
    };

    let mut writer = MappedFileWriter::create(out_dir, &targets, batch_size)?;
    let counts = match write_rows(&mut reader, format, &projector, options, &mut writer) {
        Ok(counts) => counts,
        Err(err) => {
            writer.discard();
            return Err(err);
        }
    };

    let mut mapped = writer.finish()?;
    mapped.rows_skipped = counts.skipped;
    info!(
        "Wrote {} of {} source row(s) to {:?} ({} skipped)",
        mapped.rows_written, counts.read, mapped.path, counts.skipped
    );
    Ok(mapped)
}

#[derive(Debug, Default, Clone, Copy)]
struct SourceCounts {
    read: usize,
    skipped: usize,
}

fn write_rows<R: Read>(
    reader: &mut csv::Reader<R>,
    format: CsvFormat,
    projector: &Projector,
    options: &MapOptions,
    writer: &mut MappedFileWriter,
) -> PipelineResult<SourceCounts> {
    if !options.materializes() {
        return for_each_row(reader, format, projector, |row| writer.write_row(&row));
    }

    let mut rows = Vec::new();
    let counts = for_each_row(reader, format, projector, |row| {
        rows.push(row);
        Ok(())
    })?;
    let reduced = if !options.group_by.is_empty() {
        aggregate::aggregate(rows, &options.group_by, &options.aggregates)
    } else {
        dedup::deduplicate(rows)
    };
    writer.write_all(&reduced)?;
    Ok(counts)
}

/// Projects every data record into `sink`.
///
/// Records that fail to decode or parse are logged with their row number and
/// skipped. An I/O failure while reading ends the pass with an error.
fn for_each_row<R: Read>(
    reader: &mut csv::Reader<R>,
    format: CsvFormat,
    projector: &Projector,
    mut sink: impl FnMut(ProjectedRow) -> PipelineResult<()>,
) -> PipelineResult<SourceCounts> {
    let mut counts = SourceCounts::default();
    let mut record = csv::ByteRecord::new();
    let mut line = 1usize;
    loop {
        line += 1;
        match reader.read_byte_record(&mut record) {
            Ok(true) => match io_utils::decode_record(&record, format.encoding) {
                Ok(decoded) => {
                    sink(projector.project(&decoded))?;
                    counts.read += 1;
                }
                Err(err) => {
                    warn!("Skipping row {line}: {err}");
                    counts.skipped += 1;
                }
            },
            Ok(false) => break,
            Err(err) if err.is_io_error() => {
                return Err(PipelineError::csv(format!("Reading row {line}"), err));
            }
            Err(err) => {
                warn!("Skipping row {line}: {err}");
                counts.skipped += 1;
            }
        }
    }
    Ok(counts)
}
