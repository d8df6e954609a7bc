//! Streams projected rows into a fresh `mapped-<millis>.csv` artifact.

use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, PipelineResult},
    io_utils,
    rows::ProjectedRow,
};

pub const DEFAULT_WRITE_BATCH: usize = 1000;

/// The artifact handed from the mapping stage to the importer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedFile {
    pub path: PathBuf,
    pub headers: Vec<String>,
    pub rows_written: usize,
    /// Source rows dropped because they could not be decoded or parsed.
    #[serde(default)]
    pub rows_skipped: usize,
}

pub struct MappedFileWriter {
    path: PathBuf,
    headers: Vec<String>,
    writer: csv::Writer<BufWriter<File>>,
    batch_size: usize,
    rows_written: usize,
}

impl MappedFileWriter {
    /// Creates `dir` if needed and opens a new uniquely named file inside it.
    pub fn create(dir: &Path, headers: &[String], batch_size: usize) -> PipelineResult<Self> {
        fs::create_dir_all(dir)
            .map_err(|err| PipelineError::io(format!("Creating output directory {dir:?}"), err))?;
        let path = unique_path(dir);
        let mut writer = io_utils::open_csv_writer(&path, b',')?;
        writer
            .write_record(headers)
            .map_err(|err| PipelineError::csv(format!("Writing headers to {path:?}"), err))?;
        Ok(Self {
            path,
            headers: headers.to_vec(),
            writer,
            batch_size: batch_size.max(1),
            rows_written: 0,
        })
    }

    pub fn write_row(&mut self, row: &ProjectedRow) -> PipelineResult<()> {
        self.writer
            .write_record(row.values_for(&self.headers))
            .map_err(|err| {
                PipelineError::csv(format!("Writing row {}", self.rows_written + 2), err)
            })?;
        self.rows_written += 1;
        if self.rows_written % self.batch_size == 0 {
            self.writer
                .flush()
                .map_err(|err| PipelineError::io(format!("Flushing {:?}", self.path), err))?;
            debug!("Flushed {} row(s) to {:?}", self.rows_written, self.path);
        }
        Ok(())
    }

    pub fn write_all<'a>(
        &mut self,
        rows: impl IntoIterator<Item = &'a ProjectedRow>,
    ) -> PipelineResult<()> {
        for row in rows {
            self.write_row(row)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> PipelineResult<MappedFile> {
        if let Err(err) = self.writer.flush() {
            let err = PipelineError::io(format!("Flushing {:?}", self.path), err);
            self.discard();
            return Err(err);
        }
        Ok(MappedFile {
            path: self.path,
            headers: self.headers,
            rows_written: self.rows_written,
            rows_skipped: 0,
        })
    }

    /// Closes and removes the partially written file.
    pub fn discard(self) {
        let Self { path, writer, .. } = self;
        drop(writer);
        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed partial mapped file {path:?}"),
            Err(err) => warn!("Could not remove partial mapped file {path:?}: {err}"),
        }
    }
}

/// Writes `rows` under `headers` into a new file in `dir`.
pub fn write(dir: &Path, headers: &[String], rows: &[ProjectedRow]) -> PipelineResult<MappedFile> {
    let mut writer = MappedFileWriter::create(dir, headers, DEFAULT_WRITE_BATCH)?;
    writer.write_all(rows)?;
    writer.finish()
}

fn unique_path(dir: &Path) -> PathBuf {
    let stamp = Utc::now().timestamp_millis();
    let mut candidate = dir.join(format!("mapped-{stamp}.csv"));
    let mut counter = 1usize;
    while candidate.exists() {
        candidate = dir.join(format!("mapped-{stamp}-{counter}.csv"));
        counter += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{io_utils::CsvFormat, preview};
    use tempfile::tempdir;

    fn row(pairs: &[(&str, &str)]) -> ProjectedRow {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn written_file_previews_back_identically() {
        let dir = tempdir().expect("temp dir");
        let headers = vec!["sku".to_string(), "description".to_string()];
        let rows = vec![
            row(&[("sku", "A1"), ("description", "Door, left \"LH\"")]),
            row(&[("sku", "B2"), ("description", "")]),
        ];
        let mapped = write(&dir.path().join("out"), &headers, &rows).expect("write");
        assert_eq!(mapped.rows_written, 2);

        let preview = preview::preview(&mapped.path, 10, CsvFormat::default()).expect("preview");
        assert_eq!(preview.headers, headers);
        assert_eq!(preview.rows, rows);
    }

    #[test]
    fn discarded_writer_leaves_no_file() {
        let dir = tempdir().expect("temp dir");
        let mut writer =
            MappedFileWriter::create(dir.path(), &["sku".to_string()], 1).expect("create");
        writer.write_row(&row(&[("sku", "A1")])).expect("row");
        writer.discard();
        assert_eq!(fs::read_dir(dir.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn consecutive_files_never_collide() {
        let dir = tempdir().expect("temp dir");
        let headers = vec!["sku".to_string()];
        let first = write(dir.path(), &headers, &[]).expect("first");
        let second = write(dir.path(), &headers, &[]).expect("second");
        assert_ne!(first.path, second.path);
    }

    #[test]
    fn unwritable_directory_is_io_error() {
        let dir = tempdir().expect("temp dir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").expect("write");
        let err = write(&blocker.join("nested"), &["sku".to_string()], &[]).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
