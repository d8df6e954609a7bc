//! Streaming access to a delimited source file: headers, bounded previews and
//! row counts. Nothing here ever holds more than `n` data rows in memory.

use std::path::Path;

use log::debug;
use serde::Serialize;

use crate::{
    error::{PipelineError, PipelineResult},
    io_utils::{self, CsvFormat},
    rows::ProjectedRow,
};

/// Header row plus the first few data rows of a file, keyed by header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub headers: Vec<String>,
    pub rows: Vec<ProjectedRow>,
}

impl Preview {
    /// Positional view of the rows, for table rendering.
    pub fn table_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.values_for(&self.headers))
            .collect()
    }
}

pub fn read_headers(source: &Path, format: CsvFormat) -> PipelineResult<Vec<String>> {
    let mut reader = io_utils::open_csv_reader_from_path(source, format.delimiter)?;
    io_utils::reader_headers(&mut reader, format.encoding)
}

pub fn preview(source: &Path, rows: usize, format: CsvFormat) -> PipelineResult<Preview> {
    let mut reader = io_utils::open_csv_reader_from_path(source, format.delimiter)?;
    let headers = io_utils::reader_headers(&mut reader, format.encoding)?;
    let mut preview_rows = Vec::with_capacity(rows.min(64));

    for (idx, record) in reader.byte_records().enumerate() {
        if idx >= rows {
            break;
        }
        let record =
            record.map_err(|err| PipelineError::csv(format!("Reading row {}", idx + 2), err))?;
        let decoded = io_utils::decode_record(&record, format.encoding)?;
        preview_rows.push(ProjectedRow::from_pairs(&headers, &decoded));
    }

    debug!("Previewed {} row(s) from {:?}", preview_rows.len(), source);
    Ok(Preview {
        headers,
        rows: preview_rows,
    })
}

/// Counts data rows, excluding the header line.
pub fn count_rows(source: &Path, format: CsvFormat) -> PipelineResult<usize> {
    let mut reader = io_utils::open_csv_reader_from_path(source, format.delimiter)?;
    io_utils::reader_headers(&mut reader, format.encoding)?;
    let mut record = csv::ByteRecord::new();
    let mut count = 0usize;
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => count += 1,
            Ok(false) => break,
            Err(err) => {
                return Err(PipelineError::csv(
                    format!("Reading row {}", count + 2),
                    err,
                ));
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn preview_stops_after_requested_rows() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("feed.csv");
        fs::write(&path, "Part,Cost\nA1,1\nA2,2\nA3,3\n").expect("write");

        let preview = preview(&path, 2, CsvFormat::default()).expect("preview");
        assert_eq!(preview.headers, vec!["Part", "Cost"]);
        assert_eq!(preview.rows.len(), 2);
        assert_eq!(preview.rows[1].get("Part"), "A2");
        assert_eq!(
            preview.table_rows(),
            vec![vec!["A1", "1"], vec!["A2", "2"]]
        );
        assert_eq!(count_rows(&path, CsvFormat::default()).expect("count"), 3);
    }

    #[test]
    fn short_records_are_padded() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("ragged.csv");
        fs::write(&path, "a,b,c\n1\n1,2,3,4\n").expect("write");

        let preview = preview(&path, 10, CsvFormat::default()).expect("preview");
        assert_eq!(preview.rows[0].get("c"), "");
        assert_eq!(preview.rows[1].get("c"), "3");
        assert_eq!(preview.rows[1].len(), 3);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().expect("temp dir");
        let err = read_headers(&dir.path().join("nope.csv"), CsvFormat::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
