//! CSV rendering of a match result for download.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::info;

use crate::{
    error::{PipelineError, PipelineResult},
    io_utils,
    matcher::MatchResult,
};

/// `matched_results_<Y-m-d_H-M-S>.csv`
pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("matched_results_{}.csv", now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Writes the result keys as the header row followed by one row per result.
pub fn write_csv<W: Write>(result: &MatchResult, writer: W) -> PipelineResult<()> {
    let mut csv_writer = io_utils::csv_writer(writer, b',');
    csv_writer
        .write_record(&result.columns)
        .map_err(|err| PipelineError::csv("Writing export headers", err))?;
    for (idx, row) in result.rows.iter().enumerate() {
        csv_writer
            .write_record(row)
            .map_err(|err| PipelineError::csv(format!("Writing export row {}", idx + 1), err))?;
    }
    csv_writer
        .flush()
        .map_err(|err| PipelineError::io("Flushing export", err))
}

pub fn to_bytes(result: &MatchResult) -> PipelineResult<Vec<u8>> {
    let mut buffer = Vec::new();
    write_csv(result, &mut buffer)?;
    Ok(buffer)
}

/// Writes the export into `dir` under a timestamped name and returns its path.
pub fn export_to_dir(result: &MatchResult, dir: &Path) -> PipelineResult<PathBuf> {
    fs::create_dir_all(dir)
        .map_err(|err| PipelineError::io(format!("Creating export directory {dir:?}"), err))?;
    let path = dir.join(export_file_name(Utc::now()));
    let file = fs::File::create(&path)
        .map_err(|err| PipelineError::io(format!("Creating export file {path:?}"), err))?;
    write_csv(result, std::io::BufWriter::new(file))?;
    info!("Exported {} row(s) to {:?}", result.total, path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn quotes_only_where_needed() {
        let result = MatchResult {
            table_name: "t".into(),
            columns: vec!["Vendor SKU".into(), "Vendor Description".into()],
            rows: vec![vec!["A1".into(), "Door, \"LH\"".into()]],
            total: 1,
        };
        let text = String::from_utf8(to_bytes(&result).unwrap()).unwrap();
        assert_eq!(text, "Vendor SKU,Vendor Description\nA1,\"Door, \"\"LH\"\"\"\n");
    }

    #[test]
    fn file_name_uses_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            export_file_name(now),
            "matched_results_2024-03-09_14-05-07.csv"
        );
    }
}
