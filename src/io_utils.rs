//! CSV reader/writer construction shared by every file-touching stage.
//!
//! - **Delimiter resolution**: `.tsv` → tab, anything else → comma, unless the
//!   caller overrides it.
//! - **Encoding**: input fields are decoded through `encoding_rs`, defaulting to
//!   UTF-8. Output is always UTF-8.
//! - **Ragged records**: readers run in flexible mode; [`align_record`] pads
//!   short records with empty strings and drops extra trailing fields.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

/// Input settings for reading a delimited source file.
#[derive(Debug, Clone, Copy)]
pub struct CsvFormat {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_CSV_DELIMITER,
            encoding: UTF_8,
        }
    }
}

impl CsvFormat {
    /// Resolves the delimiter from the path extension unless one is provided.
    pub fn for_path(path: &Path, delimiter: Option<u8>, encoding: &'static Encoding) -> Self {
        Self {
            delimiter: resolve_input_delimiter(path, delimiter),
            encoding,
        }
    }
}

pub fn resolve_encoding(label: Option<&str>) -> PipelineResult<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| PipelineError::validation(format!("Unknown encoding '{value}'")))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    delimiter: u8,
) -> PipelineResult<csv::Reader<BufReader<File>>> {
    let file = File::open(path)
        .map_err(|err| PipelineError::io(format!("Opening input file {path:?}"), err))?;
    Ok(open_csv_reader(BufReader::new(file), delimiter))
}

pub fn csv_writer<W: Write>(writer: W, delimiter: u8) -> csv::Writer<W> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    builder.from_writer(writer)
}

pub fn open_csv_writer(path: &Path, delimiter: u8) -> PipelineResult<csv::Writer<BufWriter<File>>> {
    let file = File::create(path)
        .map_err(|err| PipelineError::io(format!("Creating output file {path:?}"), err))?;
    Ok(csv_writer(BufWriter::new(file), delimiter))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> PipelineResult<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(PipelineError::io(
            "Decoding field",
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to decode text with encoding {}", encoding.name()),
            ),
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
) -> PipelineResult<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Reads and decodes the header record.
///
/// A file with no header record at all is reported as an I/O error.
pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> PipelineResult<Vec<String>>
where
    R: Read,
{
    let headers = reader
        .byte_headers()
        .map_err(|err| PipelineError::csv("Reading header row", err))?
        .clone();
    if headers.is_empty() {
        return Err(PipelineError::io(
            "Reading header row",
            io::Error::new(io::ErrorKind::UnexpectedEof, "source file is empty"),
        ));
    }
    let mut decoded = decode_record(&headers, encoding)?;
    if let Some(first) = decoded.first_mut()
        && let Some(stripped) = first.strip_prefix('\u{feff}')
    {
        *first = stripped.to_string();
    }
    Ok(decoded)
}

/// Pads or truncates a decoded record so it lines up with `width` headers.
pub fn align_record(mut fields: Vec<String>, width: usize) -> Vec<String> {
    fields.resize(width, String::new());
    fields
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn tsv_extension_selects_tab() {
        assert_eq!(
            resolve_input_delimiter(&PathBuf::from("feed.TSV"), None),
            DEFAULT_TSV_DELIMITER
        );
        assert_eq!(
            resolve_input_delimiter(&PathBuf::from("feed.csv"), None),
            DEFAULT_CSV_DELIMITER
        );
        assert_eq!(
            resolve_input_delimiter(&PathBuf::from("feed.tsv"), Some(b';')),
            b';'
        );
    }

    #[test]
    fn unknown_encoding_is_a_validation_error() {
        let err = resolve_encoding(Some("klingon")).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(resolve_encoding(Some("latin1")).unwrap().name(), "windows-1252");
    }

    #[test]
    fn align_record_pads_and_truncates() {
        let short = align_record(vec!["a".into()], 3);
        assert_eq!(short, vec!["a", "", ""]);
        let long = align_record(vec!["a".into(), "b".into(), "c".into()], 2);
        assert_eq!(long, vec!["a", "b"]);
    }

    #[test]
    fn headers_strip_byte_order_mark() {
        let data = "\u{feff}sku,price\nA1,3\n";
        let mut reader = open_csv_reader(data.as_bytes(), b',');
        let headers = reader_headers(&mut reader, UTF_8).expect("headers");
        assert_eq!(headers, vec!["sku", "price"]);
    }

    #[test]
    fn empty_source_has_no_headers() {
        let mut reader = open_csv_reader("".as_bytes(), b',');
        let err = reader_headers(&mut reader, UTF_8).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
