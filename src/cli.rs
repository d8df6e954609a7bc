use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::matcher::MatchMode;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Map vendor CSV files, import them and reconcile SKUs against the parts catalog",
    long_about = None
)]
pub struct Cli {
    /// YAML settings file (defaults apply when omitted)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// SQLite database holding import tables (overrides the settings file)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the header row of a vendor file
    Headers(InputArgs),
    /// Preview the first rows of a vendor file, optionally through a column mapping
    Preview(PreviewArgs),
    /// Count data rows in a vendor file
    Count(InputArgs),
    /// Project a vendor file through a column mapping into a mapped file
    Map(MapArgs),
    /// Import a mapped file (or a raw vendor file) into a new import table
    Import(ImportArgs),
    /// Match an import table against the parts catalog
    Match(MatchArgs),
    /// Match an import table and write the result as CSV
    Export(ExportArgs),
    /// Inspect and manage import tables
    #[command(subcommand)]
    Tables(TablesCommand),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Vendor CSV file to read
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct MappingArgs {
    /// Column mapping entries of the form `target=Source Header`
    #[arg(long = "map", action = clap::ArgAction::Append)]
    pub pairs: Vec<String>,
    /// Saved JSON mapping; `--map` entries are applied on top of it
    #[arg(long = "mapping")]
    pub mapping: Option<PathBuf>,
}

impl MappingArgs {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty() && self.mapping.is_none()
    }
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub mapping: MappingArgs,
    /// Number of rows to display (defaults to the configured preview size)
    #[arg(long)]
    pub rows: Option<usize>,
    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct MapArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub mapping: MappingArgs,
    /// Persist the effective mapping as JSON
    #[arg(long = "save-mapping")]
    pub save_mapping: Option<PathBuf>,
    /// Comma-separated target fields to group rows by
    #[arg(long = "group-by", value_delimiter = ',')]
    pub group_by: Vec<String>,
    /// Aggregate directives of the form `field:function` (sum, avg, count, min, max, concat)
    #[arg(long = "aggregate", action = clap::ArgAction::Append)]
    pub aggregates: Vec<String>,
    /// Drop exact duplicate projected rows (ignored when grouping)
    #[arg(long)]
    pub dedup: bool,
    /// Directory receiving the mapped file (defaults to the configured output directory)
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,
    /// Rows written between flushes
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Mapped file to import (or a raw vendor file with `--raw`)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Vendor name used in the table name
    #[arg(long)]
    pub vendor: String,
    /// Keep the table instead of letting it expire
    #[arg(long)]
    pub permanent: bool,
    /// Import the file's own headers as columns instead of mapped fields
    #[arg(long)]
    pub raw: bool,
    /// CSV delimiter character for raw imports
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding for raw imports (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Rows per insert transaction
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
    /// Write the import statistics as JSON
    #[arg(long)]
    pub stats: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct MatchQueryArgs {
    /// Import table to match
    #[arg(short = 't', long = "table")]
    pub table: String,
    /// Column of the import table holding vendor SKUs
    #[arg(long = "sku-column", default_value = "sku")]
    pub sku_column: String,
    /// Result shape
    #[arg(long, value_enum, default_value_t = MatchModeArg::Basic)]
    pub mode: MatchModeArg,
    /// Keep rows that do not resolve through the catalog
    #[arg(long = "include-unmatched")]
    pub include_unmatched: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum MatchModeArg {
    Basic,
    Catalog,
}

impl From<MatchModeArg> for MatchMode {
    fn from(value: MatchModeArg) -> Self {
        match value {
            MatchModeArg::Basic => MatchMode::Basic,
            MatchModeArg::Catalog => MatchMode::Catalog,
        }
    }
}

#[derive(Debug, Args)]
pub struct MatchArgs {
    #[command(flatten)]
    pub query: MatchQueryArgs,
    /// Maximum rows to display (0 = all)
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub query: MatchQueryArgs,
    /// Destination CSV file (defaults to a timestamped file in the output directory)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum TablesCommand {
    /// List import tables with vendor and creation time
    List,
    /// Show columns and row count of an import table
    Info(TableNameArgs),
    /// Page through the rows of an import table
    View(ViewArgs),
    /// Drop an import table
    Drop(TableNameArgs),
    /// Drop every import table
    DropAll(DropAllArgs),
    /// Flag every row of an import table as held
    Hold(TableNameArgs),
    /// Drop ephemeral import tables whose expiry has passed
    Sweep,
}

#[derive(Debug, Args)]
pub struct TableNameArgs {
    /// Import table name
    pub table: String,
}

#[derive(Debug, Args)]
pub struct ViewArgs {
    /// Import table name
    pub table: String,
    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    pub page: usize,
    /// Rows per page
    #[arg(long = "per-page", default_value_t = 20)]
    pub per_page: usize,
}

#[derive(Debug, Args)]
pub struct DropAllArgs {
    /// Confirm dropping every import table
    #[arg(long)]
    pub yes: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
