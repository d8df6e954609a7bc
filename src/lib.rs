pub mod aggregate;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod export;
pub mod importer;
pub mod io_utils;
pub mod mapping;
pub mod matcher;
pub mod preview;
pub mod process;
pub mod registry;
pub mod rows;
pub mod store;
pub mod table;
pub mod writer;

use std::{env, fs::File, io::BufWriter, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    aggregate::AggregateSpec,
    cli::{Cli, Commands, InputArgs, MappingArgs, MatchQueryArgs, TablesCommand},
    config::Settings,
    importer::ImportRequest,
    io_utils::CsvFormat,
    mapping::ColumnMapping,
    matcher::{MatchOptions, MatchResult},
    process::MapOptions,
    registry::TableRegistry,
    store::Database,
};

/// Schema name used for a separately configured catalog database.
const DEFAULT_CATALOG_SCHEMA: &str = "catalog";

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sku_reconcile", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;
    match cli.command {
        Commands::Headers(args) => handle_headers(&args),
        Commands::Preview(args) => handle_preview(&args, &settings),
        Commands::Count(args) => handle_count(&args),
        Commands::Map(args) => handle_map(&args, &settings),
        Commands::Import(args) => handle_import(&args, &settings),
        Commands::Match(args) => handle_match(&args, &settings),
        Commands::Export(args) => handle_export(&args, &settings),
        Commands::Tables(command) => handle_tables(&command, &settings),
    }
}

fn resolve_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load_or_default(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        settings.database = database.clone();
    }
    if settings.catalog_database.is_some() && settings.catalog.schema.is_none() {
        settings.catalog.schema = Some(DEFAULT_CATALOG_SCHEMA.to_string());
    }
    debug!("Effective settings: {:?}", settings);
    Ok(settings)
}

fn open_database(settings: &Settings) -> Result<Database> {
    let db = Database::open(&settings.database)
        .with_context(|| format!("Opening database {:?}", settings.database))?;
    if let (Some(path), Some(schema)) = (&settings.catalog_database, &settings.catalog.schema) {
        db.attach(path, schema)
            .with_context(|| format!("Attaching catalog database {path:?}"))?;
    }
    Ok(db)
}

fn input_format(args: &InputArgs) -> Result<CsvFormat> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    Ok(CsvFormat::for_path(&args.input, args.delimiter, encoding))
}

fn resolve_mapping(args: &MappingArgs) -> Result<Option<ColumnMapping>> {
    if args.is_empty() {
        return Ok(None);
    }
    let mut mapping = match &args.mapping {
        Some(path) => ColumnMapping::load(path)
            .with_context(|| format!("Loading mapping from {path:?}"))?,
        None => ColumnMapping::new(),
    };
    for entry in ColumnMapping::parse_pairs(&args.pairs)?.columns {
        mapping.insert(&entry.target, &entry.source);
    }
    Ok(Some(mapping))
}

fn handle_headers(args: &InputArgs) -> Result<()> {
    let format = input_format(args)?;
    let headers = preview::read_headers(&args.input, format)
        .with_context(|| format!("Reading headers from {:?}", args.input))?;
    for header in headers {
        println!("{header}");
    }
    Ok(())
}

fn handle_preview(args: &cli::PreviewArgs, settings: &Settings) -> Result<()> {
    let format = input_format(&args.input)?;
    let rows = args.rows.unwrap_or(settings.preview_rows);
    let preview = match resolve_mapping(&args.mapping)? {
        Some(mapping) => mapping::mapped_preview(&args.input.input, &mapping, rows, format),
        None => preview::preview(&args.input.input, rows, format),
    }
    .with_context(|| format!("Previewing {:?}", args.input.input))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
    } else {
        table::print_table(&preview.headers, &preview.table_rows());
    }
    Ok(())
}

fn handle_count(args: &InputArgs) -> Result<()> {
    let format = input_format(args)?;
    let count = preview::count_rows(&args.input, format)
        .with_context(|| format!("Counting rows in {:?}", args.input))?;
    println!("{count}");
    Ok(())
}

fn handle_map(args: &cli::MapArgs, settings: &Settings) -> Result<()> {
    let format = input_format(&args.input)?;
    let mapping = resolve_mapping(&args.mapping)?
        .ok_or_else(|| anyhow!("A column mapping is required (use --map or --mapping)"))?;
    if let Some(path) = &args.save_mapping {
        mapping
            .save(path)
            .with_context(|| format!("Saving mapping to {path:?}"))?;
        info!("Mapping with {} column(s) saved to {:?}", mapping.columns.len(), path);
    }

    let options = MapOptions {
        group_by: args
            .group_by
            .iter()
            .map(|field| field.trim().to_ascii_lowercase())
            .filter(|field| !field.is_empty())
            .collect(),
        aggregates: AggregateSpec::parse(&args.aggregates)?,
        deduplicate: args.dedup,
        write_batch_size: args.batch_size.unwrap_or(settings.write_batch_size),
    };
    let out_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| settings.output_dir.clone());

    let mapped = process::create_mapped_file(&args.input.input, &mapping, &options, format, &out_dir)
        .with_context(|| format!("Mapping {:?}", args.input.input))?;
    info!(
        "Wrote {} row(s) across {} column(s) to {:?}",
        mapped.rows_written,
        mapped.headers.len(),
        mapped.path
    );
    if mapped.rows_skipped > 0 {
        warn!("Skipped {} unreadable source row(s)", mapped.rows_skipped);
    }
    println!("{}", mapped.path.display());
    Ok(())
}

fn handle_import(args: &cli::ImportArgs, settings: &Settings) -> Result<()> {
    let mut db = open_database(settings)?;
    let request = ImportRequest {
        vendor_name: args.vendor.clone(),
        permanent: args.permanent,
        table_prefix: settings.table_prefix.clone(),
        batch_size: args.batch_size.unwrap_or(settings.import_batch_size),
        ephemeral_ttl: settings.ephemeral_ttl(),
    };

    let stats = if args.raw {
        let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
        let format = CsvFormat::for_path(&args.input, args.delimiter, encoding);
        importer::import_raw_csv(&mut db, &args.input, format, &request)
    } else {
        importer::import_mapped_file(&mut db, &args.input, &request)
    }
    .with_context(|| format!("Importing {:?}", args.input))?;

    if let Some(path) = &args.stats {
        stats
            .save(path)
            .with_context(|| format!("Writing import statistics to {path:?}"))?;
    }
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn run_match(query: &MatchQueryArgs, settings: &Settings) -> Result<MatchResult> {
    let db = open_database(settings)?;
    let options = MatchOptions {
        mode: query.mode.into(),
        include_unmatched: query.include_unmatched,
    };
    matcher::match_table(
        &db,
        &query.table,
        &query.sku_column,
        &settings.catalog,
        &options,
    )
    .with_context(|| format!("Matching SKUs in '{}'", query.table))
}

fn handle_match(args: &cli::MatchArgs, settings: &Settings) -> Result<()> {
    let result = run_match(&args.query, settings)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    let shown = if args.limit == 0 {
        result.rows.len()
    } else {
        args.limit.min(result.rows.len())
    };
    table::print_table(&result.columns, &result.rows[..shown]);
    println!("{} of {} matched row(s) shown", shown, result.total);
    Ok(())
}

fn handle_export(args: &cli::ExportArgs, settings: &Settings) -> Result<()> {
    let result = run_match(&args.query, settings)?;
    let path = match &args.output {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("Creating export file {path:?}"))?;
            export::write_csv(&result, BufWriter::new(file))
                .with_context(|| format!("Writing export file {path:?}"))?;
            info!("Exported {} row(s) to {:?}", result.total, path);
            path.clone()
        }
        None => export::export_to_dir(&result, &settings.output_dir)
            .with_context(|| format!("Exporting into {:?}", settings.output_dir))?,
    };
    println!("{}", path.display());
    Ok(())
}

fn handle_tables(command: &TablesCommand, settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let registry = TableRegistry::new(&db, &settings.table_prefix);
    match command {
        TablesCommand::List => {
            let names = registry.list()?;
            if names.is_empty() {
                println!("No import tables found.");
                return Ok(());
            }
            let infos = registry.list_with_meta()?;
            let rows = names
                .into_iter()
                .map(|name| match infos.iter().find(|info| info.table_name == name) {
                    Some(info) => vec![
                        name,
                        info.vendor_name.clone(),
                        info.created_at
                            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_default(),
                        match info.is_permanent {
                            Some(true) => "permanent".to_string(),
                            Some(false) => "ephemeral".to_string(),
                            None => String::new(),
                        },
                    ],
                    None => vec![name, String::new(), String::new(), String::new()],
                })
                .collect::<Vec<_>>();
            let headers = ["table", "vendor", "created", "retention"]
                .map(String::from)
                .to_vec();
            table::print_table(&headers, &rows);
        }
        TablesCommand::Info(args) => {
            let info = registry
                .info(&args.table)
                .with_context(|| format!("Inspecting '{}'", args.table))?;
            println!("table: {}", info.table_name);
            println!("rows: {}", info.row_count);
            println!("columns: {}", info.columns.join(", "));
        }
        TablesCommand::View(args) => {
            let page = registry
                .page(&args.table, args.page, args.per_page)
                .with_context(|| format!("Reading '{}'", args.table))?;
            table::print_table(&page.columns, &page.rows);
            println!(
                "page {} of {} ({} row(s))",
                page.page,
                page.total_pages().max(1),
                page.total_rows
            );
        }
        TablesCommand::Drop(args) => {
            if !registry.delete(&args.table) {
                bail!("Failed to drop '{}'", args.table);
            }
            println!("Dropped {}", args.table);
        }
        TablesCommand::DropAll(args) => {
            if !args.yes {
                bail!("Refusing to drop every import table without --yes");
            }
            if !registry.delete_all() {
                bail!("Failed to drop every import table");
            }
            println!("Dropped all import tables");
        }
        TablesCommand::Hold(args) => {
            if !registry.mark_held(&args.table) {
                bail!("Failed to put '{}' on hold", args.table);
            }
            println!("Held {}", args.table);
        }
        TablesCommand::Sweep => {
            let dropped = registry.sweep(Utc::now())?;
            for table in &dropped {
                println!("Dropped {table}");
            }
            info!("Sweep removed {} expired table(s)", dropped.len());
        }
    }
    Ok(())
}
