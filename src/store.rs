//! SQLite connection wrapper and the few catalog queries every stage shares.

use std::path::Path;

use log::debug;
use rusqlite::{Connection, Params, types::ValueRef};

use crate::{
    aggregate::format_number,
    error::{PipelineError, PipelineResult},
};

/// Bookkeeping table recording permanence and expiry of each import table.
pub const META_TABLE: &str = "import_registry_meta";

const META_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS import_registry_meta (
    table_name   TEXT PRIMARY KEY,
    vendor_name  TEXT NOT NULL,
    is_permanent INTEGER NOT NULL DEFAULT 0,
    created_at   INTEGER NOT NULL,
    expires_at   INTEGER             -- NULL for permanent tables
);
"#;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> PipelineResult<Self> {
        let conn = Connection::open(path).map_err(|err| {
            PipelineError::io(
                format!("Opening database {path:?}"),
                std::io::Error::other(err.to_string()),
            )
        })?;
        debug!("Opened database {:?}", path);
        Self::init(conn)
    }

    pub fn open_in_memory() -> PipelineResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> PipelineResult<Self> {
        conn.execute_batch(META_SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Attaches a separate database file (e.g. the reference catalog) under `schema`.
    pub fn attach(&self, path: &Path, schema: &str) -> PipelineResult<()> {
        let location = path.to_string_lossy();
        self.conn.execute(
            &format!("ATTACH DATABASE ?1 AS {}", quote_ident(schema)),
            [location.as_ref()],
        )?;
        debug!("Attached {:?} as '{}'", path, schema);
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> PipelineResult<bool> {
        let found = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(found > 0)
    }

    /// All table names in the main schema, sorted.
    pub fn table_names(&self) -> PipelineResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn table_columns(&self, table: &str) -> PipelineResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    pub fn row_count(&self, table: &str) -> PipelineResult<usize> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// Runs a query and returns its column names plus every row rendered as text.
    pub fn query_text<P: Params>(
        &self,
        sql: &str,
        params: P,
    ) -> PipelineResult<(Vec<String>, Vec<Vec<String>>)> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let width = columns.len();
        let rows = stmt
            .query_map(params, |row| {
                (0..width)
                    .map(|idx| row.get_ref(idx).map(value_to_string))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((columns, rows))
    }
}

/// Renders a SQLite value as text; NULL becomes the empty string.
pub fn value_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => format_number(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
