//! Listing, inspection and removal of import tables.
//!
//! Ownership is decided purely by name: only tables starting with the reserved
//! prefix are ever dropped or flagged. Operations outside that namespace fail
//! closed and return `false`.

use chrono::{DateTime, TimeZone, Utc};
use heck::ToTitleCase;
use log::{debug, info, warn};
use regex::Regex;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use crate::{
    error::{PipelineError, PipelineResult},
    importer::{FLAG_COLUMN, ImportStats},
    store::{Database, META_TABLE, quote_ident},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportTableInfo {
    pub table_name: String,
    pub vendor_slug: String,
    pub vendor_name: String,
    pub timestamp: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub is_permanent: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub table_name: String,
    pub columns: Vec<String>,
    pub row_count: usize,
}

/// One page of an import table's rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TablePage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub page: usize,
    pub per_page: usize,
    pub total_rows: usize,
}

impl TablePage {
    pub fn total_pages(&self) -> usize {
        self.total_rows.div_ceil(self.per_page.max(1))
    }
}

pub struct TableRegistry<'a> {
    db: &'a Database,
    prefix: String,
}

impl<'a> TableRegistry<'a> {
    pub fn new(db: &'a Database, prefix: &str) -> Self {
        Self {
            db,
            prefix: prefix.to_string(),
        }
    }

    pub fn owns(&self, table: &str) -> bool {
        !self.prefix.is_empty() && table != META_TABLE && table.starts_with(&self.prefix)
    }

    /// Names of every table under the reserved prefix.
    pub fn list(&self) -> PipelineResult<Vec<String>> {
        Ok(self
            .db
            .table_names()?
            .into_iter()
            .filter(|name| self.owns(name))
            .collect())
    }

    /// Tables whose names parse as `<prefix><slug>_<epoch>`, with vendor details.
    pub fn list_with_meta(&self) -> PipelineResult<Vec<ImportTableInfo>> {
        let pattern = Regex::new(&format!(
            r"^{}([A-Za-z0-9_]+?)_(\d+)$",
            regex::escape(&self.prefix)
        ))
        .map_err(|err| PipelineError::Query(err.to_string()))?;

        let mut infos = Vec::new();
        for table_name in self.list()? {
            let Some(captures) = pattern.captures(&table_name) else {
                debug!("Skipping '{table_name}': does not follow the naming convention");
                continue;
            };
            let vendor_slug = captures[1].to_string();
            let Ok(timestamp) = captures[2].parse::<i64>() else {
                continue;
            };
            let is_permanent = self
                .db
                .connection()
                .query_row(
                    &format!("SELECT is_permanent FROM {META_TABLE} WHERE table_name = ?1"),
                    [&table_name],
                    |row| row.get::<_, bool>(0),
                )
                .optional()?;
            infos.push(ImportTableInfo {
                vendor_name: vendor_slug.replace('_', " ").to_title_case(),
                created_at: Utc.timestamp_opt(timestamp, 0).single(),
                table_name,
                vendor_slug,
                timestamp,
                is_permanent,
            });
        }
        Ok(infos)
    }

    pub fn info(&self, table: &str) -> PipelineResult<TableInfo> {
        self.require(table)?;
        Ok(TableInfo {
            table_name: table.to_string(),
            columns: self.db.table_columns(table)?,
            row_count: self.db.row_count(table)?,
        })
    }

    /// Returns rows `(page - 1) * per_page ..` in insertion order; pages are 1-based.
    pub fn page(&self, table: &str, page: usize, per_page: usize) -> PipelineResult<TablePage> {
        self.require(table)?;
        let page = page.max(1);
        let per_page = per_page.max(1);
        let limit = i64::try_from(per_page).ok();
        let offset = (page - 1)
            .checked_mul(per_page)
            .and_then(|offset| i64::try_from(offset).ok());
        let (Some(limit), Some(offset)) = (limit, offset) else {
            return Err(PipelineError::validation(format!(
                "page {page} with {per_page} row(s) per page is out of range"
            )));
        };
        let total_rows = self.db.row_count(table)?;
        let (columns, rows) = self.db.query_text(
            &format!(
                "SELECT * FROM {} ORDER BY rowid LIMIT ?1 OFFSET ?2",
                quote_ident(table)
            ),
            params![limit, offset],
        )?;
        Ok(TablePage {
            columns,
            rows,
            page,
            per_page,
            total_rows,
        })
    }

    /// Drops `table` if it carries the reserved prefix; anything else is refused.
    pub fn delete(&self, table: &str) -> bool {
        if !self.owns(table) {
            warn!(
                "Refusing to drop '{table}': name does not start with '{}'",
                self.prefix
            );
            return false;
        }
        let result = self
            .db
            .connection()
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
            .and_then(|_| {
                self.db.connection().execute(
                    &format!("DELETE FROM {META_TABLE} WHERE table_name = ?1"),
                    [table],
                )
            });
        match result {
            Ok(_) => {
                info!("Dropped table '{table}'");
                true
            }
            Err(err) => {
                warn!("Failed to drop '{table}': {err}");
                false
            }
        }
    }

    /// Drops every owned table, stopping at the first failure.
    pub fn delete_all(&self) -> bool {
        let tables = match self.list() {
            Ok(tables) => tables,
            Err(err) => {
                warn!("Failed to list import tables: {err}");
                return false;
            }
        };
        tables.iter().all(|table| self.delete(table))
    }

    /// Puts the whole table on hold: adds `is_flagged` if missing, then sets it on every row.
    pub fn mark_held(&self, table: &str) -> bool {
        if !self.owns(table) {
            warn!("Refusing to flag '{table}': not an import table");
            return false;
        }
        match self.try_mark_held(table) {
            Ok(rows) => {
                info!("Flagged {rows} row(s) in '{table}' as held");
                true
            }
            Err(err) => {
                warn!("Failed to flag '{table}': {err}");
                false
            }
        }
    }

    fn try_mark_held(&self, table: &str) -> PipelineResult<usize> {
        self.require(table)?;
        let columns = self.db.table_columns(table)?;
        if !columns.iter().any(|c| c.eq_ignore_ascii_case(FLAG_COLUMN)) {
            debug!("Adding '{FLAG_COLUMN}' to '{table}'");
            self.db.connection().execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} INTEGER NOT NULL DEFAULT 0",
                quote_ident(table),
                quote_ident(FLAG_COLUMN)
            ))?;
        }
        Ok(self.db.connection().execute(
            &format!(
                "UPDATE {} SET {} = 1",
                quote_ident(table),
                quote_ident(FLAG_COLUMN)
            ),
            [],
        )?)
    }

    pub fn record_import(
        &self,
        stats: &ImportStats,
        expires_at: Option<DateTime<Utc>>,
    ) -> PipelineResult<()> {
        self.db.connection().execute(
            &format!(
                "INSERT OR REPLACE INTO {META_TABLE} \
                 (table_name, vendor_name, is_permanent, created_at, expires_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            params![
                stats.table_name,
                stats.vendor_name,
                stats.is_permanent,
                stats.created_at.timestamp(),
                expires_at.map(|at| at.timestamp()),
            ],
        )?;
        Ok(())
    }

    /// Ephemeral tables whose expiry is at or before `now`.
    pub fn expired(&self, now: DateTime<Utc>) -> PipelineResult<Vec<String>> {
        let mut stmt = self.db.connection().prepare(&format!(
            "SELECT table_name FROM {META_TABLE} \
             WHERE is_permanent = 0 AND expires_at IS NOT NULL AND expires_at <= ?1 \
             ORDER BY expires_at"
        ))?;
        let names = stmt
            .query_map([now.timestamp()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Drops expired ephemeral tables; meant to be driven by an external scheduler.
    pub fn sweep(&self, now: DateTime<Utc>) -> PipelineResult<Vec<String>> {
        let mut dropped = Vec::new();
        for table in self.expired(now)? {
            if self.delete(&table) {
                dropped.push(table);
            }
        }
        if !dropped.is_empty() {
            info!("Swept {} expired import table(s)", dropped.len());
        }
        Ok(dropped)
    }

    fn require(&self, table: &str) -> PipelineResult<()> {
        if self.db.table_exists(table)? {
            Ok(())
        } else {
            Err(PipelineError::not_found(format!(
                "table does not exist: {table}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::{TableSpec, create_or_replace, import_batch};

    const PREFIX: &str = "csv_import_";

    fn seeded() -> Database {
        let mut db = Database::open_in_memory().expect("db");
        let spec = TableSpec::new("csv_import_acme_parts_1700000000", vec!["sku".into()])
            .expect("spec");
        create_or_replace(&db, &spec).expect("create");
        import_batch(&mut db, &spec, vec![vec!["A1".into()], vec!["B2".into()]], 10);
        db.connection()
            .execute_batch(
                "CREATE TABLE csv_import_scratch (x TEXT);
                 CREATE TABLE wp_other_plugin_table (x TEXT);",
            )
            .expect("seed");
        db
    }

    #[test]
    fn list_only_returns_owned_tables() {
        let db = seeded();
        let registry = TableRegistry::new(&db, PREFIX);
        assert_eq!(
            registry.list().unwrap(),
            vec!["csv_import_acme_parts_1700000000", "csv_import_scratch"]
        );
        let meta = registry.list_with_meta().unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].vendor_slug, "acme_parts");
        assert_eq!(meta[0].vendor_name, "Acme Parts");
        assert_eq!(meta[0].timestamp, 1_700_000_000);
        assert!(meta[0].created_at.is_some());
    }

    #[test]
    fn delete_fails_closed_outside_prefix() {
        let db = seeded();
        let registry = TableRegistry::new(&db, PREFIX);
        assert!(!registry.delete("wp_other_plugin_table"));
        assert!(db.table_exists("wp_other_plugin_table").unwrap());
        assert!(registry.delete("csv_import_scratch"));
        assert!(!db.table_exists("csv_import_scratch").unwrap());
    }

    #[test]
    fn mark_held_flags_every_row_and_adds_missing_column() {
        let db = seeded();
        let registry = TableRegistry::new(&db, PREFIX);
        assert!(registry.mark_held("csv_import_acme_parts_1700000000"));
        let flagged: i64 = db
            .connection()
            .query_row(
                "SELECT SUM(is_flagged) FROM csv_import_acme_parts_1700000000",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(flagged, 2);

        assert!(registry.mark_held("csv_import_scratch"));
        assert!(
            db.table_columns("csv_import_scratch")
                .unwrap()
                .contains(&"is_flagged".to_string())
        );
        assert!(!registry.mark_held("csv_import_missing_1"));
        assert!(!registry.mark_held("wp_other_plugin_table"));
    }

    #[test]
    fn page_walks_rows_in_insertion_order() {
        let db = seeded();
        let registry = TableRegistry::new(&db, PREFIX);
        let page = registry
            .page("csv_import_acme_parts_1700000000", 2, 1)
            .expect("page");
        assert_eq!(page.total_rows, 2);
        assert_eq!(page.total_pages(), 2);
        assert_eq!(page.columns, vec!["id", "is_flagged", "sku"]);
        assert_eq!(page.rows, vec![vec!["2", "0", "B2"]]);
        assert!(matches!(
            registry.info("csv_import_gone_1"),
            Err(PipelineError::NotFound(_))
        ));
    }

    #[test]
    fn out_of_range_page_is_rejected() {
        let db = seeded();
        let registry = TableRegistry::new(&db, PREFIX);
        let err = registry
            .page("csv_import_acme_parts_1700000000", usize::MAX, 2)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(
            registry
                .page("csv_import_acme_parts_1700000000", 1, usize::MAX)
                .is_err()
        );
    }

    #[test]
    fn registry_never_claims_its_own_metadata_table() {
        let db = seeded();
        let registry = TableRegistry::new(&db, "import_");
        assert!(!registry.owns(META_TABLE));
        assert!(registry.list().unwrap().is_empty());
        assert!(!registry.delete(META_TABLE));
        assert!(registry.delete_all());
        assert!(db.table_exists(META_TABLE).unwrap());
    }
}
