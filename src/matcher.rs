//! Resolves vendor SKUs against the reference chain:
//! import table → identifier (Hollander) table → identifier/inventory map →
//! inventory → optionally software and demand-summary tables.
//!
//! Identifier comparisons trim both sides and use `COLLATE NOCASE`. The
//! default is inner joins, so rows that do not resolve through the whole chain
//! are left out unless `include_unmatched` is set.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, PipelineResult},
    mapping::{DESCRIPTION, LOCATION, PRICE, QUANTITY},
    store::{Database, quote_ident},
};

/// Names of the reference tables and the columns the join chain uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceCatalog {
    /// Schema the reference tables live in (an attached database), if not `main`.
    pub schema: Option<String>,
    pub identifier_table: String,
    pub identifier_id: String,
    pub identifier_number: String,
    pub map_table: String,
    pub inventory_table: String,
    pub inventory_id: String,
    pub inventory_number: String,
    pub software_table: String,
    pub software_number: String,
    pub demand_table: String,
    pub demand_sku: String,
    pub demand_short_term: String,
    pub demand_long_term: String,
}

impl Default for ReferenceCatalog {
    fn default() -> Self {
        Self {
            schema: None,
            identifier_table: "hollander".into(),
            identifier_id: "hollander_id".into(),
            identifier_number: "hollander_no".into(),
            map_table: "inventory_hollander_map".into(),
            inventory_table: "inventory".into(),
            inventory_id: "inventory_id".into(),
            inventory_number: "inventory_no".into(),
            software_table: "software".into(),
            software_number: "mfr_software_no".into(),
            demand_table: "sales_demand_summary".into(),
            demand_sku: "SKU".into(),
            demand_short_term: "Need_3mo".into(),
            demand_long_term: "Need_6mo".into(),
        }
    }
}

impl ReferenceCatalog {
    fn table(&self, name: &str) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(name)),
            None => quote_ident(name),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Every import column plus the Hollander number and mapped inventory SKU.
    #[default]
    Basic,
    /// Denormalized vendor + catalog view including software and demand.
    Catalog,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOptions {
    pub mode: MatchMode,
    /// Use LEFT JOINs so rows that fail to resolve still appear.
    pub include_unmatched: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub table_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub total: usize,
}

impl MatchResult {
    /// Value of `column` in row `row`, if both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(idx).map(String::as_str)
    }
}

pub fn match_table(
    db: &Database,
    table: &str,
    sku_column: &str,
    catalog: &ReferenceCatalog,
    options: &MatchOptions,
) -> PipelineResult<MatchResult> {
    // Re-checked on every call: the registry may have dropped the table since import.
    if !db.table_exists(table)? {
        return Err(PipelineError::not_found(format!(
            "table does not exist: {table}"
        )));
    }
    let columns = db.table_columns(table)?;
    let Some(sku_column) = columns
        .iter()
        .find(|column| column.eq_ignore_ascii_case(sku_column))
    else {
        return Err(PipelineError::validation(format!(
            "column '{sku_column}' does not exist in table '{table}'"
        )));
    };

    let sql = build_query(table, sku_column, &columns, catalog, options);
    debug!("Executing match query: {sql}");
    let (result_columns, rows) = db.query_text(&sql, [])?;

    info!("Matched {} row(s) in '{}'", rows.len(), table);
    Ok(MatchResult {
        table_name: table.to_string(),
        total: rows.len(),
        columns: result_columns,
        rows,
    })
}

fn build_query(
    table: &str,
    sku_column: &str,
    import_columns: &[String],
    catalog: &ReferenceCatalog,
    options: &MatchOptions,
) -> String {
    let join = if options.include_unmatched {
        "LEFT JOIN"
    } else {
        "INNER JOIN"
    };
    let sku = format!("n.{}", quote_ident(sku_column));
    let q = quote_ident;

    let select = match options.mode {
        MatchMode::Basic => format!(
            "n.*, h.{} AS {}, i.{} AS {}",
            q(&catalog.identifier_number),
            q("hollander_no"),
            q(&catalog.inventory_number),
            q("mapped_sku")
        ),
        MatchMode::Catalog => {
            let vendor = |field: &str, label: &str| {
                if import_columns.iter().any(|c| c == field) {
                    format!("n.{} AS {}", q(field), q(label))
                } else {
                    format!("NULL AS {}", q(label))
                }
            };
            [
                format!("{sku} AS {}", q("Vendor SKU")),
                vendor(PRICE, "Vendor Price"),
                vendor(LOCATION, "Vendor Location"),
                vendor(QUANTITY, "Vendor Quantity"),
                vendor(DESCRIPTION, "Vendor Description"),
                format!("h.{} AS {}", q(&catalog.identifier_number), q("Hollander No")),
                format!("i.{} AS {}", q(&catalog.inventory_number), q("Hardware No")),
                format!("s.{} AS {}", q(&catalog.software_number), q("Software No")),
                format!("d.{} AS {}", q(&catalog.demand_short_term), q("3 Month Demand")),
                format!("d.{} AS {}", q(&catalog.demand_long_term), q("6 Month Demand")),
            ]
            .join(",\n       ")
        }
    };

    let mut sql = format!(
        "SELECT DISTINCT {select}\n\
         FROM {table} n\n\
         {join} {h_table} h ON TRIM({sku}) = TRIM(h.{h_number}) COLLATE NOCASE\n\
         {join} {map_table} m ON h.{h_id} = m.{h_id}\n\
         {join} {i_table} i ON m.{i_id} = i.{i_id}",
        table = q(table),
        h_table = catalog.table(&catalog.identifier_table),
        h_number = q(&catalog.identifier_number),
        map_table = catalog.table(&catalog.map_table),
        h_id = q(&catalog.identifier_id),
        i_table = catalog.table(&catalog.inventory_table),
        i_id = q(&catalog.inventory_id),
    );

    if options.mode == MatchMode::Catalog {
        sql.push_str(&format!(
            "\n{join} {s_table} s ON i.{i_id} = s.{i_id}\
             \n{join} {d_table} d ON TRIM(d.{d_sku}) = TRIM(i.{i_number}) COLLATE NOCASE",
            s_table = catalog.table(&catalog.software_table),
            i_id = q(&catalog.inventory_id),
            d_table = catalog.table(&catalog.demand_table),
            d_sku = q(&catalog.demand_sku),
            i_number = q(&catalog.inventory_number),
        ));
    }

    sql.push_str(&format!("\nWHERE {sku} IS NOT NULL"));
    sql
}
