#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use sku_reconcile::store::Database;
use tempfile::{TempDir, tempdir};

/// Reference catalog used by the matching tests.
///
/// Hollander numbers `HX-100` and `HX-200` resolve to inventory `INV-10` and
/// `INV-20`; `HX-300` exists but maps to no inventory.
pub const CATALOG_SQL: &str = r#"
CREATE TABLE hollander (hollander_id INTEGER PRIMARY KEY, hollander_no TEXT);
CREATE TABLE inventory_hollander_map (hollander_id INTEGER, inventory_id INTEGER);
CREATE TABLE inventory (inventory_id INTEGER PRIMARY KEY, inventory_no TEXT);
CREATE TABLE software (inventory_id INTEGER, mfr_software_no TEXT);
CREATE TABLE sales_demand_summary (SKU TEXT, Need_3mo INTEGER, Need_6mo INTEGER);
INSERT INTO hollander VALUES (1, 'HX-100'), (2, 'HX-200'), (3, 'HX-300');
INSERT INTO inventory_hollander_map VALUES (1, 10), (2, 20);
INSERT INTO inventory VALUES (10, 'INV-10'), (20, 'INV-20');
INSERT INTO software VALUES (10, 'SW-1'), (20, 'SW-2');
INSERT INTO sales_demand_summary VALUES ('inv-10', 3, 7), ('INV-20', 1, 2);
"#;

pub fn seed_catalog(db: &Database) {
    db.connection()
        .execute_batch(CATALOG_SQL)
        .expect("seed reference catalog");
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes a vendor file with the usual `Part No,Cost,Bin,Qty,Desc` headers.
    pub fn vendor_file(&self, name: &str, rows: &[[&str; 5]]) -> PathBuf {
        let mut contents = String::from("Part No,Cost,Bin,Qty,Desc\n");
        for row in rows {
            contents.push_str(&row.join(","));
            contents.push('\n');
        }
        self.write(name, &contents)
    }

    /// Opens (creating if needed) a database file inside the workspace.
    pub fn database(&self) -> (PathBuf, Database) {
        let path = self.join("reconcile.db");
        let db = Database::open(&path).expect("open database");
        (path, db)
    }
}
