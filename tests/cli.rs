mod common;

use std::{fs, path::Path};

use assert_cmd::Command;
use common::{TestWorkspace, seed_catalog};
use predicates::{prelude::*, str::contains};
use sku_reconcile::store::Database;

fn cmd(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sku-reconcile").expect("binary exists");
    cmd.arg("--database").arg(db);
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).expect("utf8 stdout")
}

fn sample_feed(ws: &TestWorkspace) -> std::path::PathBuf {
    ws.vendor_file(
        "feed.csv",
        &[
            ["hx-100", "10", "R1", "2", "Door"],
            ["HX-100", "12", "R2", "1", "Door"],
            ["HX-200", "7", "R3", "4", "Hood"],
            ["ZZ-999", "1", "R9", "1", "Mirror"],
        ],
    )
}

#[test]
fn headers_and_count_describe_the_file() {
    let ws = TestWorkspace::new();
    let feed = sample_feed(&ws);
    let db = ws.join("reconcile.db");

    cmd(&db)
        .args(["headers", "-i"])
        .arg(&feed)
        .assert()
        .success()
        .stdout("Part No\nCost\nBin\nQty\nDesc\n");

    cmd(&db)
        .args(["count", "-i"])
        .arg(&feed)
        .assert()
        .success()
        .stdout("4\n");
}

#[test]
fn preview_projects_through_mapping() {
    let ws = TestWorkspace::new();
    let feed = sample_feed(&ws);
    let db = ws.join("reconcile.db");

    cmd(&db)
        .args(["preview", "-i"])
        .arg(&feed)
        .args(["--map", "sku=Part No", "--map", "price=Cost", "--rows", "1"])
        .assert()
        .success()
        .stdout(contains("sku    | price"))
        .stdout(contains("hx-100 | 10"))
        .stdout(contains("HX-200").not());
}

#[test]
fn map_without_sku_is_rejected() {
    let ws = TestWorkspace::new();
    let feed = sample_feed(&ws);
    let db = ws.join("reconcile.db");

    cmd(&db)
        .args(["map", "-i"])
        .arg(&feed)
        .args(["--map", "price=Cost", "-o"])
        .arg(ws.join("mapped"))
        .assert()
        .failure()
        .stderr(contains("missing required field: sku"));
}

#[test]
fn map_import_match_export_round_trip() {
    let ws = TestWorkspace::new();
    let feed = sample_feed(&ws);
    let db_path = ws.join("reconcile.db");
    seed_catalog(&Database::open(&db_path).expect("db"));

    let mapped = stdout_of(
        cmd(&db_path)
            .args(["map", "-i"])
            .arg(&feed)
            .args([
                "--map",
                "sku=Part No",
                "--map",
                "quantity=Qty",
                "--group-by",
                "sku",
                "--aggregate",
                "quantity:sum",
                "--save-mapping",
            ])
            .arg(ws.join("mapping.json"))
            .arg("-o")
            .arg(ws.join("mapped")),
    );
    let mapped = mapped.trim().to_string();
    let contents = fs::read_to_string(&mapped).expect("mapped file");
    assert_eq!(contents, "sku,quantity\nhx-100,2\nHX-100,1\nHX-200,4\nZZ-999,1\n");
    assert!(ws.join("mapping.json").exists());

    let stats = stdout_of(
        cmd(&db_path)
            .args(["import", "-i", mapped.as_str(), "--vendor", "Acme Salvage", "--stats"])
            .arg(ws.join("stats.json")),
    );
    let stats: serde_json::Value = serde_json::from_str(&stats).expect("stats json");
    assert_eq!(stats["rows_imported"], 4);
    assert_eq!(stats["rows_skipped"], 0);
    let table = stats["table_name"].as_str().expect("table name").to_string();
    assert!(table.starts_with("csv_import_acme_salvage_"));

    cmd(&db_path)
        .args(["tables", "list"])
        .assert()
        .success()
        .stdout(contains(table.as_str()))
        .stdout(contains("Acme Salvage"))
        .stdout(contains("ephemeral"));

    cmd(&db_path)
        .args(["match", "-t", table.as_str()])
        .assert()
        .success()
        .stdout(contains("INV-10"))
        .stdout(contains("3 of 3 matched row(s) shown"));

    let export = ws.join("matched.csv");
    cmd(&db_path)
        .args(["export", "-t", table.as_str(), "--mode", "catalog", "-o"])
        .arg(&export)
        .assert()
        .success();
    let exported = fs::read_to_string(&export).expect("export");
    let mut lines = exported.lines();
    assert_eq!(
        lines.next(),
        Some(
            "Vendor SKU,Vendor Price,Vendor Location,Vendor Quantity,Vendor Description,\
             Hollander No,Hardware No,Software No,3 Month Demand,6 Month Demand"
        )
    );
    assert_eq!(lines.count(), 3);

    cmd(&db_path)
        .args(["tables", "hold", table.as_str()])
        .assert()
        .success();
    cmd(&db_path)
        .args(["tables", "view", table.as_str(), "--per-page", "2"])
        .assert()
        .success()
        .stdout(contains("page 1 of 2 (4 row(s))"));

    cmd(&db_path)
        .args(["tables", "drop", table.as_str()])
        .assert()
        .success();
    cmd(&db_path)
        .args(["tables", "list"])
        .assert()
        .success()
        .stdout("No import tables found.\n");
}

#[test]
fn registry_refuses_foreign_tables() {
    let ws = TestWorkspace::new();
    let db_path = ws.join("reconcile.db");
    Database::open(&db_path)
        .expect("db")
        .connection()
        .execute_batch("CREATE TABLE inventory (inventory_id INTEGER);")
        .expect("seed");

    cmd(&db_path)
        .args(["tables", "drop", "inventory"])
        .assert()
        .failure()
        .stderr(contains("Failed to drop 'inventory'"));
    cmd(&db_path)
        .args(["tables", "drop-all"])
        .assert()
        .failure()
        .stderr(contains("--yes"));
    assert!(
        Database::open(&db_path)
            .expect("db")
            .table_exists("inventory")
            .expect("exists")
    );
}

#[test]
fn settings_file_overrides_prefix() {
    let ws = TestWorkspace::new();
    let db_path = ws.join("reconcile.db");
    let mapped = ws.write("mapped.csv", "sku\nA1\n");
    let config = ws.write(
        "settings.yaml",
        &format!(
            "database: {}\ntable_prefix: vendor_feed_\n",
            db_path.display()
        ),
    );

    let stats = stdout_of(
        Command::cargo_bin("sku-reconcile")
            .expect("binary exists")
            .arg("--config")
            .arg(&config)
            .args(["import", "--vendor", "Acme", "--permanent", "-i"])
            .arg(&mapped),
    );
    assert!(stats.contains("\"table_name\": \"vendor_feed_acme_"));
    assert!(stats.contains("\"is_permanent\": true"));

    Command::cargo_bin("sku-reconcile")
        .expect("binary exists")
        .arg("--config")
        .arg(&config)
        .args(["tables", "list"])
        .assert()
        .success()
        .stdout(contains("vendor_feed_acme_"))
        .stdout(contains("permanent"));
}
