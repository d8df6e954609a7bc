fn main() {
    if let Err(err) = sku_reconcile::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
