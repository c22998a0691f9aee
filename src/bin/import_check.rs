//! Import a GnuCash XML book into a fresh SQLite store and print the result
//!
//! Run with: cargo run --bin import_check -- <book.gnucash> <target.db> [options.json]

use anyhow::{bail, Context, Result};
use gnucash_import::{GnuCashImport, ImportOptions, ImportProgress};
use std::path::PathBuf;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 || args.len() > 3 {
        bail!("usage: import_check <book.gnucash> <target.db> [options.json]");
    }
    let book_path = PathBuf::from(&args[0]);
    let db_path = PathBuf::from(&args[1]);
    let options = match args.get(2) {
        Some(path) => ImportOptions::from_json_file(&PathBuf::from(path))?,
        None => ImportOptions::default(),
    };

    println!("=== GnuCash Import Check ===\n");
    println!("Source: {}", book_path.display());
    println!("Target: {}", db_path.display());
    println!("Base currency: {}\n", options.base_currency);

    let mut importer = GnuCashImport::new(options)?;

    let mut last_stage = None;
    let mut progress = |p: &ImportProgress| {
        if last_stage != Some(p.stage) {
            println!("[{}] {}", p.stage.as_str(), p.message);
            last_stage = Some(p.stage);
        }
    };
    let result = importer.import_into_new_store(&book_path, &db_path, Some(&mut progress));

    let notices = importer.notices();
    if !notices.is_empty() {
        println!("\n=== Notices ===");
        print!("{}", notices);
    }

    let (engine, summary) =
        result.with_context(|| format!("import into {} failed", db_path.display()))?;
    println!("\n=== Summary ===");
    println!("Accounts created:   {}", summary.accounts);
    println!("Accounts skipped:   {}", summary.ignored_accounts);
    println!("Accounts unlinked:  {}", summary.unlinked_accounts);
    println!("Currencies:         {}", summary.currencies);
    println!("Securities:         {}", summary.securities);
    println!("Prices:             {}", summary.prices);
    println!("Transactions:       {}", summary.transactions);
    println!("Splits:             {}", summary.splits);
    println!("Warnings:           {}", summary.warnings);

    println!("\n=== Stored ===");
    println!("Accounts: {}", engine.account_count()?);
    println!("Transactions: {}", engine.transaction_count()?);

    Ok(())
}
