//! Catalog Lint - offline validation for vault catalog files
//!
//! Run with: cargo run --bin catalog-check -- path/to/catalog.json
//!
//! The registration tool appends entries by hand; this checks a file
//! before it ships: parseable JSON, valid addresses, known statuses and
//! categories, no duplicate vault addresses per chain.

use alloy_primitives::Address;
use serde_json::Value;
use std::collections::HashSet;
use std::process::ExitCode;
use std::str::FromStr;

const STATUSES: &[&str] = &["new", "active", "endorsed", "withdraw", "disabled", "stealth"];
const CATEGORIES: &[&str] = &["experimental", "weird", "community"];
const ABIS: &[&str] = &["legacy", "v3"];

fn check_address(entry: &Value, field: &str, errors: &mut Vec<String>, slug: &str) {
    match entry.get(field).and_then(Value::as_str) {
        Some(s) if Address::from_str(s).is_ok() => {}
        Some(s) => errors.push(format!("{}: {} is not an address: {}", slug, field, s)),
        None => errors.push(format!("{}: missing {}", slug, field)),
    }
}

fn check_enum(entry: &Value, field: &str, allowed: &[&str], errors: &mut Vec<String>, slug: &str) {
    match entry.get(field).and_then(Value::as_str) {
        Some(s) if allowed.contains(&s) => {}
        Some(s) => errors.push(format!(
            "{}: {} '{}' not one of {:?}",
            slug, field, s, allowed
        )),
        None => errors.push(format!("{}: missing {}", slug, field)),
    }
}

fn main() -> ExitCode {
    println!();
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                 VAULTSCOPE CATALOG LINT                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: catalog-check <catalog.json>");
        return ExitCode::FAILURE;
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("✗ cannot read {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let parsed: Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("✗ not valid JSON: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let Some(entries) = parsed.as_object() else {
        eprintln!("✗ catalog must be an object keyed by slug");
        return ExitCode::FAILURE;
    };

    let mut errors: Vec<String> = Vec::new();
    let mut seen: HashSet<(u64, String)> = HashSet::new();

    for (slug, entry) in entries {
        check_address(entry, "address", &mut errors, slug);
        check_address(entry, "want", &mut errors, slug);
        check_enum(entry, "status", STATUSES, &mut errors, slug);
        check_enum(entry, "category", CATEGORIES, &mut errors, slug);
        check_enum(entry, "abi", ABIS, &mut errors, slug);

        let chain = entry.get("chain_id").and_then(Value::as_u64);
        if chain.is_none() {
            errors.push(format!("{}: missing chain_id", slug));
        }
        if entry.get("want_decimals").and_then(Value::as_u64).is_none() {
            errors.push(format!("{}: missing want_decimals", slug));
        }

        if let (Some(chain), Some(address)) =
            (chain, entry.get("address").and_then(Value::as_str))
        {
            if !seen.insert((chain, address.to_lowercase())) {
                errors.push(format!("{}: duplicate address on chain {}", slug, chain));
            }
        }
    }

    println!("Entries checked: {}", entries.len());
    if errors.is_empty() {
        println!("✓ catalog is clean");
        ExitCode::SUCCESS
    } else {
        println!("✗ {} problems:", errors.len());
        for e in &errors {
            println!("  • {}", e);
        }
        ExitCode::FAILURE
    }
}
