//! fedplan - plan optimizer command-line interface
//!
//! Reads SQL statements, plans them against a JSON catalog and prints the
//! optimized plan trees.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use fedplan::metadata::InMemoryCatalog;
use fedplan::planner::{PlanError, PlannerConfig, QueryPlanner};
use fedplan::sql::Parser;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut catalog_path = PathBuf::from("catalog.json");
    let mut verbose = false;
    let mut trace = false;
    let mut explain = false;
    let mut execute: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--catalog" => {
                i += 1;
                if i < args.len() {
                    catalog_path = PathBuf::from(&args[i]);
                }
            }
            "-e" | "--execute" => {
                i += 1;
                if i < args.len() {
                    execute = Some(args[i].clone());
                }
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "--trace" => {
                trace = true;
            }
            "--explain" => {
                explain = true;
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("fedplan v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
        }
        i += 1;
    }

    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let catalog = match InMemoryCatalog::from_path(&catalog_path) {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            eprintln!("Error loading catalog {}: {}", catalog_path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let config = PlannerConfig::default().with_trace(trace);
    let planner = QueryPlanner::with_config(catalog.clone(), catalog, config);

    // Statements from -e, otherwise from stdin.
    let input = match execute {
        Some(sql) => sql,
        None => {
            let mut buf = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                eprintln!("Error reading stdin: {}", e);
                return ExitCode::FAILURE;
            }
            buf
        }
    };

    let mut failed = false;
    for sql in input.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        match plan_statement(&planner, sql, explain) {
            Ok(text) => println!("{}", text),
            Err(e) if e.is_user_visible() => {
                eprintln!("Error: {}", e);
                failed = true;
            }
            Err(e) => {
                eprintln!("Internal error: {}", e);
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_help() {
    println!("fedplan - rule-based plan optimizer for federated SQL");
    println!();
    println!("Usage: fedplan [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --catalog PATH     JSON catalog of models and tables (default: catalog.json)");
    println!("  -e, --execute SQL      Plan SQL and exit (default: read statements from stdin)");
    println!("  -v, --verbose          Log every rule execution");
    println!("      --trace            Print the plan after each rule");
    println!("      --explain          Print the bound plan and the rules applied");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Examples:");
    println!("  fedplan -c catalog.json -e 'SELECT id FROM orders WHERE amount > 10'");
    println!("  fedplan -c catalog.json --trace < queries.sql");
}

fn plan_statement(planner: &QueryPlanner, sql: &str, explain: bool) -> Result<String, PlanError> {
    if explain {
        return planner.explain(sql);
    }
    let stmt = Parser::parse(sql)?;
    let optimized = planner.plan(&stmt)?;

    let mut out = String::new();
    for step in &optimized.record.traces {
        out.push_str(&format!("-- after {}\n{}\n", step.rule, step.after));
    }
    out.push_str(&optimized.plan.to_string());
    Ok(out)
}
