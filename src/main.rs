//! chemlog Command-Line Interface
//!
//! Scans one or more computational chemistry log files and prints one JSON
//! object per file.
//!
//! # Usage
//!
//! ```bash
//! # Scan CASTEP logs with the configured defaults
//! chemlog mgo.castep si.castep
//!
//! # Pick the format explicitly and enable the stock extractors
//! chemlog --format cp2k --stock water.cpout
//!
//! # Write a settings template to ./chemlog.cfg
//! chemlog ci chemlog.cfg
//! ```
//!
//! Each file is scanned independently. A file that fails is reported on
//! stderr and the remaining files are still scanned; the exit code is 1 if
//! any file failed.

use chemlog::sections::stock_registry;
use chemlog::settings::{SettingsManager, CONFIG_FILE_NAME};
use chemlog::{LogFormat, ScanEngine};
use log::{error, info, warn};
use serde_json::json;
use std::env;
use std::path::{Path, PathBuf};
use std::process;

/// Parsed command line for a scan.
struct ScanArgs {
    format: Option<String>,
    stock: bool,
    config: Option<PathBuf>,
    files: Vec<PathBuf>,
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        process::exit(1);
    }

    if args[1] == "-h" || args[1] == "--help" {
        print_usage(&args[0]);
        return;
    }

    if args[1] == "ci" {
        init_logger(log::LevelFilter::Info);
        let target = args.get(2).map(String::as_str).unwrap_or(CONFIG_FILE_NAME);
        match SettingsManager::create_template(Path::new(target)) {
            Ok(()) => println!("Settings template written to {}", target),
            Err(e) => {
                eprintln!("Error creating settings template: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let scan_args = match parse_args(&args[1..]) {
        Ok(scan_args) => scan_args,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    let settings = match &scan_args.config {
        Some(path) => SettingsManager::load_from(path),
        None => SettingsManager::load(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    init_logger(settings.level_filter());
    info!("Using configuration from {}", settings.config_source());

    let format = match resolve_format(&settings, scan_args.format.as_deref()) {
        Ok(format) => format,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            process::exit(1);
        }
    };

    let engine = if scan_args.stock {
        ScanEngine::with_registry(format, stock_registry())
    } else {
        ScanEngine::new(format)
    };

    let mut failures = 0;
    for path in &scan_args.files {
        match engine.parse_file(path) {
            Ok(record) => {
                let output = json!({ "file": path.display().to_string(), "record": record });
                println!("{}", output);
            }
            Err(e) if e.is_incomplete_run() => {
                warn!("{}", e);
                failures += 1;
            }
            Err(e) => {
                error!("{}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        eprintln!("{} of {} file(s) failed", failures, scan_args.files.len());
        process::exit(1);
    }
}

fn init_logger(level: log::LevelFilter) {
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis()
        .init();
}

fn parse_args(args: &[String]) -> Result<ScanArgs, String> {
    let mut scan_args = ScanArgs {
        format: None,
        stock: false,
        config: None,
        files: Vec::new(),
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-f" | "--format" => {
                let name = iter.next().ok_or("--format needs a value")?;
                scan_args.format = Some(name.clone());
            }
            "-c" | "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                scan_args.config = Some(PathBuf::from(path));
            }
            "-s" | "--stock" => scan_args.stock = true,
            flag if flag.starts_with('-') => return Err(format!("unknown option {}", flag)),
            file => scan_args.files.push(PathBuf::from(file)),
        }
    }

    if scan_args.files.is_empty() {
        return Err("no input files".to_string());
    }
    Ok(scan_args)
}

/// The configured format, or the named preset when `--format` was given.
///
/// An explicit preset still honours `case_insensitive` but not trigger
/// overrides, which are written for one particular format.
fn resolve_format(settings: &SettingsManager, name: Option<&str>) -> Result<LogFormat, String> {
    match name {
        None => settings.log_format().map_err(|e| e.to_string()),
        Some(name) => {
            let format =
                LogFormat::by_name(name).ok_or_else(|| format!("unknown log format '{}'", name))?;
            if settings.settings().scan.case_insensitive {
                Ok(format.ignore_case())
            } else {
                Ok(format)
            }
        }
    }
}

fn print_usage(program_name: &str) {
    eprintln!("chemlog - structured data from computational chemistry logs");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {} [options] <log_file>...", program_name);
    eprintln!("                    Scan log files and print one JSON record per file");
    eprintln!();
    eprintln!("  {} ci [{}]", program_name, CONFIG_FILE_NAME);
    eprintln!("                    Create a settings template file");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -f, --format <name>   castep, cp2k or tight-binding");
    eprintln!("  -s, --stock           Also run the stock extractors (SCF steps,");
    eprintln!("                        eigenvalues, timings, coordinates)");
    eprintln!("  -c, --config <file>   Read settings from this file only");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} mgo.castep", program_name);
    eprintln!("  {} --format cp2k --stock water.cpout", program_name);
}
