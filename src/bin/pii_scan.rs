//! PII scanner for extracted document text
//!
//! Reads the JSON produced by the text extraction step, runs the detection
//! pipeline with the built-in pattern detector and writes the detections next
//! to the input (or into `--out`).
//!
//! Usage:
//!   cargo run --bin pii_scan -- contract_text.json
//!   cargo run --bin pii_scan -- contract_text.json --config pipeline.json
//!   cargo run --bin pii_scan -- contract_text.json --slots 4 --out results/
//!
//! Set `RUST_LOG=debug` for per-slot and per-page logging.

use pii_oxide::config::PipelineConfig;
use pii_oxide::detectors::StandardDetectorFactory;
use pii_oxide::document::Document;
use pii_oxide::language::ScriptLanguageIdentifier;
use pii_oxide::runner::PipelineRunner;
use std::fs;
use std::path::{Path, PathBuf};

struct ScanArgs {
    inputs: Vec<PathBuf>,
    config_file: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    slots: Option<usize>,
}

impl ScanArgs {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().collect();
        let mut inputs = Vec::new();
        let mut config_file = None;
        let mut out_dir = None;
        let mut slots = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    i += 1;
                    let value = args.get(i).ok_or("--config needs a path")?;
                    config_file = Some(PathBuf::from(value));
                },
                "--out" | "-o" => {
                    i += 1;
                    let value = args.get(i).ok_or("--out needs a directory")?;
                    out_dir = Some(PathBuf::from(value));
                },
                "--slots" | "-s" => {
                    i += 1;
                    let value = args.get(i).ok_or("--slots needs a number")?;
                    let count = value
                        .parse::<usize>()
                        .map_err(|_| format!("invalid slot count '{}'", value))?;
                    slots = Some(count);
                },
                flag if flag.starts_with('-') => {
                    return Err(format!("unknown option '{}'", flag));
                },
                path => inputs.push(PathBuf::from(path)),
            }
            i += 1;
        }

        if inputs.is_empty() {
            return Err("no input files".to_string());
        }

        Ok(Self {
            inputs,
            config_file,
            out_dir,
            slots,
        })
    }
}

/// `contract_text.json` → `contract_detections.json`
fn output_path(input: &Path, out_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let stem = stem.strip_suffix("_text").unwrap_or(&stem);
    let file_name = format!("{}_detections.json", stem);

    match out_dir {
        Some(dir) => dir.join(file_name),
        None => input.with_file_name(file_name),
    }
}

fn scan(runner: &PipelineRunner, input: &Path, out_dir: Option<&Path>) -> pii_oxide::Result<PathBuf> {
    let document = Document::from_json_file(input)?;
    let (scanned, summary) = runner.run_with_summary(&document)?;

    let output = output_path(input, out_dir);
    fs::write(&output, scanned.report().to_json_pretty()?)?;
    println!("✓ {} → {} ({})", input.display(), output.display(), summary);
    Ok(output)
}

fn main() {
    env_logger::init();

    let args = match ScanArgs::from_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Usage: pii_scan <input.json>... [--config FILE] [--out DIR] [--slots N]");
            std::process::exit(2);
        },
    };

    let mut config = match &args.config_file {
        Some(path) => match PipelineConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("✗ Failed to load {}: {}", path.display(), e);
                std::process::exit(2);
            },
        },
        None => PipelineConfig::default(),
    };
    if let Some(slots) = args.slots {
        config = config.with_slot_count(slots);
    }

    if let Some(dir) = &args.out_dir {
        if let Err(e) = fs::create_dir_all(dir) {
            eprintln!("✗ Cannot create {}: {}", dir.display(), e);
            std::process::exit(2);
        }
    }

    let factory = StandardDetectorFactory::new(config.clone());
    let runner = match PipelineRunner::new(config, Box::new(ScriptLanguageIdentifier), Box::new(factory)) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(2);
        },
    };

    let mut failed = 0;
    for input in &args.inputs {
        if let Err(e) = scan(&runner, input, args.out_dir.as_deref()) {
            eprintln!("✗ {}: {}", input.display(), e);
            failed += 1;
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
}
