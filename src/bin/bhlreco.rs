//! `bhlreco` — recover files from raw images using BlockHashLoc side-cars.

use bhl::config::RecoverConfig;
use bhl::hash_index::HashIndexStore;
use bhl::MemoryHashIndex;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "bhlreco", version = "1.0.0", about = "Recover files from raw images using .bhl side-cars")]
struct Cli {
    /// Raw images / devices / fragments to scan
    #[arg(required_unless_present = "test_only", num_args = 0..)]
    images: Vec<PathBuf>,

    /// BlockHashLoc side-car files describing what to recover
    #[arg(long = "bhl", required = true, num_args = 1..)]
    bhl: Vec<PathBuf>,

    /// Directory to write recovered files into
    #[arg(short = 'd', long = "dest", default_value = ".")]
    dest_dir: PathBuf,

    /// SQLite database path for the hash index, or ":memory:"/omit for an
    /// in-process index (requires the `persist` build feature otherwise)
    #[arg(long = "db")]
    db: Option<String>,

    /// Byte offset to start scanning each image from
    #[arg(short = 'o', long = "offset", default_value = "0")]
    offset: u64,

    /// Scan step in bytes (default: GCD of the loaded block sizes)
    #[arg(long = "step")]
    step: Option<u32>,

    /// Validate the .bhl files only; do not scan or recover
    #[arg(short = 't', long = "test")]
    test_only: bool,
}

/// `-bhl`, `-db`, and `-st` are single-dash multi-letter flags in the
/// documented CLI surface, left over from the original tool's
/// `argparse(prefix_chars='-+')` convention. clap's derive `short` only
/// accepts a single character, so rewrite these exact tokens to their
/// double-dash long form before handing argv to clap; every other flag
/// (`-d`, `-o`, `-t`, and the `--long` spellings) passes through untouched.
fn normalize_args(args: impl Iterator<Item = String>) -> Vec<String> {
    args.map(|arg| match arg.as_str() {
        "-bhl" => "--bhl".to_string(),
        "-db" => "--db".to_string(),
        "-st" => "--step".to_string(),
        _ => arg,
    })
    .collect()
}

fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_args(std::env::args()));

    if cli.test_only {
        return run_test(&cli.bhl);
    }

    let config = RecoverConfig {
        images: cli.images,
        bhl_files: cli.bhl,
        dest_dir: cli.dest_dir,
        db_path: cli.db,
        offset: cli.offset,
        step: cli.step,
        test_only: false,
    };

    #[cfg(feature = "persist")]
    {
        if let Some(path) = &config.db_path {
            if path != ":memory:" {
                let mut index = match bhl::hash_index::sqlite::SqliteHashIndex::open(path) {
                    Ok(idx) => idx,
                    Err(e) => {
                        eprintln!("failed to open hash index database {path}: {e}");
                        return ExitCode::FAILURE;
                    }
                };
                return run_recovery(&config, &mut index);
            }
        }
    }

    #[cfg(not(feature = "persist"))]
    {
        if let Some(path) = &config.db_path {
            if path != ":memory:" {
                eprintln!(
                    "warning: built without the `persist` feature; using an in-memory index instead of {path}"
                );
            }
        }
    }

    let mut index = MemoryHashIndex::new();
    run_recovery(&config, &mut index)
}

fn run_recovery<S: HashIndexStore>(config: &RecoverConfig, index: &mut S) -> ExitCode {
    let mut last_pct = u64::MAX;
    let mut progress = |bytes: u64, placed: usize| {
        let pct = bytes / (8 * 1024 * 1024);
        if pct != last_pct {
            last_pct = pct;
            eprintln!("  scanning... {bytes} B read, {placed} block(s) placed");
        }
    };

    let outcomes = match bhl::recover(config, index, Some(&mut progress)) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("recovery failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut fully_recovered = 0usize;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => {
                fully_recovered += 1;
                println!(
                    "  OK         {}  ({}/{} block(s) placed)",
                    outcome.output_path.display(),
                    report.placed_blocks,
                    report.total_blocks,
                );
            }
            Err(e) => {
                println!("  INCOMPLETE {}: {e}", outcome.output_path.display());
            }
        }
    }

    println!("Recovered {}/{} file(s) fully", fully_recovered, outcomes.len());

    if fully_recovered == outcomes.len() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_test(paths: &[PathBuf]) -> ExitCode {
    let outcomes = bhl::test_bhl_files(paths);
    let mut all_ok = true;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(bhl_file) => {
                let mtime_str = bhl_file
                    .metadata
                    .mtime()
                    .and_then(|secs| chrono::DateTime::from_timestamp(secs as i64, 0))
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| "unknown".into());
                println!(
                    "  VALID    {}  (block size {} B, {} block(s), mtime {}, digest {}…)",
                    outcome.path.display(),
                    bhl_file.block_size,
                    bhl_file.block_count(),
                    mtime_str,
                    hex::encode(&bhl_file.global_digest[..6]),
                );
            }
            Err(e) => {
                all_ok = false;
                eprintln!("  INVALID  {}: {e}", outcome.path.display());
            }
        }
    }

    if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
