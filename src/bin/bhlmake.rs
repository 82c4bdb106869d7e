//! `bhlmake` — encode one or more files into BlockHashLoc side-cars.

use bhl::config::EncodeConfig;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "bhlmake", version = "1.0.0", about = "Create BlockHashLoc (.bhl) side-car files")]
struct Cli {
    /// Files to index
    #[arg(required = true, num_args = 1..)]
    files: Vec<PathBuf>,

    /// Directory to write .bhl files into (default: next to each input)
    #[arg(short = 'd', long = "dest")]
    dest_dir: Option<PathBuf>,

    /// Block size in bytes
    #[arg(short = 'b', long = "block-size", default_value = "512")]
    block_size: u32,

    /// Keep processing remaining files after a failure
    #[arg(short = 'c', long = "continue")]
    continue_on_error: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = EncodeConfig {
        inputs: cli.files,
        dest_dir: cli.dest_dir,
        block_size: cli.block_size,
        continue_on_error: cli.continue_on_error,
    };

    let outcomes = bhl::encode_all(&config);
    let mut failures = 0usize;

    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => {
                let size = std::fs::metadata(&outcome.bhl_path).map(|m| m.len()).unwrap_or(0);
                let digest_prefix = bhl::bhl_format::BhlReader::read_file(&outcome.bhl_path)
                    .map(|f| hex::encode(&f.global_digest[..6]))
                    .unwrap_or_else(|_| "??????".into());
                println!(
                    "  indexed  {} -> {} ({} B, digest {}…)",
                    outcome.input.display(),
                    outcome.bhl_path.display(),
                    size,
                    digest_prefix,
                );
            }
            Err(e) => {
                failures += 1;
                eprintln!("  FAILED   {}: {e}", outcome.input.display());
            }
        }
    }

    println!(
        "Indexed {} of {} file(s) at block size {} B",
        outcomes.len() - failures,
        config.inputs.len(),
        config.block_size,
    );

    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
