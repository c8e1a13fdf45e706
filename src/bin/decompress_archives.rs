// src/bin/decompress_archives.rs
//
// Decompress every .gz hour file under a raw data root, in parallel.
//
// Usage:
//   cargo run --bin decompress_archives -- --root raw/node_fills_by_block --remove-source

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use twap_ingest::services::archive::decompress_all;

#[derive(Parser, Debug)]
#[command(name = "decompress_archives")]
#[command(about = "Decompress gzip'd hour files before generate_trade_csvs")]
struct Args {
    /// Directory searched recursively for .gz files
    #[arg(long, env = "RAW_DATA_DIR", default_value = "./raw")]
    root: PathBuf,

    /// Delete each archive after it decompresses successfully
    #[arg(long)]
    remove_source: bool,

    /// Decompress again even when the output file already exists
    #[arg(long)]
    overwrite: bool,

    /// Worker threads (defaults to one per core)
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    twap_ingest::init_tracing(twap_ingest::DEFAULT_LOG_FILTER);
    let args = Args::parse();

    if let Some(threads) = args.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
            eprintln!("Error: cannot size thread pool: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let report = match decompress_all(&args.root, args.remove_source, args.overwrite) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: cannot scan {}: {}", args.root.display(), e);
            return ExitCode::FAILURE;
        }
    };

    println!("Decompressed:    {}", report.decompressed.len());
    println!("Already present: {}", report.already_present);
    println!("Failed:          {}", report.failed.len());
    for (archive, error) in &report.failed {
        println!("  {}: {}", archive.display(), error);
    }

    if report.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
