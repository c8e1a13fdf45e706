// src/bin/generate_trade_csvs.rs
//
// Raw hourly exports -> per-day trades/participants CSV pairs ready for bulk_import_trades.
//
// Usage:
//   cargo run --bin generate_trade_csvs -- --source-dir raw/node_trades --source-dir raw/node_fills_by_block
//   cargo run --bin generate_trade_csvs -- --source-dir raw/node_trades --start-date 20251006 --start-id 900001
//   cargo run --bin generate_trade_csvs -- --dry-run

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use twap_ingest::config::Settings;
use twap_ingest::models::DayKey;
use twap_ingest::parsers::SourceFormat;
use twap_ingest::services::day_processor::{generate, IngestOptions, RunSummary, PREVIEW_FILE_NAME};
use twap_ingest::services::id_allocator::IdAllocator;
use twap_ingest::services::progress::ProgressReporter;

#[derive(Parser, Debug)]
#[command(name = "generate_trade_csvs")]
#[command(about = "Convert raw TWAP fill exports into bulk-loadable day CSVs")]
struct Args {
    /// Raw source directory (repeatable). Defaults to every format directory under RAW_DATA_DIR
    #[arg(long = "source-dir")]
    source_dirs: Vec<PathBuf>,

    /// Source format; inferred from the directory name when omitted
    #[arg(long)]
    format: Option<SourceFormat>,

    /// CSV output root (one sub-directory per format)
    #[arg(long, env = "CSV_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    #[arg(long, env = "TRADE_ID_TRACKING_FILE")]
    tracking_file: Option<PathBuf>,

    /// First id to allocate, overriding the tracking file
    #[arg(long)]
    start_id: Option<i64>,

    /// First day to process (YYYYMMDD, inclusive)
    #[arg(long)]
    start_date: Option<DayKey>,

    /// Last day to process (YYYYMMDD, inclusive)
    #[arg(long)]
    end_date: Option<DayKey>,

    /// Parse and filter only; write a preview instead of CSVs and leave the tracking file alone
    #[arg(long)]
    dry_run: bool,

    /// Sample trades per day in the dry-run preview
    #[arg(long, default_value = "5")]
    preview_limit: usize,

    /// Emit trades that are not a clean buyer/seller pair
    #[arg(long)]
    accept_incomplete: bool,

    /// Record unreadable days and continue instead of aborting
    #[arg(long)]
    keep_going: bool,
}

fn resolve_sources(
    args: &Args,
    raw_data_dir: &std::path::Path,
) -> Result<Vec<(PathBuf, SourceFormat)>, Box<dyn std::error::Error>> {
    if args.source_dirs.is_empty() {
        let sources: Vec<_> = SourceFormat::ALL
            .into_iter()
            .filter(|format| args.format.is_none_or(|f| f == *format))
            .map(|format| (raw_data_dir.join(format.dir_name()), format))
            .filter(|(dir, _)| dir.is_dir())
            .collect();
        if sources.is_empty() {
            return Err(format!("no source directories found under {}", raw_data_dir.display()).into());
        }
        return Ok(sources);
    }

    args.source_dirs
        .iter()
        .map(|dir| {
            let format = args
                .format
                .or_else(|| SourceFormat::infer_from_path(dir))
                .ok_or_else(|| format!("cannot infer format of {}, pass --format", dir.display()))?;
            Ok::<_, Box<dyn std::error::Error>>((dir.clone(), format))
        })
        .collect()
}

fn print_summary(summary: &RunSummary, progress: &ProgressReporter, dry_run: bool) {
    let t = &summary.totals;
    println!();
    println!("=== Generation summary{} ===", if dry_run { " (dry run)" } else { "" });
    println!("Days processed:      {}", summary.days_processed);
    println!("Days written:        {}", summary.days_written);
    println!("Files read:          {}", t.files);
    println!("Lines read:          {}", t.lines);
    println!("TWAP trades:         {}", t.accepted);
    println!("Skipped (non-TWAP):  {}", t.skipped_non_twap);
    println!("Incomplete rejected: {}", t.incomplete);
    println!("Invalid fields:      {}", t.invalid_fields);
    println!("Parse errors:        {}", t.parse_errors);
    if let (Some(first), Some(last)) = (summary.first_id, summary.last_id) {
        println!("Id range:            {}..={}", first, last);
    }
    if !summary.failed_days.is_empty() {
        let days: Vec<String> = summary.failed_days.iter().map(|d| d.to_string()).collect();
        println!("Failed days:         {}", days.join(", "));
    }
    println!(
        "Elapsed:             {:.1}s ({:.0} lines/s)",
        progress.elapsed().as_secs_f64(),
        progress.rate(t.lines)
    );
}

fn main() -> ExitCode {
    twap_ingest::init_tracing(twap_ingest::DEFAULT_LOG_FILTER);
    let args = Args::parse();

    match run(&args) {
        Ok(summary) if summary.has_errors() => {
            eprintln!("Completed with errors");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Generation aborted: {}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    let sources = resolve_sources(args, &settings.raw_data_dir)?;
    let output_dir = args.output_dir.clone().unwrap_or(settings.csv_output_dir);
    let tracking_file = args.tracking_file.clone().unwrap_or(settings.tracking_file);

    let mut allocator = IdAllocator::load(&tracking_file, args.start_id)?;
    let options = IngestOptions {
        output_dir: output_dir.clone(),
        accept_incomplete: args.accept_incomplete,
        dry_run: args.dry_run,
        preview_limit: args.preview_limit,
        continue_on_day_error: args.keep_going,
    };

    for (dir, format) in &sources {
        println!("Source: {} ({})", dir.display(), format);
    }
    println!("Output: {}", output_dir.display());
    println!("First id: {}", allocator.next_id());

    let progress = ProgressReporter::new("generate", 1, std::time::Duration::from_secs(60));
    let summary = generate(&sources, args.start_date, args.end_date, &mut allocator, &options)?;
    print_summary(&summary, &progress, args.dry_run);

    if args.dry_run {
        println!("Preview written to {}", output_dir.join(PREVIEW_FILE_NAME).display());
    } else if let Some(last) = allocator.last_allocated() {
        println!("Tracking file {} now at {}", tracking_file.display(), last);
    }
    Ok(summary)
}
