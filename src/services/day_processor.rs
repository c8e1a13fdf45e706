//! Raw hourly files → filtered, id-stamped day CSV pairs.
//!
//! Sources are laid out as `<source>/hourly/<YYYYMMDD>/<hour-file>`. Days are processed one at a
//! time and in order; within a day, hour files are read in hour order and lines in file order,
//! so emission order (and therefore id order) is deterministic for a given input.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::error::{EmitError, TrackingError};
use crate::models::{DayKey, ReconstructedTrade};
use crate::parsers::{RecordParser, SourceFormat};
use crate::services::csv_emitter::{check_fields, DayArtifacts, DayCsvWriter};
use crate::services::id_allocator::IdAllocator;
use crate::services::progress::ProgressReporter;
use crate::services::twap_filter::check_complete;

const COMPRESSED_EXTENSIONS: [&str; 3] = ["gz", "lz4", "zst"];

pub const PREVIEW_FILE_NAME: &str = "dry_run_preview.jsonl";

#[derive(Debug, Error)]
pub enum DayError {
    #[error("day {day}: cannot read {path}: {source}")]
    Read {
        day: DayKey,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("day {day}: {source}")]
    Emit {
        day: DayKey,
        #[source]
        source: EmitError,
    },

    #[error("day {day}: {source}")]
    Allocation {
        day: DayKey,
        #[source]
        source: TrackingError,
    },
}

impl DayError {
    pub fn day(&self) -> DayKey {
        match self {
            DayError::Read { day, .. }
            | DayError::Emit { day, .. }
            | DayError::Allocation { day, .. } => *day,
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("cannot scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{source}; resume with --start-date={day} --start-id={next_id}")]
    DayFailed {
        day: DayKey,
        next_id: i64,
        #[source]
        source: DayError,
    },

    #[error(transparent)]
    Preview(#[from] EmitError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),
}

/// One day directory and its hour files, in processing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySource {
    pub day: DayKey,
    pub dir: PathBuf,
    pub hour_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DayStats {
    pub files: u64,
    pub lines: u64,
    pub parse_errors: u64,
    pub accepted: u64,
    pub skipped_non_twap: u64,
    pub incomplete: u64,
    /// Trades with a field the destination cannot hold (over-long, or the literal NULL sentinel)
    pub invalid_fields: u64,
}

impl DayStats {
    pub fn absorb(&mut self, other: &DayStats) {
        self.files += other.files;
        self.lines += other.lines;
        self.parse_errors += other.parse_errors;
        self.accepted += other.accepted;
        self.skipped_non_twap += other.skipped_non_twap;
        self.incomplete += other.incomplete;
        self.invalid_fields += other.invalid_fields;
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub output_dir: PathBuf,
    /// Emit trades that are not a clean buyer/seller pair instead of rejecting them
    pub accept_incomplete: bool,
    /// Parse, filter and allocate, but write only a preview instead of CSVs
    pub dry_run: bool,
    /// Trades per day kept in the dry-run preview
    pub preview_limit: usize,
    /// Log and continue past an unreadable day instead of aborting the run
    pub continue_on_day_error: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(crate::config::DEFAULT_CSV_OUTPUT_DIR),
            accept_incomplete: false,
            dry_run: false,
            preview_limit: 5,
            continue_on_day_error: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewTrade {
    pub id: i64,
    pub trade: ReconstructedTrade,
}

#[derive(Debug)]
pub struct DayOutcome {
    pub day: DayKey,
    pub stats: DayStats,
    pub artifacts: Option<DayArtifacts>,
    pub preview: Vec<PreviewTrade>,
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub totals: DayStats,
    pub days_processed: u64,
    pub days_written: u64,
    pub failed_days: Vec<DayKey>,
    pub first_id: Option<i64>,
    pub last_id: Option<i64>,
    #[serde(skip)]
    pub artifacts: Vec<DayArtifacts>,
}

impl RunSummary {
    /// Non-zero exit: a day failed or any line could not be parsed.
    pub fn has_errors(&self) -> bool {
        !self.failed_days.is_empty() || self.totals.parse_errors > 0
    }
}

fn hourly_root(source_dir: &Path) -> PathBuf {
    let hourly = source_dir.join("hourly");
    if hourly.is_dir() { hourly } else { source_dir.to_path_buf() }
}

/// Day directories under a source, filtered to `[start, end]` and sorted chronologically.
pub fn discover_days(
    source_dir: &Path,
    start: Option<DayKey>,
    end: Option<DayKey>,
) -> Result<Vec<DaySource>, GenerationError> {
    let root = hourly_root(source_dir);
    let scan_err = |source| GenerationError::Scan {
        path: root.clone(),
        source,
    };

    let mut days = Vec::new();
    for entry in fs::read_dir(&root).map_err(scan_err)? {
        let entry = entry.map_err(scan_err)?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(day) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<DayKey>().ok())
        else {
            continue;
        };
        if start.is_some_and(|s| day < s) || end.is_some_and(|e| day > e) {
            continue;
        }
        let hour_files = list_hour_files(&path).map_err(|source| GenerationError::Scan {
            path: path.clone(),
            source,
        })?;
        days.push(DaySource {
            day,
            dir: path,
            hour_files,
        });
    }

    days.sort_by_key(|d| d.day);
    Ok(days)
}

/// Hour files sorted by numeric name (`0`, `1`, ... `23`), then lexically.
pub fn list_hour_files(day_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(day_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.starts_with('.') || name.ends_with(".partial") {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if COMPRESSED_EXTENSIONS.contains(&ext) {
            tracing::warn!(
                path = %path.display(),
                "Skipping compressed hour file, run decompress_archives first"
            );
            continue;
        }
        files.push(path);
    }

    files.sort_by(|a, b| hour_sort_key(a).cmp(&hour_sort_key(b)));
    Ok(files)
}

fn hour_sort_key(path: &Path) -> (u32, String) {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
    let stem = path.file_stem().and_then(|n| n.to_str()).unwrap_or_default();
    (stem.parse().unwrap_or(u32::MAX), name)
}

/// Read every hour file of a day and hand each accepted trade to `sink`, in file order.
///
/// Malformed lines, non-TWAP trades and (unless `accept_incomplete`) incomplete trades are
/// counted in the returned stats and never reach `sink`.
pub fn for_each_trade(
    parser: &dyn RecordParser,
    source: &DaySource,
    accept_incomplete: bool,
    mut sink: impl FnMut(ReconstructedTrade) -> Result<(), DayError>,
) -> Result<DayStats, DayError> {
    let day = source.day;
    let mut stats = DayStats::default();

    for path in &source.hour_files {
        let read_err = |source| DayError::Read {
            day,
            path: path.clone(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(read_err)?);
        stats.files += 1;

        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    stats.lines += 1;
                    stats.parse_errors += 1;
                    continue;
                }
                Err(e) => return Err(read_err(e)),
            };
            if line.trim().is_empty() {
                continue;
            }
            stats.lines += 1;

            let parsed = match parser.parse_twap_line(&line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    stats.parse_errors += 1;
                    tracing::trace!(%day, path = %path.display(), error = %e, "Unparseable line");
                    continue;
                }
            };
            stats.skipped_non_twap += parsed.skipped as u64;

            for trade in parsed.accepted {
                if let Err(e) = check_complete(&trade) {
                    if !accept_incomplete {
                        stats.incomplete += 1;
                        tracing::debug!(%day, error = %e, "Rejected incomplete trade");
                        continue;
                    }
                }
                if let Err(e) = check_fields(&trade) {
                    stats.invalid_fields += 1;
                    tracing::debug!(%day, hash = %trade.hash, error = %e, "Rejected trade with invalid field");
                    continue;
                }
                sink(trade)?;
                stats.accepted += 1;
            }
        }
    }

    Ok(stats)
}

/// Parse, filter, allocate and emit one day.
///
/// Trades are filtered before allocation, so skipped and rejected trades never consume ids.
pub fn process_day(
    parser: &dyn RecordParser,
    source: &DaySource,
    allocator: &mut IdAllocator,
    options: &IngestOptions,
) -> Result<DayOutcome, DayError> {
    let day = source.day;
    let output_dir = options.output_dir.join(parser.format().dir_name());
    let mut writer = (!options.dry_run).then(|| DayCsvWriter::new(&output_dir, day));
    let mut preview = Vec::new();

    let stats = for_each_trade(parser, source, options.accept_incomplete, |trade| {
        let id = allocator
            .allocate()
            .map_err(|source| DayError::Allocation { day, source })?;
        if let Some(writer) = writer.as_mut() {
            writer
                .write_trade(id, &trade)
                .map_err(|source| DayError::Emit { day, source })?;
        } else if preview.len() < options.preview_limit {
            preview.push(PreviewTrade { id, trade });
        }
        Ok(())
    })?;

    let artifacts = match writer {
        Some(writer) => writer
            .finish()
            .map_err(|source| DayError::Emit { day, source })?,
        None => None,
    };

    Ok(DayOutcome {
        day,
        stats,
        artifacts,
        preview,
    })
}

/// Process every day of one source with a shared allocator.
///
/// An unreadable day aborts the run (reporting the day and the id to resume from) unless
/// `continue_on_day_error` is set, in which case it is recorded in `failed_days`.
pub fn run_source(
    source_dir: &Path,
    format: SourceFormat,
    start: Option<DayKey>,
    end: Option<DayKey>,
    allocator: &mut IdAllocator,
    options: &IngestOptions,
    summary: &mut RunSummary,
) -> Result<(), GenerationError> {
    let parser = format.parser();
    let days = discover_days(source_dir, start, end)?;
    tracing::info!(
        source = %source_dir.display(),
        %format,
        days = days.len(),
        "Discovered day partitions"
    );

    let mut preview_out = if options.dry_run {
        let path = options.output_dir.join(PREVIEW_FILE_NAME);
        fs::create_dir_all(&options.output_dir).map_err(|e| EmitError::io(&options.output_dir, e))?;
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EmitError::io(&path, e))?;
        Some((path, BufWriter::new(file)))
    } else {
        None
    };

    let mut progress = ProgressReporter::new("generate", 1, Duration::from_secs(30));

    for source in &days {
        let next_id_before = allocator.next_id();
        let outcome = match process_day(&parser, source, allocator, options) {
            Ok(outcome) => outcome,
            Err(e) if options.continue_on_day_error => {
                tracing::error!(day = %e.day(), error = %e, "Day failed, continuing with next day");
                summary.failed_days.push(e.day());
                continue;
            }
            Err(e) => {
                return Err(GenerationError::DayFailed {
                    day: e.day(),
                    next_id: next_id_before,
                    source: e,
                })
            }
        };

        let s = &outcome.stats;
        tracing::info!(
            day = %outcome.day,
            %format,
            files = s.files,
            lines = s.lines,
            trades = s.accepted,
            skipped = s.skipped_non_twap,
            incomplete = s.incomplete,
            invalid = s.invalid_fields,
            errors = s.parse_errors,
            "Day processed"
        );

        summary.totals.absorb(&outcome.stats);
        summary.days_processed += 1;
        if s.accepted > 0 {
            summary.first_id.get_or_insert(next_id_before);
            summary.last_id = allocator.last_allocated();
        }

        if let Some((path, out)) = preview_out.as_mut() {
            write_preview(out, format, &outcome).map_err(|e| EmitError::io(path.as_path(), e))?;
        }
        if let Some(artifacts) = outcome.artifacts {
            summary.days_written += 1;
            summary.artifacts.push(artifacts);
        }

        progress.tick(summary.days_processed, || {
            format!(
                "{} lines, {} trades, {} skipped, {} errors",
                summary.totals.lines,
                summary.totals.accepted,
                summary.totals.skipped_non_twap,
                summary.totals.parse_errors
            )
        });
    }

    if let Some((path, mut out)) = preview_out {
        out.flush().map_err(|e| EmitError::io(&path, e))?;
    }
    Ok(())
}

/// Run every source in order with one shared allocator, then checkpoint it once.
///
/// Dry runs replace the preview file and never touch the tracking file. An aborted run returns
/// before the checkpoint, leaving the tracking file as it was.
pub fn generate(
    sources: &[(PathBuf, SourceFormat)],
    start: Option<DayKey>,
    end: Option<DayKey>,
    allocator: &mut IdAllocator,
    options: &IngestOptions,
) -> Result<RunSummary, GenerationError> {
    if options.dry_run {
        let preview = options.output_dir.join(PREVIEW_FILE_NAME);
        match fs::remove_file(&preview) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(EmitError::io(preview, e).into()),
        }
    }

    let mut summary = RunSummary::default();
    for (source_dir, format) in sources {
        run_source(source_dir, *format, start, end, allocator, options, &mut summary)?;
    }

    if !options.dry_run {
        if let Some(last) = allocator.checkpoint()? {
            tracing::info!(last_id = last, path = %allocator.tracking_file().display(), "Tracking file advanced");
        }
    }
    Ok(summary)
}

fn write_preview(out: &mut impl Write, format: SourceFormat, outcome: &DayOutcome) -> std::io::Result<()> {
    for preview in &outcome.preview {
        let line = serde_json::json!({
            "day": outcome.day,
            "format": format.dir_name(),
            "id": preview.id,
            "trade": preview.trade,
        });
        writeln!(out, "{}", line)?;
    }
    let summary = serde_json::json!({
        "day": outcome.day,
        "format": format.dir_name(),
        "summary": outcome.stats,
    });
    writeln!(out, "{}", summary)
}
