//! Parallel decompression of gzip'd hour files before parsing.
//!
//! Each archive is an independent unit: failures are collected per file and never stop the
//! others. Output lands next to the archive without the `.gz` suffix.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use rayon::prelude::*;

#[derive(Debug, Default)]
pub struct DecompressReport {
    pub decompressed: Vec<PathBuf>,
    pub already_present: usize,
    pub failed: Vec<(PathBuf, String)>,
}

/// Every `.gz` file below `root`, sorted.
pub fn find_archives(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "gz") {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Decompress one archive through a `.partial` file, optionally removing the source.
pub fn decompress_file(archive: &Path, remove_source: bool) -> io::Result<PathBuf> {
    let target = archive.with_extension("");
    let mut partial = target.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let mut decoder = GzDecoder::new(BufReader::new(File::open(archive)?));
    let mut out = BufWriter::new(File::create(&partial)?);
    if let Err(e) = io::copy(&mut decoder, &mut out).and_then(|_| out.flush()) {
        drop(out);
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    drop(out);
    fs::rename(&partial, &target)?;

    if remove_source {
        fs::remove_file(archive)?;
    }
    Ok(target)
}

/// Decompress every archive under `root` on the rayon pool.
pub fn decompress_all(root: &Path, remove_source: bool, overwrite: bool) -> io::Result<DecompressReport> {
    let archives = find_archives(root)?;
    tracing::info!(root = %root.display(), archives = archives.len(), "Decompressing archives");

    let results: Vec<(PathBuf, Option<io::Result<PathBuf>>)> = archives
        .into_par_iter()
        .map(|archive| {
            if !overwrite && archive.with_extension("").exists() {
                return (archive, None);
            }
            let result = decompress_file(&archive, remove_source);
            (archive, Some(result))
        })
        .collect();

    let mut report = DecompressReport::default();
    for (archive, result) in results {
        match result {
            None => report.already_present += 1,
            Some(Ok(target)) => report.decompressed.push(target),
            Some(Err(e)) => {
                tracing::warn!(archive = %archive.display(), error = %e, "Failed to decompress");
                report.failed.push((archive, e.to_string()));
            }
        }
    }

    tracing::info!(
        decompressed = report.decompressed.len(),
        already_present = report.already_present,
        failed = report.failed.len(),
        "Decompression complete"
    );
    Ok(report)
}
