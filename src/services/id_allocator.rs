//! Trade id allocation across runs and source formats.
//!
//! The allocator is owned by a run, threaded through the day processor and persisted once at
//! the end with [`IdAllocator::checkpoint`]. The tracking file holds only the last id handed
//! out. It is never advanced mid-run, so a crashed run leaves it stale and the operator resumes
//! with `--start-id`. Uniqueness against the destination is checked later, at migration time.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::TrackingError;

/// Where the first id of the run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdOrigin {
    Override,
    TrackingFile { last_used: i64 },
    Default,
}

#[derive(Debug)]
pub struct IdAllocator {
    tracking_file: PathBuf,
    origin: IdOrigin,
    first_id: i64,
    next_id: i64,
}

impl IdAllocator {
    /// Precedence: explicit override, then tracking file value + 1, then 1.
    pub fn load(tracking_file: impl Into<PathBuf>, start_override: Option<i64>) -> Result<Self, TrackingError> {
        let tracking_file = tracking_file.into();

        let (origin, first_id) = match start_override {
            Some(id) if id < 1 => return Err(TrackingError::StartOutOfRange(id)),
            Some(id) => (IdOrigin::Override, id),
            None => match read_tracking_file(&tracking_file)? {
                Some(last_used) => {
                    let next = last_used.checked_add(1).ok_or(TrackingError::Exhausted(last_used))?;
                    (IdOrigin::TrackingFile { last_used }, next)
                }
                None => (IdOrigin::Default, 1),
            },
        };

        tracing::info!(
            tracking_file = %tracking_file.display(),
            ?origin,
            first_id,
            "Trade id allocator initialised"
        );

        Ok(Self {
            tracking_file,
            origin,
            first_id,
            next_id: first_id,
        })
    }

    /// Hand out the next id. Fails instead of wrapping once the id range runs out.
    pub fn allocate(&mut self) -> Result<i64, TrackingError> {
        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or(TrackingError::Exhausted(id))?;
        Ok(id)
    }

    pub fn origin(&self) -> IdOrigin {
        self.origin
    }

    /// The id the next `allocate` call returns.
    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    pub fn last_allocated(&self) -> Option<i64> {
        (self.next_id > self.first_id).then(|| self.next_id - 1)
    }

    pub fn allocated_count(&self) -> i64 {
        self.next_id - self.first_id
    }

    pub fn tracking_file(&self) -> &Path {
        &self.tracking_file
    }

    /// Persist the last allocated id. A run that allocated nothing leaves the file untouched.
    pub fn checkpoint(&self) -> Result<Option<i64>, TrackingError> {
        let Some(last) = self.last_allocated() else {
            tracing::info!("No trade ids allocated, tracking file left unchanged");
            return Ok(None);
        };

        let io_err = |source| TrackingError::Io {
            path: self.tracking_file.clone(),
            source,
        };

        if let Some(parent) = self.tracking_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        // write-then-rename so a crash never leaves a truncated file
        let tmp = self.tracking_file.with_extension("tmp");
        fs::write(&tmp, format!("{}\n", last)).map_err(io_err)?;
        fs::rename(&tmp, &self.tracking_file).map_err(io_err)?;

        tracing::info!(last_id = last, tracking_file = %self.tracking_file.display(), "Tracking file advanced");
        Ok(Some(last))
    }
}

/// Read the last used id, `None` when the file does not exist or is blank.
pub fn read_tracking_file(path: &Path) -> Result<Option<i64>, TrackingError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(TrackingError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    trimmed
        .parse::<i64>()
        .map(Some)
        .map_err(|_| TrackingError::Invalid {
            path: path.to_path_buf(),
            content: trimmed.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_one_without_tracking_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut alloc = IdAllocator::load(dir.path().join("last_id.txt"), None).unwrap();
        assert_eq!(alloc.origin(), IdOrigin::Default);
        assert_eq!(alloc.allocate().unwrap(), 1);
        assert_eq!(alloc.allocate().unwrap(), 2);
        assert_eq!(alloc.last_allocated(), Some(2));
    }

    #[test]
    fn resumes_after_tracking_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_id.txt");
        fs::write(&path, "41\n").unwrap();
        let mut alloc = IdAllocator::load(&path, None).unwrap();
        assert_eq!(alloc.origin(), IdOrigin::TrackingFile { last_used: 41 });
        assert_eq!(alloc.allocate().unwrap(), 42);
    }

    #[test]
    fn override_beats_tracking_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_id.txt");
        fs::write(&path, "41").unwrap();
        let mut alloc = IdAllocator::load(&path, Some(1000)).unwrap();
        assert_eq!(alloc.origin(), IdOrigin::Override);
        assert_eq!(alloc.allocate().unwrap(), 1000);
    }

    #[test]
    fn checkpoint_writes_last_id_only_when_something_was_allocated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("last_id.txt");

        let idle = IdAllocator::load(&path, Some(5)).unwrap();
        assert_eq!(idle.checkpoint().unwrap(), None);
        assert!(!path.exists());

        let mut alloc = IdAllocator::load(&path, Some(5)).unwrap();
        alloc.allocate().unwrap();
        alloc.allocate().unwrap();
        assert_eq!(alloc.checkpoint().unwrap(), Some(6));
        assert_eq!(read_tracking_file(&path).unwrap(), Some(6));
    }

    #[test]
    fn id_range_end_is_an_error_not_a_wrap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_id.txt");

        let mut alloc = IdAllocator::load(&path, Some(i64::MAX - 1)).unwrap();
        assert_eq!(alloc.allocate().unwrap(), i64::MAX - 1);
        assert!(matches!(alloc.allocate(), Err(TrackingError::Exhausted(id)) if id == i64::MAX));
        assert_eq!(alloc.last_allocated(), Some(i64::MAX - 1));

        fs::write(&path, i64::MAX.to_string()).unwrap();
        assert!(matches!(IdAllocator::load(&path, None), Err(TrackingError::Exhausted(_))));
        assert!(matches!(
            IdAllocator::load(&path, Some(0)),
            Err(TrackingError::StartOutOfRange(0))
        ));
    }

    #[test]
    fn garbage_tracking_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_id.txt");
        fs::write(&path, "forty-two").unwrap();
        assert!(matches!(
            IdAllocator::load(&path, None),
            Err(TrackingError::Invalid { .. })
        ));
    }
}
