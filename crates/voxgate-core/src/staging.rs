//! Scoped on-disk staging files for engine and codec hand-off.
//!
//! Every [`StagingFile`] is a guard: it is deleted on [`StagingFile::release`] or on drop,
//! whichever comes first, and release is idempotent. Requests needing several files hold
//! several guards, each released independently of the others.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};

const FILE_PREFIX: &str = "voxgate";
const CREATE_ATTEMPTS: usize = 4;

/// Directory that hands out uniquely named staging files.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: Arc<PathBuf>,
    live: Arc<AtomicUsize>,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::Config(format!(
                "Failed to create staging directory {}: {e}",
                root.display()
            ))
        })?;

        Ok(Self {
            root: Arc::new(root),
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new empty staging file whose name ends in `.{suffix}`.
    ///
    /// The suffix is reduced to ASCII alphanumerics; an empty result means no extension.
    pub fn acquire(&self, suffix: &str) -> Result<StagingFile> {
        let suffix = sanitize_suffix(suffix);

        for _ in 0..CREATE_ATTEMPTS {
            let name = if suffix.is_empty() {
                format!("{FILE_PREFIX}-{}", uuid::Uuid::new_v4().simple())
            } else {
                format!("{FILE_PREFIX}-{}.{suffix}", uuid::Uuid::new_v4().simple())
            };
            let path = self.root.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    self.live.fetch_add(1, Ordering::SeqCst);
                    debug!("Acquired staging file {}", path.display());
                    return Ok(StagingFile {
                        path,
                        released: false,
                        live: self.live.clone(),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(Error::Io(err)),
            }
        }

        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "could not allocate a unique staging file name",
        )))
    }

    /// Release a staging file. Equivalent to dropping it.
    pub fn release(&self, mut file: StagingFile) {
        file.release();
    }

    /// Number of staging handles that have been acquired and not yet released.
    pub fn outstanding(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// A staging file owned by exactly one request step.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    released: bool,
    live: Arc<AtomicUsize>,
}

impl StagingFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Replace the file content with `bytes` and sync it to disk.
    pub fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(&self.path)?)
    }

    /// Delete the file. Safe to call repeatedly; a file already gone is not an error.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.live.fetch_sub(1, Ordering::SeqCst);

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Released staging file {}", self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "Failed to remove staging file {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        self.release();
    }
}

fn sanitize_suffix(raw: &str) -> String {
    raw.trim_start_matches('.')
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use uuid::Uuid;

    pub(crate) fn temp_area(tag: &str) -> StagingArea {
        let root = std::env::temp_dir().join(format!("voxgate-{tag}-{}", Uuid::new_v4()));
        StagingArea::new(root).unwrap()
    }

    pub(crate) fn dir_entries(area: &StagingArea) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(area.root())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        entries.sort();
        entries
    }

    #[test]
    fn acquire_creates_unique_files_with_suffix() {
        let area = temp_area("staging-unique");
        let a = area.acquire("wav").unwrap();
        let b = area.acquire(".wav").unwrap();

        assert_ne!(a.path(), b.path());
        assert!(a.path().exists() && b.path().exists());
        assert_eq!(a.path().extension().unwrap(), "wav");
        assert_eq!(b.path().extension().unwrap(), "wav");
        assert_eq!(area.outstanding(), 2);

        drop(a);
        drop(b);
        assert!(dir_entries(&area).is_empty());
        assert_eq!(area.outstanding(), 0);
        std::fs::remove_dir_all(area.root()).unwrap();
    }

    #[test]
    fn release_is_idempotent_and_tolerates_missing_file() {
        let area = temp_area("staging-release");
        let mut file = area.acquire("mp3").unwrap();
        std::fs::remove_file(file.path()).unwrap();

        file.release();
        file.release();
        assert!(file.is_released());
        assert_eq!(area.outstanding(), 0);

        drop(file);
        assert_eq!(area.outstanding(), 0);
        std::fs::remove_dir_all(area.root()).unwrap();
    }

    #[test]
    fn suffix_cannot_escape_the_staging_root() {
        let area = temp_area("staging-sanitize");
        let file = area.acquire("../../etc/passwd").unwrap();

        assert_eq!(file.path().parent().unwrap(), area.root());
        assert_eq!(file.path().extension().unwrap(), "etcpasswd");

        let bare = area.acquire("").unwrap();
        assert!(bare.path().extension().is_none());

        area.release(file);
        area.release(bare);
        assert!(dir_entries(&area).is_empty());
        std::fs::remove_dir_all(area.root()).unwrap();
    }

    #[test]
    fn write_then_read_round_trips_content() {
        let area = temp_area("staging-io");
        let file = area.acquire("bin").unwrap();
        file.write_all(b"first pass").unwrap();
        file.write_all(b"second").unwrap();
        assert_eq!(file.read_all().unwrap(), b"second");
        drop(file);
        std::fs::remove_dir_all(area.root()).unwrap();
    }
}
