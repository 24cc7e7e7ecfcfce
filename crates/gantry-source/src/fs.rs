//! File system abstraction
//!
//! The [`FileSystem`] trait abstracts the disk reads performed by the
//! [`Cache`](crate::Cache), so tests can run against an in-memory tree.

use std::io;
use std::sync::Mutex;
use std::time::SystemTime;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use rustc_hash::FxHashMap;

/// The subset of file metadata used to decide whether a cached read is stale.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

pub trait FileSystem: Send + Sync {
    fn read(&self, path: &Utf8Path) -> io::Result<Vec<u8>>;

    fn stat(&self, path: &Utf8Path) -> io::Result<FileStat>;

    fn is_dir(&self, path: &Utf8Path) -> bool;
}

/// Standard file system implementation that uses `std::fs`
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
        std::fs::read(path.as_std_path())
    }

    fn stat(&self, path: &Utf8Path) -> io::Result<FileStat> {
        let metadata = std::fs::metadata(path.as_std_path())?;
        if metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{path} is a directory"),
            ));
        }
        Ok(FileStat {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }

    fn is_dir(&self, path: &Utf8Path) -> bool {
        path.is_dir()
    }
}

/// In-memory file system, for tests and for callers that want to serve a
/// fixed tree without touching the disk.
///
/// Every write bumps a logical clock which is reported as the modification
/// time, so the cache notices rewrites even when the length is unchanged.
#[derive(Default)]
pub struct InMemoryFileSystem {
    files: Mutex<FxHashMap<Utf8PathBuf, (Vec<u8>, u64)>>,
}

impl InMemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, path: impl Into<Utf8PathBuf>, content: impl Into<Vec<u8>>) {
        let mut files = self.files.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let tick = files.values().map(|(_, tick)| *tick).max().unwrap_or(0) + 1;
        files.insert(path.into(), (content.into(), tick));
    }

    pub fn remove(&self, path: &Utf8Path) {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(path);
    }
}

impl FileSystem for InMemoryFileSystem {
    fn read(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(path)
            .map(|(content, _)| content.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file not found"))
    }

    fn stat(&self, path: &Utf8Path) -> io::Result<FileStat> {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(path)
            .map(|(content, tick)| FileStat {
                modified: Some(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(*tick)),
                len: content.len() as u64,
            })
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file not found"))
    }

    fn is_dir(&self, path: &Utf8Path) -> bool {
        self.files
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .any(|file| file != path && file.starts_with(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_fs_reports_directories() {
        let fs = InMemoryFileSystem::new();
        fs.write("/ws/sub/a.go", "package a");
        assert!(fs.is_dir(Utf8Path::new("/ws/sub")));
        assert!(!fs.is_dir(Utf8Path::new("/ws/sub/a.go")));
    }

    #[test]
    fn memory_fs_rewrite_changes_stat() {
        let fs = InMemoryFileSystem::new();
        fs.write("/ws/a.go", "aaaa");
        let before = fs.stat(Utf8Path::new("/ws/a.go")).unwrap();
        fs.write("/ws/a.go", "bbbb");
        let after = fs.stat(Utf8Path::new("/ws/a.go")).unwrap();
        assert_eq!(before.len, after.len);
        assert_ne!(before, after);
    }

    #[test]
    fn os_fs_stat_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        assert!(OsFileSystem.stat(path).is_err());
        assert!(OsFileSystem.is_dir(path));
    }
}
