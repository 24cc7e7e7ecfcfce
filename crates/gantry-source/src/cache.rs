//! Process-wide, content-addressed store shared by every session.
//!
//! The [`Cache`] owns disk reads and a memo table of derived values keyed by
//! content hash. It is shared read-only by all sessions, views and snapshots;
//! snapshots never mutate it, they only layer their own state on top. The
//! memo table holds values weakly: a value lives as long as some snapshot
//! keeps it.

use std::any::Any;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;

use tracing::trace;
use url::Url;

use crate::collections::FxDashMap;
use crate::file::FileError;
use crate::file::FileHandle;
use crate::file::FileIdentity;
use crate::file::FileSource;
use crate::fs::FileStat;
use crate::fs::FileSystem;
use crate::hash::ContentHash;
use crate::paths::url_to_path;

/// A file as read from disk.
#[derive(Debug)]
pub struct DiskFile {
    uri: Url,
    stat: Option<FileStat>,
    hash: ContentHash,
    content: Result<Arc<[u8]>, FileError>,
}

impl DiskFile {
    fn missing(uri: Url, err: FileError) -> Self {
        Self {
            uri,
            stat: None,
            hash: ContentHash::of(b""),
            content: Err(err),
        }
    }
}

impl FileHandle for DiskFile {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn identity(&self) -> FileIdentity {
        FileIdentity {
            uri: self.uri.clone(),
            hash: self.hash,
        }
    }

    fn read(&self) -> Result<Arc<[u8]>, FileError> {
        self.content.clone()
    }

    fn saved(&self) -> bool {
        true
    }
}

type Memo = Arc<dyn Any + Send + Sync>;

/// One memo entry. Its lock is held while the value is computed, so
/// concurrent callers for the same key wait for a single computation.
type Slot = Arc<Mutex<Option<Weak<dyn Any + Send + Sync>>>>;

pub struct Cache {
    fs: Arc<dyn FileSystem>,
    files: FxDashMap<Url, Arc<DiskFile>>,
    memo: FxDashMap<ContentHash, Slot>,
}

impl Cache {
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            files: FxDashMap::default(),
            memo: FxDashMap::default(),
        }
    }

    /// Read `uri` from disk, reusing the previous read when the file's
    /// modification time and size are unchanged.
    ///
    /// Failures are not cached: a file that vanished or could not be read is
    /// retried on the next call.
    pub fn get_file(&self, uri: &Url) -> Arc<DiskFile> {
        let Some(path) = url_to_path(uri) else {
            return Arc::new(DiskFile::missing(uri.clone(), FileError::NotFileUri(uri.clone())));
        };

        let stat = match self.fs.stat(&path) {
            Ok(stat) => stat,
            Err(err) => {
                self.files.remove(uri);
                return Arc::new(DiskFile::missing(uri.clone(), FileError::from_io(uri, &err)));
            }
        };

        if let Some(cached) = self.files.get(uri) {
            if cached.stat == Some(stat) {
                return Arc::clone(cached.value());
            }
        }

        let file = match self.fs.read(&path) {
            Ok(bytes) => {
                trace!(%uri, len = bytes.len(), "read file from disk");
                let hash = ContentHash::of(&bytes);
                Arc::new(DiskFile {
                    uri: uri.clone(),
                    stat: Some(stat),
                    hash,
                    content: Ok(Arc::from(bytes)),
                })
            }
            Err(err) => {
                self.files.remove(uri);
                return Arc::new(DiskFile::missing(uri.clone(), FileError::from_io(uri, &err)));
            }
        };

        self.files.insert(uri.clone(), Arc::clone(&file));
        file
    }

    /// Compute `f` once per `key` for as long as a previous result is still
    /// in use somewhere.
    ///
    /// Keys are content hashes, so callers must fold everything the value
    /// depends on (including the value's type) into the key. `f` runs outside
    /// the table's locks; concurrent callers for the same key block on the
    /// first computation.
    pub fn memoize<T, F>(&self, key: ContentHash, f: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let slot = Arc::clone(&*self.memo.entry(key).or_default());
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(memo) = entry.as_ref().and_then(Weak::upgrade) {
            match memo.downcast::<T>() {
                Ok(value) => return value,
                Err(_) => panic!("cache key {key} reused for a value of a different type"),
            }
        }

        let value = Arc::new(f());
        let memo: Memo = value.clone();
        *entry = Some(Arc::downgrade(&memo));
        value
    }

    /// Drop memo entries whose values are no longer used.
    pub fn prune_memo(&self) {
        self.memo.retain(|_, slot| match slot.try_lock() {
            Ok(entry) => in_use(entry.as_ref()),
            // Being computed or poisoned; keep it for the next pass.
            Err(_) => true,
        });
    }

    /// The number of memo entries whose values are still in use.
    #[must_use]
    pub fn memo_len(&self) -> usize {
        self.memo
            .iter()
            .filter(|slot| in_use(slot.lock().unwrap_or_else(PoisonError::into_inner).as_ref()))
            .count()
    }
}

fn in_use(entry: Option<&Weak<dyn Any + Send + Sync>>) -> bool {
    entry.is_some_and(|weak| weak.strong_count() > 0)
}

impl FileSource for Cache {
    fn get_file(&self, uri: &Url) -> Arc<dyn FileHandle> {
        Cache::get_file(self, uri)
    }
}
