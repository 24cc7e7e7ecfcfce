use std::fmt;
use std::io;
use std::sync::Arc;

use camino::Utf8Path;
use thiserror::Error;
use url::Url;

use crate::hash::ContentHash;
use crate::paths::url_file_name;

/// Uniquely identifies one state of one file.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileIdentity {
    pub uri: Url,
    pub hash: ContentHash,
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.uri, self.hash)
    }
}

/// How a file is interpreted by the rest of the system.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileKind {
    #[default]
    Unknown,
    /// A source file of the workspace language.
    Source,
    /// A single-module manifest (`go.mod`, `gantry.mod`).
    Mod,
    /// A checksum file (`go.sum`, `go.work.sum`).
    Sum,
    /// A multi-module manifest (`go.work`).
    Work,
    Template,
}

impl FileKind {
    /// Determine the kind from an editor language identifier.
    #[must_use]
    pub fn from_language_id(language_id: &str) -> Self {
        match language_id {
            "go" => FileKind::Source,
            "go.mod" | "gomod" => FileKind::Mod,
            "go.sum" | "gosum" => FileKind::Sum,
            "go.work" | "gowork" => FileKind::Work,
            "tmpl" | "gotmpl" => FileKind::Template,
            _ => FileKind::Unknown,
        }
    }

    /// Determine the kind of a file from its name alone.
    #[must_use]
    pub fn from_path(path: &Utf8Path) -> Self {
        match path.file_name() {
            Some("go.mod" | "gantry.mod") => return FileKind::Mod,
            Some("go.sum" | "go.work.sum") => return FileKind::Sum,
            Some("go.work") => return FileKind::Work,
            _ => {}
        }
        match path.extension() {
            Some("go") => FileKind::Source,
            Some("tmpl" | "gotmpl") => FileKind::Template,
            _ => FileKind::Unknown,
        }
    }

    #[must_use]
    pub fn from_url(uri: &Url) -> Self {
        url_file_name(uri).map_or(FileKind::Unknown, |name| {
            FileKind::from_path(Utf8Path::new(&name))
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FileError {
    #[error("{0} does not exist")]
    NotFound(Url),
    #[error("{0} is not a file URI")]
    NotFileUri(Url),
    #[error("reading {uri}: {message}")]
    Io {
        uri: Url,
        kind: io::ErrorKind,
        message: String,
    },
}

impl FileError {
    #[must_use]
    pub fn from_io(uri: &Url, err: &io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            return FileError::NotFound(uri.clone());
        }
        FileError::Io {
            uri: uri.clone(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, FileError::NotFound(_))
    }
}

/// A read-only handle to one state of one file.
///
/// Implemented by disk-backed handles from the [`Cache`](crate::Cache) and by
/// editor overlays. Handles are immutable once constructed: a new state of
/// the file is a new handle.
pub trait FileHandle: fmt::Debug + Send + Sync {
    fn uri(&self) -> &Url;

    /// The identity of this file state, available even if reading failed.
    fn identity(&self) -> FileIdentity;

    /// The file's contents, or the error encountered reading it.
    fn read(&self) -> Result<Arc<[u8]>, FileError>;

    /// Whether the contents are known to match the bytes on disk.
    fn saved(&self) -> bool;

    /// The client-assigned version. Disk files have version 0.
    fn version(&self) -> i32 {
        0
    }

    fn kind(&self) -> FileKind {
        FileKind::from_url(self.uri())
    }

    /// Whether this handle is an editor overlay rather than a disk read.
    fn is_overlay(&self) -> bool {
        false
    }

    /// Whether the file exists (reads without error).
    fn exists(&self) -> bool {
        self.read().is_ok()
    }
}

/// Maps URIs to [`FileHandle`]s.
///
/// Algorithms that only need file contents (manifest parsing, workspace
/// construction) take a `&dyn FileSource` so they run equally against the
/// session (overlays first) and a snapshot (its frozen file set).
pub trait FileSource: Send + Sync {
    fn get_file(&self, uri: &Url) -> Arc<dyn FileHandle>;
}

/// The new state of one file, as handed to invalidation.
#[derive(Clone, Debug)]
pub struct FileChange {
    pub handle: Arc<dyn FileHandle>,
    /// The new contents, `None` when the file could not be read.
    pub content: Option<Arc<[u8]>>,
    pub exists: bool,
    /// The change carries no new bytes (an open or close of identical content).
    pub is_unchanged: bool,
}

impl FileChange {
    #[must_use]
    pub fn new(handle: Arc<dyn FileHandle>, is_unchanged: bool) -> Self {
        let content = handle.read().ok();
        Self {
            exists: content.is_some(),
            content,
            handle,
            is_unchanged,
        }
    }

    #[must_use]
    pub fn saved(&self) -> bool {
        self.handle.saved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_manifest_names() {
        assert_eq!(FileKind::from_path(Utf8Path::new("/ws/go.mod")), FileKind::Mod);
        assert_eq!(FileKind::from_path(Utf8Path::new("/ws/gantry.mod")), FileKind::Mod);
        assert_eq!(FileKind::from_path(Utf8Path::new("/ws/go.work.sum")), FileKind::Sum);
        assert_eq!(FileKind::from_path(Utf8Path::new("/ws/go.work")), FileKind::Work);
        assert_eq!(FileKind::from_path(Utf8Path::new("/ws/a.go")), FileKind::Source);
        assert_eq!(FileKind::from_path(Utf8Path::new("/ws/README")), FileKind::Unknown);
    }

    #[test]
    fn kind_from_language_id() {
        assert_eq!(FileKind::from_language_id("go"), FileKind::Source);
        assert_eq!(FileKind::from_language_id("go.mod"), FileKind::Mod);
        assert_eq!(FileKind::from_language_id("python"), FileKind::Unknown);
    }

    #[test]
    fn not_found_is_distinguished() {
        let uri = Url::parse("file:///missing.go").unwrap();
        let err = FileError::from_io(&uri, &io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());

        let err = FileError::from_io(&uri, &io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_not_found());
    }
}
