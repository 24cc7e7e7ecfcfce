use camino::Utf8PathBuf;
use gantry_source::FileError;
use thiserror::Error;
use url::Url;

use crate::modfile::ModfileError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error(transparent)]
    Modfile(#[from] ModfileError),
    #[error("reading {uri}: {source}")]
    Read { uri: Url, source: FileError },
    #[error("{uri} is not a file URI")]
    NotFileUri { uri: Url },
    #[error("{uri} has no module directive")]
    MissingModule { uri: Url },
    #[error("module {path} appears multiple times in workspace")]
    DuplicateModule { path: String },
    #[error("go.work has missing or incomplete go directive")]
    MissingGoDirective,
    #[error("gantry.mod: replaced module {path:?}@{version:?} must not have version")]
    VersionedReplace { path: String, version: String },
    #[error("writing {path}: {message}")]
    Write { path: Utf8PathBuf, message: String },
}

impl WorkspaceError {
    /// The one-based manifest line the error points at, if any.
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            WorkspaceError::Modfile(err) => Some(err.line),
            _ => None,
        }
    }
}
