use gantry_conf::ConfigError;
use gantry_workspace::WorkspaceError;
use thiserror::Error;
use url::Url;

use crate::metadata::PackageId;
use crate::overlay::FileAction;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("view already exists for folder {0}")]
    ViewExists(Url),
    #[error("no views in session")]
    NoViews,
    #[error("view {0:?} not found")]
    ViewNotFound(String),
    #[error("view was shut down")]
    ViewShutdown,
    #[error("modifying unopened overlay {0}")]
    UnopenedOverlay(Url),
    #[error("no known content for overlay {uri} on {action}")]
    MissingContent { uri: Url, action: FileAction },
    #[error("overlay {0} changed on save")]
    SaveMismatch(Url),
    #[error("unknown file kind for {0}")]
    UnknownFileKind(Url),
    #[error("{0} is not a file URI")]
    NotFileUri(Url),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot {0} has been released")]
    Released(u64),
    #[error("no metadata for package {0}")]
    UnknownPackage(PackageId),
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolchainError {
    #[error("toolchain invocation cancelled")]
    Cancelled,
    #[error("toolchain failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}
