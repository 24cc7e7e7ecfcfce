//! The external collaborators a snapshot drives: the toolchain, which knows
//! how packages and modules are laid out, and the checker, which parses and
//! type-checks source files.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8PathBuf;
use gantry_source::ContentHash;
use gantry_source::Diagnostic;
use gantry_source::FileHandle;
use gantry_source::FileIdentity;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::ToolchainError;
use crate::metadata::Metadata;
use crate::metadata::ModuleInfo;
use crate::metadata::PackageId;

/// How much of a source file a parse must produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParseMode {
    /// The package clause and imports, enough to build the package graph.
    Header,
    /// Exported declarations, for packages used only as dependencies.
    Exported,
    Full,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypecheckMode {
    /// Parse every file fully.
    Full,
    /// Parse workspace packages fully and dependencies for their exports.
    Workspace,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedFile {
    pub identity: FileIdentity,
    pub mode: ParseMode,
    /// Fingerprint of the package clause and imports. Two parses with equal
    /// headers place the file in the same packages.
    pub header: ContentHash,
    pub diagnostics: Vec<Diagnostic>,
}

/// A type-checked package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Package {
    pub id: PackageId,
    pub mode: TypecheckMode,
    pub files: Vec<Arc<ParsedFile>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// The module layout reported by the toolchain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleGraph {
    pub modules: Vec<ModuleInfo>,
}

impl ModuleGraph {
    pub fn main_modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules.iter().filter(|m| m.main)
    }
}

/// Which packages a load asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadScope {
    /// Every package under the workspace directories.
    Workspace,
    /// The packages containing these files.
    Files(Vec<Url>),
}

/// Everything a toolchain invocation needs to see the workspace as the
/// snapshot does.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub dirs: Vec<Url>,
    pub env: BTreeMap<String, String>,
    /// Editor contents that differ from disk.
    pub overlays: BTreeMap<Url, Arc<[u8]>>,
    /// Directory holding the synthetic workspace `go.mod`, when the
    /// workspace uses one.
    pub mod_dir: Option<Utf8PathBuf>,
    /// Cancelled when the snapshot that issued the request is released.
    pub cancel: CancellationToken,
}

pub trait Toolchain: Send + Sync {
    fn resolve_module_graph(&self, request: &LoadRequest) -> Result<ModuleGraph, ToolchainError>;

    fn list_packages(
        &self,
        request: &LoadRequest,
        scope: &LoadScope,
    ) -> Result<Vec<Metadata>, ToolchainError>;
}

/// A pure function of its inputs: equal inputs give equal results, so
/// results may be shared between snapshots and sessions.
pub trait Checker: Send + Sync {
    fn parse(&self, file: &dyn FileHandle, mode: ParseMode) -> ParsedFile;

    fn type_check(
        &self,
        metadata: &Metadata,
        files: &[Arc<ParsedFile>],
        mode: TypecheckMode,
    ) -> Package;
}
