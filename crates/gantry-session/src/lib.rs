mod error;
mod metadata;
mod overlay;
mod session;
mod snapshot;
mod toolchain;
mod view;

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

pub use error::SessionError;
pub use error::SnapshotError;
pub use error::ToolchainError;
pub use gantry_source::FileChange;
pub use metadata::Metadata;
pub use metadata::MetadataGraph;
pub use metadata::ModuleInfo;
pub use metadata::PackageId;
pub use metadata::PackagePath;
pub use overlay::FileAction;
pub use overlay::FileModification;
pub use overlay::Overlay;
pub use session::Session;
pub use snapshot::Snapshot;
pub use snapshot::SnapshotRef;
pub use snapshot::WeakSnapshot;
pub use toolchain::Checker;
pub use toolchain::LoadRequest;
pub use toolchain::LoadScope;
pub use toolchain::ModuleGraph;
pub use toolchain::Package;
pub use toolchain::ParseMode;
pub use toolchain::ParsedFile;
pub use toolchain::Toolchain;
pub use toolchain::TypecheckMode;
pub use view::View;

/// Lock `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
