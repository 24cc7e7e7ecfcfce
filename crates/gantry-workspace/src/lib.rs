mod discover;
mod error;
mod merge;
pub mod modfile;
mod scan;
mod workspace;

pub use crate::discover::find_module_source;
pub use crate::error::WorkspaceError;
pub use crate::merge::major_version;
pub use crate::merge::workspace_module_version;
pub use crate::merge::WORKSPACE_MODULE;
pub use crate::modfile::ModFile;
pub use crate::modfile::ModfileError;
pub use crate::scan::find_modules;
pub use crate::scan::is_ignored_dir;
pub use crate::scan::ModuleScan;
pub use crate::scan::PathFilter;
pub use crate::scan::DEFAULT_FILE_LIMIT;
pub use crate::workspace::ModuleSource;
pub use crate::workspace::Workspace;
pub use crate::workspace::WorkspaceOptions;
