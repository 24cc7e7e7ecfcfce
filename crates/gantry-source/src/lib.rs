mod cache;
mod collections;
mod diagnostic;
mod file;
mod fs;
mod hash;
mod paths;

pub use cache::Cache;
pub use cache::DiskFile;
pub use collections::FxDashMap;
pub use diagnostic::CriticalError;
pub use diagnostic::Diagnostic;
pub use diagnostic::DiagnosticSource;
pub use diagnostic::Position;
pub use diagnostic::Range;
pub use diagnostic::Severity;
pub use file::FileChange;
pub use file::FileError;
pub use file::FileHandle;
pub use file::FileIdentity;
pub use file::FileKind;
pub use file::FileSource;
pub use fs::FileStat;
pub use fs::FileSystem;
pub use fs::InMemoryFileSystem;
pub use fs::OsFileSystem;
pub use hash::ContentHash;
pub use paths::in_dir;
pub use paths::path_to_url;
pub use paths::url_dir;
pub use paths::url_file_name;
pub use paths::url_join;
pub use paths::url_to_path;
