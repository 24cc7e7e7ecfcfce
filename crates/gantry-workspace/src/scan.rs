use camino::Utf8Path;
use camino::Utf8PathBuf;
use gantry_conf::DirectoryFilters;
use gantry_source::path_to_url;
use ignore::WalkBuilder;
use im::OrdSet;
use url::Url;

/// Files visited before a module scan gives up.
pub const DEFAULT_FILE_LIMIT: usize = 1_000_000;

/// Decides which directories under a workspace folder are off limits.
///
/// Filters are matched against paths relative to the folder the user opened,
/// which may differ from the root a workspace ends up using.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathFilter {
    folder: Utf8PathBuf,
    filters: DirectoryFilters,
}

impl PathFilter {
    #[must_use]
    pub fn new(folder: Utf8PathBuf, filters: DirectoryFilters) -> Self {
        Self { folder, filters }
    }

    /// Reports whether the absolute `path` is excluded by a directory filter.
    #[must_use]
    pub fn excludes(&self, path: &Utf8Path) -> bool {
        if self.filters.is_empty() {
            return false;
        }
        match path.strip_prefix(&self.folder) {
            Ok(relative) => self.filters.excludes(relative),
            Err(_) => false,
        }
    }
}

/// Directories the toolchain never treats as holding packages: hidden,
/// underscore-prefixed, `testdata`, and `vendor`.
#[must_use]
pub fn is_ignored_dir(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_') || name == "testdata" || name == "vendor"
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleScan {
    /// `go.mod` files found, possibly partial when `exhausted`.
    pub modules: OrdSet<Url>,
    /// The scan stopped at the file limit before covering the tree.
    pub exhausted: bool,
}

/// Walk `root` looking for `go.mod` files.
///
/// Ignored directories and directories excluded by `filter` are pruned, not
/// descended into. Unreadable entries are skipped. When `mod_limit` is
/// non-zero the walk stops once that many modules are found; when
/// `file_limit` is non-zero it stops after visiting that many entries and
/// reports the scan as exhausted.
#[must_use]
pub fn find_modules(
    root: &Utf8Path,
    filter: &PathFilter,
    mod_limit: usize,
    file_limit: usize,
) -> ModuleScan {
    let prune = filter.clone();
    let mut builder = WalkBuilder::new(root.as_std_path());
    builder
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                return true;
            }
            let Some(path) = Utf8Path::from_path(entry.path()) else {
                return false;
            };
            let ignored = path.file_name().is_some_and(is_ignored_dir);
            !ignored && !prune.excludes(path)
        });

    let mut scan = ModuleScan::default();
    let mut searched = 0;
    for entry in builder.build() {
        // Probably a permission error. Keep looking.
        let Ok(entry) = entry else {
            continue;
        };

        if entry.file_name() == "go.mod" && entry.file_type().is_some_and(|ft| ft.is_file()) {
            if let Some(uri) = Utf8Path::from_path(entry.path()).and_then(path_to_url) {
                scan.modules.insert(uri);
            }
        }
        if mod_limit > 0 && scan.modules.len() >= mod_limit {
            break;
        }

        searched += 1;
        if file_limit > 0 && searched >= file_limit {
            tracing::warn!(%root, searched, "module scan exhausted the file limit");
            scan.exhausted = true;
            break;
        }
    }
    scan
}
