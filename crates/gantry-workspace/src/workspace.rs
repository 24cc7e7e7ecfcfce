use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use gantry_conf::ConfigError;
use gantry_conf::ModuleMode;
use gantry_conf::Options;
use gantry_source::in_dir;
use gantry_source::path_to_url;
use gantry_source::url_file_name;
use gantry_source::url_to_path;
use gantry_source::CriticalError;
use gantry_source::Diagnostic;
use gantry_source::DiagnosticSource;
use gantry_source::FileChange;
use gantry_source::FileKind;
use gantry_source::FileSource;
use gantry_source::Position;
use gantry_source::Range;
use im::OrdSet;
use tempfile::TempDir;
use tracing::debug;
use tracing::warn;
use url::Url;

use crate::error::WorkspaceError;
use crate::merge::absolute_path;
use crate::merge::build_workspace_mod_file;
use crate::merge::build_workspace_sum_file;
use crate::merge::parse_mod;
use crate::modfile::ModFile;
use crate::modfile::WorkFile;
use crate::scan::find_modules;
use crate::scan::PathFilter;
use crate::scan::DEFAULT_FILE_LIMIT;

/// How the set of active modules was derived.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModuleSource {
    /// At most the root's own `go.mod` is active.
    Legacy,
    /// Modules listed by a `gantry.mod` at the root.
    GantryMod,
    /// Modules listed by a `go.work`.
    GoWork,
    /// Modules found by walking the root.
    FileSystem,
}

impl fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModuleSource::Legacy => "legacy",
            ModuleSource::GantryMod => "gantry.mod",
            ModuleSource::GoWork => "go.work",
            ModuleSource::FileSystem => "file system",
        })
    }
}

#[derive(Clone, Debug)]
pub struct WorkspaceOptions {
    /// A `go.work` named by the environment, taking the place of `<root>/go.work`.
    pub explicit_gowork: Option<Url>,
    pub filter: PathFilter,
    /// Module mode is off: nothing is active.
    pub legacy: bool,
    pub use_workspace_module: bool,
    pub scan_file_limit: usize,
}

impl Default for WorkspaceOptions {
    fn default() -> Self {
        Self {
            explicit_gowork: None,
            filter: PathFilter::default(),
            legacy: false,
            use_workspace_module: false,
            scan_file_limit: DEFAULT_FILE_LIMIT,
        }
    }
}

impl WorkspaceOptions {
    /// Derive workspace settings for the folder the user opened.
    pub fn from_options(folder: &Utf8Path, options: &Options) -> Result<Self, ConfigError> {
        let explicit_gowork = options
            .gowork()
            .and_then(|path| path_to_url(&absolute_path(folder, &path)));
        Ok(Self {
            explicit_gowork,
            filter: PathFilter::new(folder.to_owned(), options.filters()?),
            legacy: options.module_mode == ModuleMode::Off,
            use_workspace_module: options.experimental_workspace_module,
            scan_file_limit: options.scan_file_limit,
        })
    }
}

#[derive(Debug)]
struct Common {
    root: Url,
    root_path: Utf8PathBuf,
    explicit_gowork: Option<Url>,
}

/// State carried into a rebuilt workspace, kept when rebuilding fails.
#[derive(Clone, Debug, Default)]
struct Seed {
    mod_file: Option<Arc<ModFile>>,
    sum: Option<Arc<[u8]>>,
    dirs: Option<Arc<[Url]>>,
}

#[derive(Debug)]
struct Built {
    mod_file: Option<Arc<ModFile>>,
    sum: Option<Arc<[u8]>>,
    dirs: Arc<[Url]>,
    error: Option<WorkspaceError>,
}

impl Built {
    fn failed(root: &Url, error: WorkspaceError) -> Self {
        Self {
            mod_file: None,
            sum: None,
            dirs: Arc::from(vec![root.clone()]),
            error: Some(error),
        }
    }
}

/// The modules that make up a workspace root.
///
/// A workspace is immutable once constructed. The synthetic module
/// descriptor, checksum bytes and workspace directories are built lazily, at
/// most once, on first use; concurrent callers wait for the first build.
/// [`Workspace::invalidate`] derives a successor for a set of file changes and
/// returns the same workspace when none of them matter.
#[derive(Debug)]
pub struct Workspace {
    common: Arc<Common>,
    source: ModuleSource,
    active: OrdSet<Url>,
    known: OrdSet<Url>,
    work_file: Option<Url>,
    seed: Seed,
    built: OnceLock<Arc<Built>>,
}

impl Workspace {
    #[tracing::instrument(skip_all, fields(root = %root))]
    pub fn new(root: Url, options: &WorkspaceOptions, fs: &dyn FileSource) -> Self {
        let common = Arc::new(Common {
            root_path: url_to_path(&root).unwrap_or_default(),
            root,
            explicit_gowork: options.explicit_gowork.clone(),
        });

        if let Some(workspace) = Self::load_explicit(&common, fs) {
            return workspace;
        }

        let scan = find_modules(
            &common.root_path,
            &options.filter,
            0,
            options.scan_file_limit,
        );
        let (source, active) = if options.legacy {
            (ModuleSource::Legacy, OrdSet::new())
        } else if options.use_workspace_module && !scan.exhausted {
            (ModuleSource::FileSystem, scan.modules.clone())
        } else {
            if options.use_workspace_module {
                warn!("module scan exhausted; only the root module is active");
            }
            (ModuleSource::Legacy, legacy_modules(&common, fs))
        };
        debug!(%source, active = active.len(), known = scan.modules.len(), "resolved workspace");

        Self {
            common,
            source,
            active,
            known: scan.modules,
            work_file: None,
            seed: Seed::default(),
            built: OnceLock::new(),
        }
    }

    fn load_explicit(common: &Arc<Common>, fs: &dyn FileSource) -> Option<Self> {
        for source in [ModuleSource::GoWork, ModuleSource::GantryMod] {
            let Some(uri) = manifest_uri(common, source) else {
                continue;
            };
            let Ok(content) = fs.get_file(&uri).read() else {
                continue;
            };

            let mut workspace = Self {
                common: Arc::clone(common),
                source,
                active: OrdSet::new(),
                known: OrdSet::new(),
                work_file: (source == ModuleSource::GoWork).then(|| uri.clone()),
                seed: Seed::default(),
                built: OnceLock::new(),
            };
            match parse_manifest(common, source, &uri, &String::from_utf8_lossy(&content), fs) {
                Ok((mod_file, modules)) => {
                    debug!(%source, active = modules.len(), "resolved workspace");
                    workspace.seed.mod_file = Some(Arc::new(mod_file));
                    workspace.known = modules.clone();
                    workspace.active = modules;
                }
                Err(err) => {
                    warn!(%uri, error = %err, "workspace manifest is invalid");
                    let _ = workspace
                        .built
                        .set(Arc::new(Built::failed(&common.root, err)));
                }
            }
            return Some(workspace);
        }
        None
    }

    #[must_use]
    pub fn root(&self) -> &Url {
        &self.common.root
    }

    #[must_use]
    pub fn source(&self) -> ModuleSource {
        self.source
    }

    /// The `go.mod` files whose packages belong to the workspace.
    #[must_use]
    pub fn active_mod_files(&self) -> &OrdSet<Url> {
        &self.active
    }

    /// Every `go.mod` file seen under the root, active or not.
    #[must_use]
    pub fn known_mod_files(&self) -> &OrdSet<Url> {
        &self.known
    }

    #[must_use]
    pub fn work_file(&self) -> Option<&Url> {
        self.work_file.as_ref()
    }

    /// The file that lists the workspace's modules, for `go.work` and
    /// `gantry.mod` workspaces.
    #[must_use]
    pub fn manifest(&self) -> Option<Url> {
        manifest_uri(&self.common, self.source)
    }

    /// Whether toolchain invocations should use the synthetic descriptor.
    #[must_use]
    pub fn uses_workspace_module(&self) -> bool {
        self.source != ModuleSource::Legacy
    }

    /// Reports whether `uri` is any kind of module manifest.
    #[must_use]
    pub fn is_manifest(uri: &Url) -> bool {
        matches!(
            FileKind::from_url(uri),
            FileKind::Mod | FileKind::Sum | FileKind::Work
        )
    }

    fn build(&self, fs: &dyn FileSource) -> &Built {
        self.built.get_or_init(|| Arc::new(self.compute_build(fs)))
    }

    fn compute_build(&self, fs: &dyn FileSource) -> Built {
        let root = &self.common.root;
        let mut mod_file = self.seed.mod_file.clone();
        let mut error = None;

        if self.source == ModuleSource::FileSystem {
            match build_workspace_mod_file(&self.active, fs) {
                Ok(file) => mod_file = Some(Arc::new(file)),
                Err(err) if mod_file.is_some() => {
                    warn!(%root, error = %err, "building workspace module failed; keeping the previous one");
                }
                Err(err) => error = Some(err),
            }
        }

        let dirs = match &mod_file {
            Some(file) => workspace_dirs(root, file),
            None => self
                .seed
                .dirs
                .clone()
                .unwrap_or_else(|| Arc::from(vec![root.clone()])),
        };

        let sum = match build_workspace_sum_file(&self.active, fs) {
            Ok(bytes) => Some(Arc::from(bytes)),
            Err(err) => {
                warn!(%root, error = %err, "building workspace sum file failed");
                self.seed.sum.clone()
            }
        };

        debug!(%root, dirs = dirs.len(), failed = error.is_some(), "built workspace");
        Built {
            mod_file,
            sum,
            dirs,
            error,
        }
    }

    /// The synthetic module descriptor, if this workspace has one.
    pub fn mod_file(&self, fs: &dyn FileSource) -> Result<Option<Arc<ModFile>>, WorkspaceError> {
        let built = self.build(fs);
        match &built.error {
            Some(err) => Err(err.clone()),
            None => Ok(built.mod_file.clone()),
        }
    }

    /// The merged `go.sum` bytes of the active modules.
    pub fn sum_file(&self, fs: &dyn FileSource) -> Option<Arc<[u8]>> {
        self.build(fs).sum.clone()
    }

    /// The directories the toolchain loads packages from, sorted: the root
    /// plus every directory replacement of the workspace module.
    pub fn dirs(&self, fs: &dyn FileSource) -> Arc<[Url]> {
        Arc::clone(&self.build(fs).dirs)
    }

    /// A problem with the workspace setup that makes finer diagnostics
    /// unreliable.
    pub fn critical_error(&self, fs: &dyn FileSource) -> Option<CriticalError> {
        if let Some(uri) = self.manifest() {
            if let Ok(content) = fs.get_file(&uri).read() {
                let text = String::from_utf8_lossy(&content);
                if let Err(err) = parse_manifest(&self.common, self.source, &uri, &text, fs) {
                    return Some(critical(&uri, &err));
                }
            }
        }

        let diagnostics: Vec<Diagnostic> = self
            .active
            .iter()
            .filter_map(|uri| match parse_mod(fs, uri) {
                Err(err @ WorkspaceError::Modfile(_)) => Some(manifest_diagnostic(uri, &err)),
                _ => None,
            })
            .collect();
        if !diagnostics.is_empty() {
            let mut error = CriticalError::new(format!(
                "errors parsing {} module file(s)",
                diagnostics.len()
            ));
            error.diagnostics = diagnostics;
            return Some(error);
        }

        let err = self.build(fs).error.as_ref()?;
        Some(match &self.work_file {
            Some(uri) => critical(uri, err),
            None => CriticalError::new(err),
        })
    }

    /// Write the synthetic `go.mod` and `go.sum` into a fresh temporary
    /// directory for a toolchain invocation. The directory is removed when
    /// the returned handle drops.
    pub fn materialize(&self, fs: &dyn FileSource) -> Result<Option<TempDir>, WorkspaceError> {
        let Some(mod_file) = self.mod_file(fs)? else {
            return Ok(None);
        };
        let dir = tempfile::Builder::new()
            .prefix("gantry-workspace-")
            .tempdir()
            .map_err(|err| WorkspaceError::Write {
                path: Utf8PathBuf::from(std::env::temp_dir().to_string_lossy().into_owned()),
                message: err.to_string(),
            })?;

        let write = |name: &str, bytes: &[u8]| {
            let path = dir.path().join(name);
            std::fs::write(&path, bytes).map_err(|err| WorkspaceError::Write {
                path: Utf8PathBuf::from(path.to_string_lossy().into_owned()),
                message: err.to_string(),
            })
        };
        write("go.mod", mod_file.to_string().as_bytes())?;
        if let Some(sum) = self.sum_file(fs) {
            write("go.sum", &sum)?;
        }
        Ok(Some(dir))
    }

    /// Derive the workspace that reflects `changes`.
    ///
    /// Returns this same workspace when no change affects it. The flag
    /// reports whether a saved manifest changed, so package metadata must be
    /// reloaded.
    ///
    /// Deleting the `go.work` or `gantry.mod` this workspace was built from
    /// keeps its modules: the owning view is expected to be recreated with a
    /// freshly resolved source.
    #[must_use]
    pub fn invalidate(
        self: &Arc<Self>,
        changes: &BTreeMap<Url, FileChange>,
        fs: &dyn FileSource,
    ) -> (Arc<Self>, bool) {
        let mut result = Workspace {
            common: Arc::clone(&self.common),
            source: self.source,
            active: self.active.clone(),
            known: self.known.clone(),
            work_file: self.work_file.clone(),
            seed: self.current_seed(),
            built: OnceLock::new(),
        };

        let (mut changed, mut reinit) = result.apply_manifest_change(changes, fs);

        let root_mod = path_to_url(&self.common.root_path.join("go.mod"));
        for (uri, change) in changes {
            if change.is_unchanged || url_file_name(uri).as_deref() != Some("go.mod") {
                continue;
            }
            if !url_to_path(uri).is_some_and(|path| in_dir(&self.common.root_path, &path)) {
                continue;
            }
            changed = true;
            let active =
                result.source != ModuleSource::Legacy || root_mod.as_ref() == Some(uri);
            reinit = reinit || (active && change.saved());
            if matches!(
                result.source,
                ModuleSource::GantryMod | ModuleSource::GoWork
            ) {
                continue;
            }
            if change.exists {
                result.known.insert(uri.clone());
                if active {
                    result.active.insert(uri.clone());
                }
            } else {
                result.known.remove(uri);
                result.active.remove(uri);
            }
        }

        for (uri, change) in changes {
            if url_file_name(uri).as_deref() != Some("go.sum") {
                continue;
            }
            let Some(mod_uri) = sibling(uri, "go.mod") else {
                continue;
            };
            if !result.active.contains(&mod_uri) {
                continue;
            }
            changed = true;
            reinit = reinit || change.saved();
        }

        if !changed {
            return (Arc::clone(self), false);
        }
        (Arc::new(result), reinit)
    }

    fn current_seed(&self) -> Seed {
        match self.built.get() {
            Some(built) => Seed {
                mod_file: built.mod_file.clone(),
                sum: built.sum.clone(),
                dirs: Some(Arc::clone(&built.dirs)),
            },
            None => self.seed.clone(),
        }
    }

    fn apply_manifest_change(
        &mut self,
        changes: &BTreeMap<Url, FileChange>,
        fs: &dyn FileSource,
    ) -> (bool, bool) {
        if !matches!(self.source, ModuleSource::GoWork | ModuleSource::GantryMod) {
            return (false, false);
        }
        let Some(uri) = self.manifest() else {
            return (false, false);
        };
        let Some(change) = changes.get(&uri) else {
            return (false, false);
        };
        if change.is_unchanged {
            return (false, false);
        }

        let content = match (&change.content, change.exists) {
            (Some(content), true) => content,
            _ => {
                warn!(%uri, "workspace manifest deleted; keeping the previous modules");
                return (false, false);
            }
        };
        let text = String::from_utf8_lossy(content);
        match parse_manifest(&self.common, self.source, &uri, &text, fs) {
            Ok((mod_file, modules)) => {
                self.seed.mod_file = Some(Arc::new(mod_file));
                self.known = modules.clone();
                self.active = modules;
                (true, change.saved())
            }
            Err(err) => {
                warn!(%uri, error = %err, "workspace manifest does not parse; keeping the previous modules");
                (false, false)
            }
        }
    }
}

fn manifest_uri(common: &Common, source: ModuleSource) -> Option<Url> {
    match source {
        ModuleSource::GantryMod => path_to_url(&common.root_path.join("gantry.mod")),
        ModuleSource::GoWork => match &common.explicit_gowork {
            Some(uri) => Some(uri.clone()),
            None => path_to_url(&common.root_path.join("go.work")),
        },
        ModuleSource::Legacy | ModuleSource::FileSystem => None,
    }
}

fn legacy_modules(common: &Common, fs: &dyn FileSource) -> OrdSet<Url> {
    let mut modules = OrdSet::new();
    if let Some(uri) = path_to_url(&common.root_path.join("go.mod")) {
        if fs.get_file(&uri).exists() {
            modules.insert(uri);
        }
    }
    modules
}

fn parse_manifest(
    common: &Common,
    source: ModuleSource,
    uri: &Url,
    text: &str,
    fs: &dyn FileSource,
) -> Result<(ModFile, OrdSet<Url>), WorkspaceError> {
    match source {
        ModuleSource::GoWork => {
            let base = url_to_path(uri)
                .and_then(|path| path.parent().map(Utf8Path::to_owned))
                .unwrap_or_else(|| common.root_path.clone());
            parse_go_work(&base, uri, text, fs)
        }
        _ => parse_gantry_mod(&common.root_path, uri, text),
    }
}

fn parse_go_work(
    base: &Utf8Path,
    uri: &Url,
    text: &str,
    fs: &dyn FileSource,
) -> Result<(ModFile, OrdSet<Url>), WorkspaceError> {
    let work = WorkFile::parse(uri.as_str(), text)?;
    let mut modules = OrdSet::new();
    for dir in &work.uses {
        if let Some(mod_uri) = path_to_url(&absolute_path(base, dir).join("go.mod")) {
            modules.insert(mod_uri);
        }
    }

    let mut mod_file = build_workspace_mod_file(&modules, fs)?;
    let Some(go) = work.go else {
        return Err(WorkspaceError::MissingGoDirective);
    };
    mod_file.go = Some(go);

    for mut replace in work.replaces {
        if replace.is_directory() {
            replace.new_path = absolute_path(base, &replace.new_path).to_string();
        }
        mod_file
            .replaces
            .retain(|r| r.old_path != replace.old_path || r.old_version != replace.old_version);
        mod_file.replaces.push(replace);
    }
    Ok((mod_file, modules))
}

fn parse_gantry_mod(
    root: &Utf8Path,
    uri: &Url,
    text: &str,
) -> Result<(ModFile, OrdSet<Url>), WorkspaceError> {
    let mut file = ModFile::parse(uri.as_str(), text)?;
    let mut modules = OrdSet::new();
    for replace in &mut file.replaces {
        if let Some(version) = &replace.new_version {
            return Err(WorkspaceError::VersionedReplace {
                path: replace.new_path.clone(),
                version: version.clone(),
            });
        }
        let dir = absolute_path(root, &replace.new_path);
        if let Some(mod_uri) = path_to_url(&dir.join("go.mod")) {
            modules.insert(mod_uri);
        }
        replace.new_path = dir.to_string();
    }
    Ok((file, modules))
}

fn workspace_dirs(root: &Url, file: &ModFile) -> Arc<[Url]> {
    let mut dirs = BTreeSet::from([root.clone()]);
    for replace in &file.replaces {
        // replacing a module with a different version, not a path on disk
        if !replace.is_directory() {
            continue;
        }
        if let Some(dir) = path_to_url(Utf8Path::new(&replace.new_path)) {
            dirs.insert(dir);
        }
    }
    dirs.into_iter().collect::<Vec<_>>().into()
}

fn sibling(uri: &Url, name: &str) -> Option<Url> {
    let dir = url_to_path(uri)?.parent()?.to_owned();
    path_to_url(&dir.join(name))
}

fn manifest_diagnostic(uri: &Url, err: &WorkspaceError) -> Diagnostic {
    let mut diagnostic = Diagnostic::error(uri.clone(), DiagnosticSource::Workspace, err.to_string());
    if let Some(line) = err.line() {
        let line = u32::try_from(line.saturating_sub(1)).unwrap_or(u32::MAX);
        let at = Position::new(line, 0);
        diagnostic.range = Range { start: at, end: at };
    }
    diagnostic
}

fn critical(uri: &Url, err: &WorkspaceError) -> CriticalError {
    CriticalError::new(err).with_diagnostic(manifest_diagnostic(uri, err))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use gantry_source::Cache;
    use gantry_source::FileHandle;
    use gantry_source::InMemoryFileSystem;
    use gantry_source::OsFileSystem;
    use tempfile::tempdir;

    use super::*;

    fn uri(path: &str) -> Url {
        Url::parse(&format!("file://{path}")).unwrap()
    }

    fn memory(files: &[(&str, &str)]) -> (Arc<InMemoryFileSystem>, Cache) {
        let fs = Arc::new(InMemoryFileSystem::new());
        for (path, content) in files {
            fs.write(*path, *content);
        }
        let cache = Cache::new(fs.clone());
        (fs, cache)
    }

    fn disk(files: &[(&str, &str)]) -> (TempDir, Utf8PathBuf, Cache) {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        for (path, content) in files {
            let path = root.join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        (dir, root, Cache::new(Arc::new(OsFileSystem)))
    }

    fn changed(cache: &Cache, uris: &[&Url]) -> BTreeMap<Url, FileChange> {
        uris.iter()
            .map(|uri| ((*uri).clone(), FileChange::new(cache.get_file(uri), false)))
            .collect()
    }

    fn urls(paths: &[Utf8PathBuf]) -> OrdSet<Url> {
        paths.iter().map(|path| path_to_url(path).unwrap()).collect()
    }

    mod scanned {
        use super::*;

        fn scan_options() -> WorkspaceOptions {
            WorkspaceOptions {
                use_workspace_module: true,
                ..WorkspaceOptions::default()
            }
        }

        #[test]
        fn filesystem_scan_activates_every_module() {
            let (_dir, root, cache) = disk(&[
                ("go.mod", "module example.com/a\n"),
                ("sub/go.mod", "module example.com/b\n"),
            ]);
            let ws = Workspace::new(path_to_url(&root).unwrap(), &scan_options(), &cache);

            assert_eq!(ws.source(), ModuleSource::FileSystem);
            let expected = urls(&[root.join("go.mod"), root.join("sub/go.mod")]);
            assert_eq!(ws.active_mod_files(), &expected);
            assert_eq!(ws.known_mod_files(), &expected);
            assert_eq!(ws.dirs(&cache).len(), 2);
            assert!(ws.critical_error(&cache).is_none());
        }

        /// Counts reads so builds can be told apart.
        struct CountingSource<'a> {
            cache: &'a Cache,
            reads: AtomicUsize,
        }

        impl FileSource for CountingSource<'_> {
            fn get_file(&self, uri: &Url) -> Arc<dyn FileHandle> {
                self.reads.fetch_add(1, Ordering::SeqCst);
                FileSource::get_file(self.cache, uri)
            }
        }

        #[test]
        fn concurrent_first_build_runs_once() {
            let (_dir, root, cache) = disk(&[
                ("a/go.mod", "module example.com/a\n"),
                ("a/go.sum", ""),
                ("b/go.mod", "module example.com/b\n"),
            ]);
            let source = CountingSource {
                cache: &cache,
                reads: AtomicUsize::new(0),
            };
            let root = path_to_url(&root).unwrap();

            let alone = Workspace::new(root.clone(), &scan_options(), &cache);
            alone.dirs(&source);
            let one_build = source.reads.swap(0, Ordering::SeqCst);
            assert!(one_build > 0);

            let ws = Workspace::new(root, &scan_options(), &cache);
            let dirs: Vec<Arc<[Url]>> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| ws.dirs(&source))).collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            assert_eq!(source.reads.load(Ordering::SeqCst), one_build);
            assert!(dirs.iter().all(|d| Arc::ptr_eq(d, &dirs[0])));
            assert_eq!(dirs[0].len(), 3);
        }

        #[test]
        fn legacy_mode_activates_root_module_only() {
            let (_dir, root, cache) = disk(&[
                ("go.mod", "module example.com/a\n"),
                ("sub/go.mod", "module example.com/b\n"),
            ]);
            let ws = Workspace::new(
                path_to_url(&root).unwrap(),
                &WorkspaceOptions::default(),
                &cache,
            );

            assert_eq!(ws.source(), ModuleSource::Legacy);
            assert_eq!(ws.active_mod_files(), &urls(&[root.join("go.mod")]));
            assert_eq!(ws.known_mod_files().len(), 2);
            assert_eq!(ws.mod_file(&cache).unwrap(), None);
            assert_eq!(&*ws.dirs(&cache), &[path_to_url(&root).unwrap()]);
        }

        #[test]
        fn module_mode_off_activates_nothing() {
            let (_dir, root, cache) = disk(&[("go.mod", "module example.com/a\n")]);
            let options = WorkspaceOptions {
                legacy: true,
                ..scan_options()
            };
            let ws = Workspace::new(path_to_url(&root).unwrap(), &options, &cache);
            assert_eq!(ws.source(), ModuleSource::Legacy);
            assert!(ws.active_mod_files().is_empty());
        }

        #[test]
        fn exhausted_scan_falls_back_to_root_module() {
            let (_dir, root, cache) = disk(&[
                ("go.mod", "module example.com/a\n"),
                ("x/a.go", ""),
                ("y/b.go", ""),
                ("z/go.mod", "module example.com/z\n"),
            ]);
            let options = WorkspaceOptions {
                scan_file_limit: 2,
                ..scan_options()
            };
            let ws = Workspace::new(path_to_url(&root).unwrap(), &options, &cache);
            assert_eq!(ws.source(), ModuleSource::Legacy);
            assert_eq!(ws.active_mod_files(), &urls(&[root.join("go.mod")]));
        }

        #[test]
        fn failed_rebuild_keeps_previous_descriptor() {
            let (_dir, root, cache) = disk(&[("a/go.mod", "module example.com/a\n\ngo 1.20\n")]);
            let ws = Arc::new(Workspace::new(
                path_to_url(&root).unwrap(),
                &scan_options(),
                &cache,
            ));
            let first = ws.mod_file(&cache).unwrap().unwrap();

            let mod_uri = path_to_url(&root.join("a/go.mod")).unwrap();
            std::fs::write(root.join("a/go.mod"), "module\n").unwrap();
            let (next, reinit) = ws.invalidate(&changed(&cache, &[&mod_uri]), &cache);

            assert!(!Arc::ptr_eq(&ws, &next));
            assert!(reinit);
            let second = next.mod_file(&cache).unwrap().unwrap();
            assert_eq!(*second, *first);
            // the broken member is still reported
            assert!(next.critical_error(&cache).is_some());
        }

        #[test]
        fn first_build_failure_is_an_error() {
            let (_dir, root, cache) = disk(&[
                ("a/go.mod", "module example.com/same\n"),
                ("b/go.mod", "module example.com/same\n"),
            ]);
            let ws = Workspace::new(path_to_url(&root).unwrap(), &scan_options(), &cache);
            assert!(matches!(
                ws.mod_file(&cache),
                Err(WorkspaceError::DuplicateModule { .. })
            ));
            let critical = ws.critical_error(&cache).unwrap();
            assert!(critical.main.contains("appears multiple times"));
        }
    }

    mod explicit {
        use super::*;

        const WORK: &str = "go 1.18\n\nuse ./a\n";

        #[test]
        fn work_file_takes_precedence_over_gantry_mod() {
            let (_fs, cache) = memory(&[
                ("/ws/go.work", WORK),
                ("/ws/gantry.mod", "module gantry-workspace\nreplace example.com/b => ./b\n"),
                ("/ws/a/go.mod", "module example.com/a\n"),
                ("/ws/b/go.mod", "module example.com/b\n"),
            ]);
            let ws = Workspace::new(uri("/ws"), &WorkspaceOptions::default(), &cache);

            assert_eq!(ws.source(), ModuleSource::GoWork);
            assert_eq!(ws.work_file(), Some(&uri("/ws/go.work")));
            assert_eq!(ws.manifest(), Some(uri("/ws/go.work")));
            let expected: OrdSet<Url> = [uri("/ws/a/go.mod")].into_iter().collect();
            assert_eq!(ws.active_mod_files(), &expected);
        }

        #[test]
        fn explicit_gowork_overrides_root_work_file() {
            let (_fs, cache) = memory(&[
                ("/ws/go.work", WORK),
                ("/elsewhere/go.work", "go 1.19\nuse /ws/b\n"),
                ("/ws/a/go.mod", "module example.com/a\n"),
                ("/ws/b/go.mod", "module example.com/b\n"),
            ]);
            let options = WorkspaceOptions {
                explicit_gowork: Some(uri("/elsewhere/go.work")),
                ..WorkspaceOptions::default()
            };
            let ws = Workspace::new(uri("/ws"), &options, &cache);

            let expected: OrdSet<Url> = [uri("/ws/b/go.mod")].into_iter().collect();
            assert_eq!(ws.active_mod_files(), &expected);
            assert_eq!(ws.mod_file(&cache).unwrap().unwrap().go.as_deref(), Some("1.19"));
        }

        #[test]
        fn work_file_descriptor() {
            let (_fs, cache) = memory(&[
                ("/ws/go.work", WORK),
                ("/ws/a/go.mod", "module example.com/a\n\ngo 1.16\n"),
            ]);
            let ws = Workspace::new(uri("/ws"), &WorkspaceOptions::default(), &cache);
            let mod_file = ws.mod_file(&cache).unwrap().unwrap();
            insta::assert_snapshot!(mod_file.to_string(), @r"
            module gantry-workspace

            go 1.18

            require example.com/a v0.9999999.0-gantryworkspace

            replace example.com/a => /ws/a
            ");
            assert_eq!(&*ws.dirs(&cache), &[uri("/ws"), uri("/ws/a")]);
        }

        #[test]
        fn gantry_mod_lists_replacement_directories() {
            let (_fs, cache) = memory(&[
                (
                    "/ws/gantry.mod",
                    "module gantry-workspace\n\nrequire example.com/b v0.0.0\n\nreplace example.com/b => ./b\n",
                ),
                ("/ws/b/go.mod", "module example.com/b\n"),
            ]);
            let ws = Workspace::new(uri("/ws"), &WorkspaceOptions::default(), &cache);

            assert_eq!(ws.source(), ModuleSource::GantryMod);
            assert_eq!(ws.work_file(), None);
            let expected: OrdSet<Url> = [uri("/ws/b/go.mod")].into_iter().collect();
            assert_eq!(ws.active_mod_files(), &expected);
            assert!(ws.dirs(&cache).contains(&uri("/ws/b")));
        }

        #[test]
        fn gantry_mod_rejects_versioned_replacements() {
            let (_fs, cache) = memory(&[(
                "/ws/gantry.mod",
                "module gantry-workspace\nreplace example.com/b => example.com/c v1.0.0\n",
            )]);
            let ws = Workspace::new(uri("/ws"), &WorkspaceOptions::default(), &cache);

            assert_eq!(ws.source(), ModuleSource::GantryMod);
            assert!(ws.active_mod_files().is_empty());
            assert!(matches!(
                ws.mod_file(&cache),
                Err(WorkspaceError::VersionedReplace { .. })
            ));
        }

        #[test]
        fn work_file_without_go_directive_is_critical() {
            let (_fs, cache) = memory(&[
                ("/ws/go.work", "use ./a\n"),
                ("/ws/a/go.mod", "module example.com/a\n"),
            ]);
            let ws = Workspace::new(uri("/ws"), &WorkspaceOptions::default(), &cache);

            assert_eq!(ws.source(), ModuleSource::GoWork);
            assert!(ws.active_mod_files().is_empty());
            let critical = ws.critical_error(&cache).unwrap();
            assert_eq!(&*critical.main, "go.work has missing or incomplete go directive");
            assert_eq!(critical.diagnostics[0].uri, uri("/ws/go.work"));
        }

        #[test]
        fn materialize_writes_descriptor_and_sums() {
            let (_fs, cache) = memory(&[
                ("/ws/go.work", WORK),
                ("/ws/a/go.mod", "module example.com/a\n"),
                ("/ws/a/go.sum", "example.com/x v1.0.0 h1:x=\n"),
            ]);
            let ws = Workspace::new(uri("/ws"), &WorkspaceOptions::default(), &cache);

            let dir = ws.materialize(&cache).unwrap().unwrap();
            let written = std::fs::read_to_string(dir.path().join("go.mod")).unwrap();
            assert_eq!(written, ws.mod_file(&cache).unwrap().unwrap().to_string());
            let sums = std::fs::read_to_string(dir.path().join("go.sum")).unwrap();
            assert_eq!(sums, "example.com/x v1.0.0 h1:x=\n");
        }
    }

    mod invalidate {
        use super::*;

        fn work_space() -> (Arc<InMemoryFileSystem>, Cache, Arc<Workspace>) {
            let (fs, cache) = memory(&[
                ("/ws/go.work", "go 1.18\n\nuse ./a\n"),
                ("/ws/a/go.mod", "module example.com/a\n"),
                ("/ws/b/go.mod", "module example.com/b\n"),
            ]);
            let ws = Arc::new(Workspace::new(uri("/ws"), &WorkspaceOptions::default(), &cache));
            (fs, cache, ws)
        }

        #[test]
        fn invalid_manifest_keeps_topology() {
            let (fs, cache, ws) = work_space();
            let before = ws.active_mod_files().clone();

            fs.write("/ws/go.work", "go 1.18\nuse (\n");
            let (next, reinit) = ws.invalidate(&changed(&cache, &[&uri("/ws/go.work")]), &cache);

            assert!(Arc::ptr_eq(&ws, &next));
            assert!(!reinit);
            assert_eq!(next.active_mod_files(), &before);
            let critical = next.critical_error(&cache).unwrap();
            assert_eq!(critical.diagnostics[0].uri, uri("/ws/go.work"));
            assert_eq!(critical.diagnostics[0].range.start.line, 1);
        }

        #[test]
        fn valid_manifest_replaces_modules() {
            let (fs, cache, ws) = work_space();

            fs.write("/ws/go.work", "go 1.18\n\nuse (\n\t./a\n\t./b\n)\n");
            let (next, reinit) = ws.invalidate(&changed(&cache, &[&uri("/ws/go.work")]), &cache);

            assert!(!Arc::ptr_eq(&ws, &next));
            assert!(reinit);
            assert_eq!(next.active_mod_files().len(), 2);
            assert_eq!(ws.active_mod_files().len(), 1);
        }

        #[test]
        fn unrelated_changes_return_same_workspace() {
            let (fs, cache, ws) = work_space();
            fs.write("/ws/a/a.go", "package a");
            let (next, reinit) = ws.invalidate(&changed(&cache, &[&uri("/ws/a/a.go")]), &cache);
            assert!(Arc::ptr_eq(&ws, &next));
            assert!(!reinit);
        }

        #[test]
        fn open_and_close_of_manifest_are_ignored() {
            let (_fs, cache, ws) = work_space();
            let work = uri("/ws/go.work");
            let changes = BTreeMap::from([(work.clone(), FileChange::new(cache.get_file(&work), true))]);
            let (next, _) = ws.invalidate(&changes, &cache);
            assert!(Arc::ptr_eq(&ws, &next));
        }

        #[test]
        fn deleting_manifest_keeps_modules() {
            let (fs, cache, ws) = work_space();
            fs.remove(Utf8Path::new("/ws/go.work"));
            let (next, reinit) = ws.invalidate(&changed(&cache, &[&uri("/ws/go.work")]), &cache);
            assert!(Arc::ptr_eq(&ws, &next));
            assert!(!reinit);
        }

        #[test]
        fn nested_module_in_legacy_mode_is_known_not_active() {
            let (fs, cache) = memory(&[("/ws/go.mod", "module example.com/a\n")]);
            let ws = Arc::new(Workspace::new(uri("/ws"), &WorkspaceOptions::default(), &cache));
            assert_eq!(ws.source(), ModuleSource::Legacy);

            fs.write("/ws/sub/go.mod", "module example.com/sub\n");
            let sub = uri("/ws/sub/go.mod");
            let (next, reinit) = ws.invalidate(&changed(&cache, &[&sub]), &cache);

            assert!(!reinit);
            assert!(next.known_mod_files().contains(&sub));
            assert!(!next.active_mod_files().contains(&sub));
        }

        #[test]
        fn sum_changes_matter_only_for_active_modules() {
            let (fs, cache) = memory(&[("/ws/go.mod", "module example.com/a\n")]);
            let ws = Arc::new(Workspace::new(uri("/ws"), &WorkspaceOptions::default(), &cache));

            fs.write("/ws/sub/go.sum", "example.com/x v1.0.0 h1:x=\n");
            let (next, _) = ws.invalidate(&changed(&cache, &[&uri("/ws/sub/go.sum")]), &cache);
            assert!(Arc::ptr_eq(&ws, &next));

            fs.write("/ws/go.sum", "example.com/x v1.0.0 h1:x=\n");
            let (next, reinit) = ws.invalidate(&changed(&cache, &[&uri("/ws/go.sum")]), &cache);
            assert!(!Arc::ptr_eq(&ws, &next));
            assert!(reinit);
        }
    }

    #[test]
    fn options_from_settings() {
        let mut options = Options {
            experimental_workspace_module: true,
            directory_filters: vec!["-gen".to_string()],
            ..Options::default()
        };
        options
            .env
            .insert(gantry_conf::GOWORK.to_string(), "tools/go.work".to_string());

        let ws_options = WorkspaceOptions::from_options(Utf8Path::new("/ws"), &options).unwrap();
        assert!(ws_options.use_workspace_module);
        assert!(!ws_options.legacy);
        assert_eq!(ws_options.explicit_gowork, Some(uri("/ws/tools/go.work")));
        assert!(ws_options.filter.excludes(Utf8Path::new("/ws/gen/x")));
    }
}
