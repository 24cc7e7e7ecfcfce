//! Point-in-time views of a workspace.
//!
//! A [`Snapshot`] is only reachable through a [`SnapshotRef`], which counts
//! as one reference for as long as it lives. When the last reference drops,
//! the snapshot cancels its background work and frees its derived state.
//! A [`WeakSnapshot`] names a snapshot without keeping it alive.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use gantry_source::in_dir;
use gantry_source::path_to_url;
use gantry_source::url_dir;
use gantry_source::url_to_path;
use gantry_source::Cache;
use gantry_source::ContentHash;
use gantry_source::CriticalError;
use gantry_source::FileChange;
use gantry_source::FileHandle;
use gantry_source::FileIdentity;
use gantry_source::FileKind;
use gantry_source::FileSource;
use gantry_workspace::Workspace;
use im::OrdMap;
use im::OrdSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::error::SnapshotError;
use crate::error::ToolchainError;
use crate::lock;
use crate::metadata::Metadata;
use crate::metadata::MetadataGraph;
use crate::metadata::PackageId;
use crate::metadata::PackagePath;
use crate::toolchain::LoadRequest;
use crate::toolchain::LoadScope;
use crate::toolchain::ModuleGraph;
use crate::toolchain::Package;
use crate::toolchain::ParseMode;
use crate::toolchain::ParsedFile;
use crate::toolchain::TypecheckMode;
use crate::view::ViewCore;

static NEXT_GLOBAL_ID: AtomicU64 = AtomicU64::new(1);

type Files = OrdMap<Url, Arc<dyn FileHandle>>;
type PackageKey = (PackageId, TypecheckMode);
type ParseKey = (FileIdentity, ParseMode);

/// What the toolchain has told us about the snapshot's packages.
#[derive(Clone, Default)]
struct LoadState {
    /// The workspace-wide load has succeeded for the current workspace.
    initialized: bool,
    init_error: Option<CriticalError>,
    meta: MetadataGraph,
    modules: ModuleGraph,
    workspace_packages: OrdMap<PackageId, PackagePath>,
    /// Files whose packages must be reloaded before their metadata is used.
    pending: OrdSet<Url>,
    /// Files the toolchain placed in no package. Cleared when they change.
    unloadable: OrdSet<Url>,
}

pub struct Snapshot {
    sequence_id: u64,
    global_id: u64,
    view: Arc<ViewCore>,
    /// Scopes background work for this snapshot; cancelled on teardown.
    cancel: CancellationToken,
    refs: AtomicUsize,
    workspace: Arc<Workspace>,
    files: Mutex<Files>,
    state: Mutex<LoadState>,
    packages: Mutex<OrdMap<PackageKey, Arc<Package>>>,
    parsed: Mutex<OrdMap<ParseKey, Arc<ParsedFile>>>,
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("view", &self.view.name)
            .field("sequence_id", &self.sequence_id)
            .field("global_id", &self.global_id)
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A counted reference to a [`Snapshot`].
///
/// Cloning acquires another reference; dropping releases it. The snapshot
/// is torn down when its last reference is released.
pub struct SnapshotRef {
    snapshot: Arc<Snapshot>,
}

impl SnapshotRef {
    fn adopt(snapshot: Snapshot) -> Self {
        debug_assert_eq!(snapshot.refs.load(Ordering::Relaxed), 1);
        Self {
            snapshot: Arc::new(snapshot),
        }
    }

    /// Name the snapshot without holding a reference to it.
    #[must_use]
    pub fn downgrade(&self) -> WeakSnapshot {
        WeakSnapshot {
            global_id: self.snapshot.global_id,
            snapshot: Arc::downgrade(&self.snapshot),
        }
    }

    /// Release this reference. Equivalent to dropping it.
    pub fn release(self) {
        drop(self);
    }
}

impl Clone for SnapshotRef {
    fn clone(&self) -> Self {
        // Holding `self` keeps the count above zero.
        self.snapshot.refs.fetch_add(1, Ordering::Relaxed);
        Self {
            snapshot: Arc::clone(&self.snapshot),
        }
    }
}

impl Deref for SnapshotRef {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl Drop for SnapshotRef {
    fn drop(&mut self) {
        let previous = self.snapshot.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(
            previous > 0,
            "snapshot {} released more often than it was acquired",
            self.snapshot.global_id
        );
        if previous == 1 {
            self.snapshot.teardown();
        }
    }
}

impl fmt::Debug for SnapshotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot.fmt(f)
    }
}

/// A snapshot that may already have been released.
///
/// Holds no memory of the snapshot: once the last reference is released the
/// snapshot is freed.
#[derive(Clone, Debug)]
pub struct WeakSnapshot {
    global_id: u64,
    snapshot: Weak<Snapshot>,
}

impl WeakSnapshot {
    #[must_use]
    pub fn global_id(&self) -> u64 {
        self.global_id
    }

    /// Acquire a reference, unless the snapshot has been released.
    pub fn acquire(&self) -> Result<SnapshotRef, SnapshotError> {
        let released = SnapshotError::Released(self.global_id);
        // Upgrading can briefly outlive the last release; the count decides.
        let snapshot = self.snapshot.upgrade().ok_or_else(|| released.clone())?;
        let mut current = snapshot.refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(released);
            }
            match snapshot.refs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(SnapshotRef { snapshot }),
                Err(actual) => current = actual,
            }
        }
    }
}

/// The snapshot's files, falling back to the cache for files it has not seen.
struct FileSet<'a> {
    files: Files,
    cache: &'a Cache,
}

impl FileSource for FileSet<'_> {
    fn get_file(&self, uri: &Url) -> Arc<dyn FileHandle> {
        match self.files.get(uri) {
            Some(file) => Arc::clone(file),
            None => FileSource::get_file(self.cache, uri),
        }
    }
}

impl Snapshot {
    /// Create the first snapshot of a view.
    pub(crate) fn new(
        view: Arc<ViewCore>,
        sequence_id: u64,
        workspace: Arc<Workspace>,
        files: Files,
    ) -> SnapshotRef {
        let cancel = view.cancel.child_token();
        let snapshot = Snapshot {
            sequence_id,
            global_id: NEXT_GLOBAL_ID.fetch_add(1, Ordering::Relaxed),
            view,
            cancel,
            refs: AtomicUsize::new(1),
            workspace,
            files: Mutex::new(files),
            state: Mutex::new(LoadState::default()),
            packages: Mutex::new(OrdMap::new()),
            parsed: Mutex::new(OrdMap::new()),
        };
        debug!(
            view = %snapshot.view.name,
            sequence_id,
            global_id = snapshot.global_id,
            "created snapshot"
        );
        SnapshotRef::adopt(snapshot)
    }

    fn teardown(&self) {
        self.cancel.cancel();
        lock(&self.packages).clear();
        lock(&self.parsed).clear();
        self.view.cache.prune_memo();
        debug!(
            view = %self.view.name,
            sequence_id = self.sequence_id,
            global_id = self.global_id,
            "released snapshot"
        );
    }

    /// Position in the view's lineage.
    #[must_use]
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Unique across every snapshot of the process.
    #[must_use]
    pub fn global_id(&self) -> u64 {
        self.global_id
    }

    #[must_use]
    pub fn view_name(&self) -> &str {
        &self.view.name
    }

    #[must_use]
    pub fn folder(&self) -> &Url {
        &self.view.folder
    }

    #[must_use]
    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// Cancelled when the snapshot is torn down or its view shuts down.
    #[must_use]
    pub fn background(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the workspace-wide package load has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        lock(&self.state).initialized
    }

    fn file_source(&self) -> FileSet<'_> {
        FileSet {
            files: lock(&self.files).clone(),
            cache: &self.view.cache,
        }
    }

    /// The snapshot's state of `uri`, read through the cache on first use.
    pub fn get_file(&self, uri: &Url) -> Arc<dyn FileHandle> {
        let mut files = lock(&self.files);
        if let Some(file) = files.get(uri) {
            return Arc::clone(file);
        }
        let file = FileSource::get_file(&*self.view.cache, uri);
        files.insert(uri.clone(), Arc::clone(&file));
        file
    }

    /// The snapshot's state of `uri`, if it has seen the file.
    #[must_use]
    pub fn find_file(&self, uri: &Url) -> Option<Arc<dyn FileHandle>> {
        lock(&self.files).get(uri).cloned()
    }

    /// Whether `uri` is open in the editor.
    #[must_use]
    pub fn is_open(&self, uri: &Url) -> bool {
        self.find_file(uri).is_some_and(|file| file.is_overlay())
    }

    /// Every file the snapshot has seen, in URI order.
    #[must_use]
    pub fn known_files(&self) -> Vec<Url> {
        lock(&self.files).keys().cloned().collect()
    }

    /// The workspace's active module files.
    #[must_use]
    pub fn mod_files(&self) -> Vec<Url> {
        self.workspace.active_mod_files().iter().cloned().collect()
    }

    #[must_use]
    pub fn work_file(&self) -> Option<&Url> {
        self.workspace.work_file()
    }

    /// The directories the toolchain loads packages from.
    #[must_use]
    pub fn workspace_dirs(&self) -> Vec<Url> {
        self.workspace.dirs(&self.file_source()).to_vec()
    }

    /// Glob patterns a client should watch to keep this snapshot current.
    #[must_use]
    pub fn file_watching_glob_patterns(&self) -> BTreeSet<String> {
        self.workspace_dirs()
            .iter()
            .filter_map(url_to_path)
            .map(|dir| format!("{dir}/**/*.{{go,mod,sum,work}}"))
            .collect()
    }

    /// The workspace directories plus every directory between them and a
    /// known file.
    pub(crate) fn known_dirs(&self) -> BTreeSet<Url> {
        let fs = self.file_source();
        let dirs = self.workspace.dirs(&fs);
        let roots: Vec<Utf8PathBuf> = dirs.iter().filter_map(url_to_path).collect();
        let mut known: BTreeSet<Url> = dirs.iter().cloned().collect();
        for uri in fs.files.keys() {
            let Some(path) = url_to_path(uri) else {
                continue;
            };
            let Some(root) = roots.iter().find(|root| in_dir(root, &path)) else {
                continue;
            };
            for dir in path.ancestors().skip(1) {
                if !in_dir(root, dir) {
                    break;
                }
                if let Some(url) = path_to_url(dir) {
                    known.insert(url);
                }
            }
        }
        known
    }

    /// Known files located in `dir` or below it.
    pub(crate) fn known_files_in_dir(&self, dir: &Utf8Path) -> Vec<Url> {
        lock(&self.files)
            .keys()
            .filter(|uri| url_to_path(uri).is_some_and(|path| path.as_path() != dir && in_dir(dir, &path)))
            .cloned()
            .collect()
    }

    /// A workspace-wide error that makes finer diagnostics unreliable.
    #[must_use]
    pub fn critical_error(&self) -> Option<CriticalError> {
        if let Some(err) = self.workspace.critical_error(&self.file_source()) {
            return Some(err);
        }
        lock(&self.state).init_error.clone()
    }

    /// Parse `file`, sharing the result with every snapshot that parses the
    /// same content in the same mode.
    pub fn parse(&self, file: &dyn FileHandle, mode: ParseMode) -> Arc<ParsedFile> {
        let key = (file.identity(), mode);
        if let Some(parsed) = lock(&self.parsed).get(&key) {
            return Arc::clone(parsed);
        }
        let parsed = self.parse_shared(file, mode);
        lock(&self.parsed).insert(key, Arc::clone(&parsed));
        parsed
    }

    fn parse_shared(&self, file: &dyn FileHandle, mode: ParseMode) -> Arc<ParsedFile> {
        let identity = file.identity();
        let key = ContentHash::of_fmt(format_args!(
            "parse\0{}\0{}\0{mode:?}",
            identity.uri, identity.hash
        ));
        self.view
            .cache
            .memoize(key, || self.view.checker.parse(file, mode))
    }

    fn header(&self, file: &dyn FileHandle) -> ContentHash {
        self.parse(file, ParseMode::Header).header
    }

    #[must_use]
    pub fn metadata(&self, id: &PackageId) -> Option<Arc<Metadata>> {
        lock(&self.state).meta.get(id).cloned()
    }

    /// The packages containing `uri`, narrowest first, loading them if the
    /// snapshot does not know them yet.
    pub fn metadata_for_file(&self, uri: &Url) -> Result<Vec<Arc<Metadata>>, SnapshotError> {
        self.ensure_loaded()?;
        if self.get_file(uri).kind() != FileKind::Source {
            return Ok(Vec::new());
        }
        {
            let mut state = lock(&self.state);
            if state.meta.ids_for_file(uri).is_empty() && !state.unloadable.contains(uri) {
                state.pending.insert(uri.clone());
            }
        }
        self.reload_pending();

        let state = lock(&self.state);
        Ok(state
            .meta
            .ids_for_file(uri)
            .iter()
            .filter_map(|id| state.meta.get(id).cloned())
            .collect())
    }

    /// The packages being developed, as opposed to dependencies.
    pub fn workspace_packages(&self) -> Result<BTreeMap<PackageId, PackagePath>, SnapshotError> {
        self.ensure_loaded()?;
        Ok(lock(&self.state)
            .workspace_packages
            .iter()
            .map(|(id, path)| (id.clone(), path.clone()))
            .collect())
    }

    pub fn reverse_dependencies(
        &self,
        id: &PackageId,
        transitive: bool,
    ) -> Result<BTreeMap<PackageId, Arc<Metadata>>, SnapshotError> {
        self.ensure_loaded()?;
        Ok(lock(&self.state).meta.reverse_dependencies(id, transitive))
    }

    /// Type-check the packages `ids`. Results are memoized for the lifetime
    /// of the snapshot and carried into successors the change does not touch.
    pub fn type_check(
        &self,
        mode: TypecheckMode,
        ids: &[PackageId],
    ) -> Result<Vec<Arc<Package>>, SnapshotError> {
        self.ensure_loaded()?;
        ids.iter().map(|id| self.type_check_one(mode, id)).collect()
    }

    fn type_check_one(&self, mode: TypecheckMode, id: &PackageId) -> Result<Arc<Package>, SnapshotError> {
        let key = (id.clone(), mode);
        if let Some(package) = lock(&self.packages).get(&key) {
            return Ok(Arc::clone(package));
        }

        let (metadata, in_workspace) = {
            let state = lock(&self.state);
            let metadata = state
                .meta
                .get(id)
                .cloned()
                .ok_or_else(|| SnapshotError::UnknownPackage(id.clone()))?;
            (metadata, state.workspace_packages.contains_key(id))
        };
        let parse_mode = match mode {
            TypecheckMode::Workspace if !in_workspace => ParseMode::Exported,
            _ => ParseMode::Full,
        };
        let files: Vec<Arc<ParsedFile>> = metadata
            .compiled_go_files
            .iter()
            .map(|uri| self.parse(&*self.get_file(uri), parse_mode))
            .collect();
        let package = Arc::new(self.view.checker.type_check(&metadata, &files, mode));

        let mut packages = lock(&self.packages);
        Ok(Arc::clone(packages.entry(key).or_insert(package)))
    }

    fn ensure_loaded(&self) -> Result<(), SnapshotError> {
        self.initialize(false);
        self.reload_pending();
        if self.cancel.is_cancelled() {
            return Err(ToolchainError::Cancelled.into());
        }
        Ok(())
    }

    /// Load the workspace's packages unless that already succeeded.
    ///
    /// The first attempt for a view signals its completion, whatever the
    /// outcome, to [`View::await_initialized`](crate::View::await_initialized).
    pub(crate) fn initialize(&self, first_attempt: bool) {
        {
            let _load = lock(&self.view.load_lock);
            if !lock(&self.state).initialized {
                self.load_workspace();
            }
        }
        if first_attempt {
            self.view.initialized.send_replace(true);
        }
    }

    fn load_workspace(&self) {
        let result = self.with_request(|request| {
            let modules = self.view.toolchain.resolve_module_graph(request)?;
            let packages = self
                .view
                .toolchain
                .list_packages(request, &LoadScope::Workspace)?;
            Ok((modules, packages))
        });

        let mut state = lock(&self.state);
        match result {
            Ok((modules, packages)) => {
                let meta = MetadataGraph::new(packages);
                let workspace_packages = workspace_packages(&meta, &modules, &self.view);
                info!(
                    view = %self.view.name,
                    packages = meta.len(),
                    workspace_packages = workspace_packages.len(),
                    "loaded workspace"
                );
                *state = LoadState {
                    initialized: true,
                    init_error: None,
                    meta,
                    modules,
                    workspace_packages,
                    pending: OrdSet::new(),
                    unloadable: OrdSet::new(),
                };
            }
            Err(ToolchainError::Cancelled) => {
                debug!(view = %self.view.name, "workspace load cancelled");
            }
            Err(err) => {
                warn!(view = %self.view.name, error = %err, "workspace load failed");
                state.init_error = Some(CriticalError::new(&err));
            }
        }
    }

    /// Reload the packages of files whose metadata was invalidated.
    fn reload_pending(&self) {
        let _load = lock(&self.view.load_lock);
        let pending: Vec<Url> = lock(&self.state).pending.iter().cloned().collect();
        if pending.is_empty() {
            return;
        }

        let scope = LoadScope::Files(pending.clone());
        let result = self.with_request(|request| self.view.toolchain.list_packages(request, &scope));

        let mut state = lock(&self.state);
        match result {
            Ok(packages) => {
                debug!(files = pending.len(), packages = packages.len(), "reloaded packages");
                let meta = state
                    .meta
                    .update(packages.into_iter().map(|m| (m.id.clone(), Some(m))));
                for uri in &pending {
                    state.pending.remove(uri);
                    if meta.ids_for_file(uri).is_empty() {
                        state.unloadable.insert(uri.clone());
                    }
                }
                state.workspace_packages = workspace_packages(&meta, &state.modules, &self.view);
                state.meta = meta;
            }
            Err(ToolchainError::Cancelled) => {}
            Err(err) => {
                warn!(files = pending.len(), error = %err, "reloading packages failed");
                for uri in pending {
                    state.pending.remove(&uri);
                    state.unloadable.insert(uri);
                }
            }
        }
    }

    /// Run `f` with a request describing this snapshot's view of the
    /// workspace. The synthetic module directory lives until `f` returns.
    fn with_request<T>(
        &self,
        f: impl FnOnce(&LoadRequest) -> Result<T, ToolchainError>,
    ) -> Result<T, ToolchainError> {
        if self.cancel.is_cancelled() {
            return Err(ToolchainError::Cancelled);
        }
        let fs = self.file_source();
        let mod_dir = if self.workspace.uses_workspace_module() {
            self.workspace.materialize(&fs)?
        } else {
            None
        };
        let request = LoadRequest {
            dirs: self.workspace.dirs(&fs).to_vec(),
            env: self.view.options.env.clone(),
            overlays: fs
                .files
                .values()
                .filter(|file| file.is_overlay() && !file.saved())
                .filter_map(|file| Some((file.uri().clone(), file.read().ok()?)))
                .collect(),
            mod_dir: mod_dir
                .as_ref()
                .and_then(|dir| Utf8Path::from_path(dir.path()))
                .map(Utf8Path::to_path_buf),
            cancel: self.cancel.clone(),
        };

        let result = f(&request);
        drop(mod_dir);
        if self.cancel.is_cancelled() {
            return Err(ToolchainError::Cancelled);
        }
        result
    }

    /// Derive the successor snapshot for `changes`.
    ///
    /// Returns `None` when no change is relevant, in which case this snapshot
    /// stays current. Otherwise the flag reports whether the workspace must
    /// be reloaded in the background.
    pub(crate) fn clone_with(
        &self,
        changes: &BTreeMap<Url, FileChange>,
        force_reload: bool,
    ) -> Option<(SnapshotRef, bool)> {
        let previous_files = lock(&self.files).clone();
        let mut files = previous_files.clone();
        for (uri, change) in changes {
            if change.exists {
                files.insert(uri.clone(), Arc::clone(&change.handle));
            } else {
                files.remove(uri);
            }
        }

        let (workspace, workspace_reinit) = if changes.keys().any(Workspace::is_manifest) {
            let fs = FileSet {
                files: files.clone(),
                cache: &self.view.cache,
            };
            self.workspace.invalidate(changes, &fs)
        } else {
            (Arc::clone(&self.workspace), false)
        };
        let workspace_changed = !Arc::ptr_eq(&workspace, &self.workspace);

        let relevant = force_reload
            || workspace_changed
            || changes
                .keys()
                .any(|uri| previous_files.contains_key(uri) || self.view.contains(uri));
        if !relevant {
            return None;
        }

        let mut state = lock(&self.state).clone();
        let mut stale: BTreeSet<PackageId> = BTreeSet::new();
        let mut reload: BTreeSet<PackageId> = BTreeSet::new();
        let mut changed: BTreeSet<&Url> = BTreeSet::new();

        for (uri, change) in changes {
            let previous = previous_files.get(uri);
            if !content_changed(previous, change) {
                continue;
            }
            changed.insert(uri);
            state.unloadable.remove(uri);
            stale.extend(state.meta.ids_for_file(uri).iter().cloned());

            if change.handle.kind() != FileKind::Source {
                continue;
            }
            let created_or_deleted = !matches!(previous, Some(p) if p.exists() == change.exists);
            let header_changed = created_or_deleted
                || match previous {
                    Some(previous) if change.exists => {
                        self.header(previous.as_ref()) != self.header(change.handle.as_ref())
                    }
                    _ => true,
                };
            if !header_changed {
                continue;
            }

            reload.extend(state.meta.ids_for_file(uri).iter().cloned());
            if created_or_deleted {
                // A new or removed file changes the package of its directory.
                let dir = url_dir(uri);
                reload.extend(
                    state
                        .meta
                        .iter()
                        .filter(|m| m.files().any(|file| url_dir(file) == dir))
                        .map(|m| m.id.clone()),
                );
            }
            if change.exists {
                state.pending.insert(uri.clone());
            }
        }

        for id in &reload {
            if let Some(m) = state.meta.get(id) {
                state.pending.extend(m.files().cloned());
            }
        }
        stale.extend(reload.iter().cloned());
        let importers: Vec<PackageId> = stale
            .iter()
            .flat_map(|id| state.meta.reverse_dependencies(id, true).into_keys())
            .collect();
        stale.extend(importers);

        state.meta = state.meta.update(reload.iter().map(|id| (id.clone(), None)));
        for (uri, change) in changes {
            if !change.exists {
                state.pending.remove(uri);
            }
        }

        let reset = workspace_changed || force_reload;
        if reset {
            state.initialized = false;
        }

        let packages = if reset {
            OrdMap::new()
        } else {
            let mut packages = lock(&self.packages).clone();
            let doomed: Vec<PackageKey> = packages
                .keys()
                .filter(|(id, _)| stale.contains(id))
                .cloned()
                .collect();
            for key in &doomed {
                packages.remove(key);
            }
            packages
        };

        let mut parsed = lock(&self.parsed).clone();
        let doomed: Vec<ParseKey> = parsed
            .keys()
            .filter(|(identity, _)| changed.contains(&identity.uri))
            .cloned()
            .collect();
        for key in &doomed {
            parsed.remove(key);
        }

        let reinit = workspace_reinit || force_reload;
        let successor = Snapshot {
            sequence_id: self.sequence_id + 1,
            global_id: NEXT_GLOBAL_ID.fetch_add(1, Ordering::Relaxed),
            view: Arc::clone(&self.view),
            cancel: self.view.cancel.child_token(),
            refs: AtomicUsize::new(1),
            workspace,
            files: Mutex::new(files),
            state: Mutex::new(state),
            packages: Mutex::new(packages),
            parsed: Mutex::new(parsed),
        };
        debug!(
            view = %self.view.name,
            sequence_id = successor.sequence_id,
            global_id = successor.global_id,
            changed = changed.len(),
            stale_packages = stale.len(),
            reloaded_packages = reload.len(),
            reinit,
            "created snapshot"
        );
        Some((SnapshotRef::adopt(successor), reinit))
    }
}

/// Reports whether `change` carries content different from `previous`.
/// A file the snapshot never read counts as changed.
fn content_changed(previous: Option<&Arc<dyn FileHandle>>, change: &FileChange) -> bool {
    if change.is_unchanged {
        return false;
    }
    match previous {
        Some(previous) => {
            previous.exists() != change.exists
                || previous.identity().hash != change.handle.identity().hash
        }
        None => true,
    }
}

fn workspace_packages(
    meta: &MetadataGraph,
    modules: &ModuleGraph,
    view: &ViewCore,
) -> OrdMap<PackageId, PackagePath> {
    meta.iter()
        .filter(|m| !m.is_intermediate_test_variant())
        .filter(|m| match &m.module {
            Some(module) => {
                module.main || modules.main_modules().any(|main| main.path == module.path)
            }
            None => m.files().any(|uri| view.contains(uri)),
        })
        .map(|m| (m.id.clone(), m.pkg_path.clone()))
        .collect()
}
