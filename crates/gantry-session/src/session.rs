use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use gantry_conf::Options;
use gantry_source::url_dir;
use gantry_source::url_to_path;
use gantry_source::Cache;
use gantry_source::FileChange;
use gantry_source::FileHandle;
use gantry_source::FileKind;
use gantry_source::FileSource;
use gantry_workspace::find_module_source;
use gantry_workspace::Workspace;
use gantry_workspace::WorkspaceOptions;
use im::OrdMap;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::error::SessionError;
use crate::lock;
use crate::overlay::FileAction;
use crate::overlay::FileModification;
use crate::overlay::Overlay;
use crate::overlay::Overlays;
use crate::snapshot::Snapshot;
use crate::snapshot::SnapshotRef;
use crate::toolchain::Checker;
use crate::toolchain::Toolchain;
use crate::view::View;
use crate::view::ViewConfig;
use crate::view::ViewCore;

#[derive(Default)]
struct Views {
    list: Vec<Arc<View>>,
    /// Best view per URI, cleared whenever `list` changes.
    memo: FxHashMap<Url, Arc<View>>,
}

impl Views {
    fn position(&self, view: &Arc<View>) -> Option<usize> {
        self.list.iter().position(|v| Arc::ptr_eq(v, view))
    }
}

/// The state of one editor connection: its views and open files.
///
/// Lock order is views, then overlays.
pub struct Session {
    cache: Arc<Cache>,
    toolchain: Arc<dyn Toolchain>,
    checker: Arc<dyn Checker>,
    runtime: Handle,
    views: Mutex<Views>,
    overlays: Mutex<Overlays>,
}

impl Session {
    /// Create a session whose background work runs on `runtime`.
    #[must_use]
    pub fn new(
        cache: Arc<Cache>,
        toolchain: Arc<dyn Toolchain>,
        checker: Arc<dyn Checker>,
        runtime: Handle,
    ) -> Self {
        Self {
            cache,
            toolchain,
            checker,
            runtime,
            views: Mutex::new(Views::default()),
            overlays: Mutex::new(Overlays::default()),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Add a view for `folder`. Its workspace loads in the background.
    #[tracing::instrument(skip(self, options), fields(folder = %folder))]
    pub fn new_view(
        &self,
        name: &str,
        folder: Url,
        options: Options,
    ) -> Result<(Arc<View>, SnapshotRef), SessionError> {
        let mut views = lock(&self.views);
        if views.list.iter().any(|view| same_dir(view.folder(), &folder)) {
            return Err(SessionError::ViewExists(folder));
        }
        let (view, snapshot) = self.create_view(name, folder, Arc::new(options), 0)?;
        views.list.push(Arc::clone(&view));
        views.memo.clear();
        Ok((view, snapshot))
    }

    fn create_view(
        &self,
        name: &str,
        folder: Url,
        options: Arc<Options>,
        sequence_id: u64,
    ) -> Result<(Arc<View>, SnapshotRef), SessionError> {
        let folder_path =
            url_to_path(&folder).ok_or_else(|| SessionError::NotFileUri(folder.clone()))?;
        let workspace_options = WorkspaceOptions::from_options(&folder_path, &options)?;

        let root_source = find_module_source(
            &folder,
            self,
            &workspace_options.filter,
            workspace_options.use_workspace_module,
            workspace_options.scan_file_limit,
        );
        let root = match &root_source {
            Some(source) if options.expand_workspace_to_module => {
                url_dir(source).unwrap_or_else(|| folder.clone())
            }
            _ => folder.clone(),
        };
        let workspace = Arc::new(Workspace::new(root.clone(), &workspace_options, self));

        let core = Arc::new(ViewCore::new(
            ViewConfig {
                name: name.to_string(),
                folder,
                folder_path,
                root,
                root_source,
                options,
                workspace_options,
            },
            Arc::clone(&self.cache),
            Arc::clone(&self.toolchain),
            Arc::clone(&self.checker),
        ));

        let files: OrdMap<Url, Arc<dyn FileHandle>> = lock(&self.overlays)
            .values()
            .filter(|overlay| core.contains(overlay.uri()))
            .map(|overlay| {
                let file: Arc<dyn FileHandle> = Arc::clone(overlay) as Arc<dyn FileHandle>;
                (overlay.uri().clone(), file)
            })
            .collect();

        info!(
            view = %core.name,
            root = %core.root,
            source = %workspace.source(),
            modules = workspace.active_mod_files().len(),
            "created view"
        );
        let snapshot = Snapshot::new(Arc::clone(&core), sequence_id, workspace, files);
        let view = Arc::new(View::new(core, snapshot.clone(), self.runtime.clone()));
        view.spawn_initialize(snapshot.clone());
        Ok((view, snapshot))
    }

    /// The view named `name`.
    #[must_use]
    pub fn view(&self, name: &str) -> Option<Arc<View>> {
        lock(&self.views)
            .list
            .iter()
            .find(|view| view.name() == name)
            .cloned()
    }

    /// The view that best serves `uri`.
    pub fn view_of(&self, uri: &Url) -> Result<Arc<View>, SessionError> {
        let mut views = lock(&self.views);
        view_of_locked(&mut views, uri)
    }

    #[must_use]
    pub fn views(&self) -> Vec<Arc<View>> {
        lock(&self.views).list.clone()
    }

    pub fn remove_view(&self, view: &Arc<View>) {
        let mut views = lock(&self.views);
        if let Some(i) = drop_view(&mut views, view) {
            views.list.remove(i);
        }
    }

    /// Recreate `view` with new options.
    pub fn update_view(
        &self,
        view: &Arc<View>,
        options: Options,
    ) -> Result<Arc<View>, SessionError> {
        let mut views = lock(&self.views);
        self.update_view_locked(&mut views, view, Arc::new(options))
    }

    fn update_view_locked(
        &self,
        views: &mut Views,
        view: &Arc<View>,
        options: Arc<Options>,
    ) -> Result<Arc<View>, SessionError> {
        // The new lineage continues from the old one.
        let sequence_id = view.sequence_id().ok_or(SessionError::ViewShutdown)? + 1;
        let i = drop_view(views, view)
            .ok_or_else(|| SessionError::ViewNotFound(view.name().to_string()))?;

        match self.create_view(view.name(), view.folder().clone(), options, sequence_id) {
            Ok((new_view, _snapshot)) => {
                views.list[i] = Arc::clone(&new_view);
                Ok(new_view)
            }
            Err(err) => {
                views.list.remove(i);
                Err(err)
            }
        }
    }

    pub fn shutdown(&self) {
        let list = {
            let mut views = lock(&self.views);
            views.memo.clear();
            std::mem::take(&mut views.list)
        };
        for view in &list {
            view.shutdown();
        }
        info!(views = list.len(), "shut down session");
    }

    /// Apply editor and file-watcher events.
    ///
    /// Overlays are updated first, then every view the changes are relevant
    /// to is invalidated. Returns each resulting snapshot with the URIs it
    /// should diagnose; every URI is attributed to exactly one snapshot.
    /// Dropping the result releases the snapshots.
    ///
    /// Fails without changing any state if an event breaks the overlay
    /// protocol, such as editing a file that was never opened, or if an
    /// editor event arrives while the session has no views.
    #[tracing::instrument(skip_all, fields(changes = changes.len()))]
    pub fn did_modify_files(
        &self,
        changes: &[FileModification],
    ) -> Result<Vec<(SnapshotRef, Vec<Url>)>, SessionError> {
        let mut views = lock(&self.views);
        // Editor events need a view to land in; refuse them before touching
        // any overlay.
        if views.list.is_empty() && changes.iter().any(|change| !change.on_disk) {
            return Err(SessionError::NoViews);
        }
        let overlays = self.update_overlays(changes)?;

        if changes
            .iter()
            .any(|c| matches!(FileKind::from_url(&c.uri), FileKind::Mod | FileKind::Work))
        {
            for view in views.list.clone() {
                let options = view.workspace_options();
                let source = find_module_source(
                    view.folder(),
                    self,
                    &options.filter,
                    options.use_workspace_module,
                    options.scan_file_limit,
                );
                if source.as_ref() == view.root_source()
                    && !self.workspace_manifest_toggled(&view, changes)
                {
                    continue;
                }
                info!(view = view.name(), "root manifest changed; recreating view");
                if let Err(err) =
                    self.update_view_locked(&mut views, &view, Arc::clone(view.options()))
                {
                    error!(view = view.name(), error = %err, "recreating view failed");
                }
            }
        }

        let mut per_view: Vec<BTreeMap<Url, FileChange>> = vec![BTreeMap::new(); views.list.len()];
        let mut affected: Vec<(Url, Vec<usize>)> = Vec::new();
        let mut force_reload = false;
        for change in changes {
            if change.action == FileAction::InvalidateMetadata {
                force_reload = true;
            }

            let mut relevant: Vec<usize> = views
                .list
                .iter()
                .enumerate()
                .filter(|(_, view)| view.relevant_change(change))
                .map(|(i, _)| i)
                .collect();
            if relevant.is_empty() {
                if change.on_disk {
                    continue;
                }
                let best = view_of_locked(&mut views, &change.uri)?;
                relevant.extend(views.position(&best));
            }

            let file: Arc<dyn FileHandle> = match overlays.get(&change.uri) {
                Some(overlay) => Arc::clone(overlay) as Arc<dyn FileHandle>,
                None => FileSource::get_file(&*self.cache, &change.uri),
            };
            for &i in &relevant {
                let is_unchanged = matches!(change.action, FileAction::Open | FileAction::Close)
                    && views.list[i].has_content(&change.uri, &file);
                per_view[i].insert(
                    change.uri.clone(),
                    FileChange::new(Arc::clone(&file), is_unchanged),
                );
            }
            affected.push((change.uri.clone(), relevant));
        }

        let mut snapshots: Vec<Option<SnapshotRef>> = Vec::with_capacity(per_view.len());
        for (view, changes) in views.list.iter().zip(&per_view) {
            if changes.is_empty() {
                snapshots.push(None);
                continue;
            }
            snapshots.push(Some(view.invalidate_content(changes, force_reload)?));
        }

        let mut result: Vec<(SnapshotRef, Vec<Url>)> = Vec::new();
        let mut slots: FxHashMap<usize, usize> = FxHashMap::default();
        for (uri, relevant) in affected {
            let candidates: Vec<Arc<View>> =
                relevant.iter().map(|&i| Arc::clone(&views.list[i])).collect();
            let Some(best) = best_view(&uri, &candidates).map(|i| relevant[i]) else {
                continue;
            };
            let Some(snapshot) = &snapshots[best] else {
                continue;
            };
            match slots.get(&best) {
                Some(&slot) => result[slot].1.push(uri),
                None => {
                    slots.insert(best, result.len());
                    result.push((snapshot.clone(), vec![uri]));
                }
            }
        }
        debug!(snapshots = result.len(), "modified files");
        Ok(result)
    }

    /// Reports whether `changes` delete the manifest `view`'s workspace was
    /// built from, or create the `go.work` its environment names.
    fn workspace_manifest_toggled(&self, view: &View, changes: &[FileModification]) -> bool {
        let Ok(snapshot) = view.snapshot() else {
            return false;
        };
        let manifest = snapshot.workspace().manifest();
        let explicit = view.workspace_options().explicit_gowork.as_ref();
        changes.iter().any(|change| {
            if manifest.as_ref() == Some(&change.uri) {
                !self.get_file(&change.uri).exists()
            } else {
                explicit == Some(&change.uri) && self.get_file(&change.uri).exists()
            }
        })
    }

    /// Apply `changes` to a copy of the overlays and install the copy only if
    /// every change was valid. Returns the resulting overlays of the changed
    /// files.
    fn update_overlays(
        &self,
        changes: &[FileModification],
    ) -> Result<FxHashMap<Url, Arc<Overlay>>, SessionError> {
        let mut overlays = lock(&self.overlays);
        let mut next = overlays.clone();
        for change in changes {
            next.apply(change, &*self.cache)?;
        }
        let changed = changes
            .iter()
            .filter_map(|c| next.get(&c.uri).map(|o| (c.uri.clone(), Arc::clone(o))))
            .collect();
        *overlays = next;
        Ok(changed)
    }

    /// Apply changes through [`Session::did_modify_files`] and release the
    /// resulting snapshots.
    pub fn modify_files(&self, changes: &[FileModification]) -> Result<(), SessionError> {
        self.did_modify_files(changes).map(drop)
    }

    /// Replace each change naming a directory some view knows with one
    /// change per known file inside it.
    #[must_use]
    pub fn expand_modifications_to_directories(
        &self,
        changes: Vec<FileModification>,
    ) -> Vec<FileModification> {
        let snapshots: Vec<SnapshotRef> = lock(&self.views)
            .list
            .iter()
            .filter_map(|view| view.snapshot().ok())
            .collect();
        let known_dirs: BTreeSet<Url> = snapshots
            .iter()
            .flat_map(|snapshot| snapshot.known_dirs())
            .collect();

        let mut result = Vec::with_capacity(changes.len());
        for change in changes {
            if !known_dirs.contains(&change.uri) {
                result.push(change);
                continue;
            }
            let Some(dir) = url_to_path(&change.uri) else {
                continue;
            };
            let files: BTreeSet<Url> = snapshots
                .iter()
                .flat_map(|snapshot| snapshot.known_files_in_dir(&dir))
                .collect();
            result.extend(files.into_iter().map(|uri| FileModification {
                uri,
                action: change.action,
                on_disk: change.on_disk,
                version: None,
                text: None,
                language_id: None,
            }));
        }
        result
    }

    /// Glob patterns covering every workspace directory of every view.
    #[must_use]
    pub fn file_watching_glob_patterns(&self) -> BTreeSet<String> {
        lock(&self.views)
            .list
            .iter()
            .filter_map(|view| view.snapshot().ok())
            .flat_map(|snapshot| snapshot.file_watching_glob_patterns())
            .collect()
    }

    /// The open overlays, in URI order.
    #[must_use]
    pub fn overlays(&self) -> Vec<Arc<Overlay>> {
        let mut overlays: Vec<Arc<Overlay>> = lock(&self.overlays).values().cloned().collect();
        overlays.sort_by(|a, b| a.uri().cmp(b.uri()));
        overlays
    }

    /// The session's state of `uri`: its overlay if open, else disk.
    pub fn get_file(&self, uri: &Url) -> Arc<dyn FileHandle> {
        if let Some(overlay) = lock(&self.overlays).get(uri) {
            return Arc::clone(overlay) as Arc<dyn FileHandle>;
        }
        FileSource::get_file(&*self.cache, uri)
    }
}

impl FileSource for Session {
    fn get_file(&self, uri: &Url) -> Arc<dyn FileHandle> {
        Session::get_file(self, uri)
    }
}

fn view_of_locked(views: &mut Views, uri: &Url) -> Result<Arc<View>, SessionError> {
    if let Some(view) = views.memo.get(uri) {
        return Ok(Arc::clone(view));
    }
    let i = best_view(uri, &views.list).ok_or(SessionError::NoViews)?;
    let view = Arc::clone(&views.list[i]);
    views.memo.insert(uri.clone(), Arc::clone(&view));
    Ok(view)
}

/// Shut `view` down and forget it, leaving its slot in place. Returns the
/// slot, or `None` if the view is not in the session.
fn drop_view(views: &mut Views, view: &Arc<View>) -> Option<usize> {
    views.memo.clear();
    let Some(i) = views.position(view) else {
        warn!(view = view.name(), "view not found in session");
        return None;
    };
    view.shutdown();
    Some(i)
}

/// Pick the view for `uri`: among the views containing it (under their root
/// or folder, not filtered out), the one with the longest folder; else one
/// that already knows the file; else the first. Ties go to the later view.
fn best_view(uri: &Url, views: &[Arc<View>]) -> Option<usize> {
    let mut longest: Option<(usize, usize)> = None;
    for (i, view) in views.iter().enumerate() {
        if !view.contains(uri) {
            continue;
        }
        let len = view.folder().as_str().len();
        if longest.is_some_and(|(_, best)| best > len) {
            continue;
        }
        longest = Some((i, len));
    }
    if let Some((i, _)) = longest {
        return Some(i);
    }
    if let Some(i) = views.iter().position(|view| view.known_file(uri)) {
        return Some(i);
    }
    if views.is_empty() {
        None
    } else {
        Some(0)
    }
}

/// Reports whether two folder URIs name the same directory.
fn same_dir(a: &Url, b: &Url) -> bool {
    if a == b {
        return true;
    }
    let canonical = |uri: &Url| {
        url_to_path(uri).map(|path| path.canonicalize_utf8().unwrap_or(path))
    };
    match (canonical(a), canonical(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_dir_compares_paths() {
        let a = Url::parse("file:///ws/a").unwrap();
        assert!(same_dir(&a, &Url::parse("file:///ws/a").unwrap()));
        assert!(!same_dir(&a, &Url::parse("file:///ws/b").unwrap()));
        assert!(!same_dir(&a, &Url::parse("untitled:a").unwrap()));
    }
}
