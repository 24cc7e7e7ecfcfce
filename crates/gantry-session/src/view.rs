use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use gantry_conf::Options;
use gantry_source::in_dir;
use gantry_source::url_to_path;
use gantry_source::Cache;
use gantry_source::FileChange;
use gantry_source::FileHandle;
use gantry_source::FileSource;
use gantry_workspace::WorkspaceOptions;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::SessionError;
use crate::lock;
use crate::overlay::FileAction;
use crate::overlay::FileModification;
use crate::snapshot::SnapshotRef;
use crate::toolchain::Checker;
use crate::toolchain::Toolchain;

static NEXT_VIEW_ID: AtomicU64 = AtomicU64::new(1);

/// The parts of a view its snapshots need: configuration and collaborators.
pub(crate) struct ViewCore {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) folder: Url,
    folder_path: Utf8PathBuf,
    /// The folder, or the directory of its root manifest when the view was
    /// expanded to the enclosing module.
    pub(crate) root: Url,
    root_path: Utf8PathBuf,
    pub(crate) root_source: Option<Url>,
    pub(crate) options: Arc<Options>,
    pub(crate) workspace_options: WorkspaceOptions,
    pub(crate) cache: Arc<Cache>,
    pub(crate) toolchain: Arc<dyn Toolchain>,
    pub(crate) checker: Arc<dyn Checker>,
    /// Cancelled on shutdown. Every snapshot's background token is a child.
    pub(crate) cancel: CancellationToken,
    /// Flips to `true` once the first workspace load has been attempted.
    pub(crate) initialized: watch::Sender<bool>,
    /// Serializes toolchain loads for the view.
    pub(crate) load_lock: Mutex<()>,
}

pub(crate) struct ViewConfig {
    pub(crate) name: String,
    pub(crate) folder: Url,
    pub(crate) folder_path: Utf8PathBuf,
    pub(crate) root: Url,
    pub(crate) root_source: Option<Url>,
    pub(crate) options: Arc<Options>,
    pub(crate) workspace_options: WorkspaceOptions,
}

impl ViewCore {
    pub(crate) fn new(
        config: ViewConfig,
        cache: Arc<Cache>,
        toolchain: Arc<dyn Toolchain>,
        checker: Arc<dyn Checker>,
    ) -> Self {
        let (initialized, _) = watch::channel(false);
        Self {
            id: NEXT_VIEW_ID.fetch_add(1, Ordering::Relaxed),
            name: config.name,
            folder: config.folder,
            folder_path: config.folder_path,
            root_path: url_to_path(&config.root).unwrap_or_default(),
            root: config.root,
            root_source: config.root_source,
            options: config.options,
            workspace_options: config.workspace_options,
            cache,
            toolchain,
            checker,
            cancel: CancellationToken::new(),
            initialized,
            load_lock: Mutex::new(()),
        }
    }

    /// Reports whether `uri` lies under the view's root or folder and is not
    /// excluded by a directory filter or a `vendor` directory.
    pub(crate) fn contains(&self, uri: &Url) -> bool {
        let Some(path) = url_to_path(uri) else {
            return false;
        };
        let base = if in_dir(&self.root_path, &path) {
            &self.root_path
        } else if in_dir(&self.folder_path, &path) {
            &self.folder_path
        } else {
            return false;
        };
        if self.workspace_options.filter.excludes(&path) {
            return false;
        }
        path.strip_prefix(base)
            .map(|relative| !relative.components().any(|c| c.as_str() == "vendor"))
            .unwrap_or(false)
    }
}

/// One configured workspace folder and the lineage of snapshots built for it.
pub struct View {
    core: Arc<ViewCore>,
    /// Held only to read or swap the pointer.
    snapshot: Mutex<Option<SnapshotRef>>,
    /// Serializes invalidations so each successor builds on the latest
    /// snapshot.
    invalidation: Mutex<()>,
    runtime: Handle,
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("folder", &self.core.folder.as_str())
            .field("root", &self.core.root.as_str())
            .finish_non_exhaustive()
    }
}

impl View {
    pub(crate) fn new(core: Arc<ViewCore>, snapshot: SnapshotRef, runtime: Handle) -> Self {
        Self {
            core,
            snapshot: Mutex::new(Some(snapshot)),
            invalidation: Mutex::new(()),
            runtime,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.core.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// The folder the view was created for.
    #[must_use]
    pub fn folder(&self) -> &Url {
        &self.core.folder
    }

    #[must_use]
    pub fn root(&self) -> &Url {
        &self.core.root
    }

    /// The manifest that decided the view's root, if any.
    #[must_use]
    pub fn root_source(&self) -> Option<&Url> {
        self.core.root_source.as_ref()
    }

    #[must_use]
    pub fn options(&self) -> &Arc<Options> {
        &self.core.options
    }

    pub(crate) fn workspace_options(&self) -> &WorkspaceOptions {
        &self.core.workspace_options
    }

    /// The current snapshot. The returned reference keeps it alive.
    pub fn snapshot(&self) -> Result<SnapshotRef, SessionError> {
        lock(&self.snapshot).clone().ok_or(SessionError::ViewShutdown)
    }

    /// Wait until the first workspace load has finished, successfully or not.
    pub async fn await_initialized(&self) {
        let mut initialized = self.core.initialized.subscribe();
        // The sender lives in the view core, so this only fails if the view
        // is gone, in which case there is nothing left to wait for.
        let _ = initialized.wait_for(|done| *done).await;
    }

    #[must_use]
    pub fn contains(&self, uri: &Url) -> bool {
        self.core.contains(uri)
    }

    /// Reports whether the current snapshot has seen `uri`.
    #[must_use]
    pub fn known_file(&self, uri: &Url) -> bool {
        self.snapshot()
            .is_ok_and(|snapshot| snapshot.find_file(uri).is_some())
    }

    /// Reports whether `change` should invalidate this view.
    #[must_use]
    pub fn relevant_change(&self, change: &FileModification) -> bool {
        let Ok(snapshot) = self.snapshot() else {
            return false;
        };
        if snapshot.find_file(&change.uri).is_some() {
            return true;
        }
        // The manifest is read through the session, so it may not be known yet.
        if snapshot.workspace().manifest().as_ref() == Some(&change.uri) {
            return true;
        }
        // An unknown file changing on disk cannot affect what we have loaded.
        if change.on_disk && matches!(change.action, FileAction::Change | FileAction::Delete) {
            return false;
        }
        self.core.contains(&change.uri)
    }

    /// Reports whether `handle` carries the same content this view already
    /// has for `uri`, read from disk if the view has not seen the file.
    pub(crate) fn has_content(&self, uri: &Url, handle: &Arc<dyn FileHandle>) -> bool {
        let previous = self
            .snapshot()
            .ok()
            .and_then(|snapshot| snapshot.find_file(uri))
            .unwrap_or_else(|| FileSource::get_file(&*self.core.cache, uri));
        previous.exists() == handle.exists() && previous.identity().hash == handle.identity().hash
    }

    /// Replace the current snapshot with one that reflects `changes`.
    ///
    /// Returns the new current snapshot, which is the previous one when no
    /// change was relevant. If the changes require the workspace to be
    /// reloaded, the reload starts in the background.
    #[tracing::instrument(skip_all, fields(view = %self.core.name, changes = changes.len()))]
    pub fn invalidate_content(
        &self,
        changes: &BTreeMap<Url, FileChange>,
        force_reload: bool,
    ) -> Result<SnapshotRef, SessionError> {
        let _serial = lock(&self.invalidation);
        let current = self.snapshot()?;
        let Some((next, reinit)) = current.clone_with(changes, force_reload) else {
            debug!(snapshot = current.global_id(), "changes are irrelevant to the current snapshot");
            return Ok(current);
        };

        let previous = {
            let mut slot = lock(&self.snapshot);
            if slot.is_none() {
                return Err(SessionError::ViewShutdown);
            }
            slot.replace(next.clone())
        };
        // The view's reference to the old snapshot goes only once the new one
        // is installed.
        drop(previous);

        if reinit {
            let background = next.clone();
            self.runtime.spawn_blocking(move || background.initialize(false));
        }
        Ok(next)
    }

    /// Start the first workspace load on a background thread.
    pub(crate) fn spawn_initialize(&self, snapshot: SnapshotRef) {
        self.runtime.spawn_blocking(move || snapshot.initialize(true));
    }

    /// The sequence ID of the current snapshot, if the view is still live.
    pub(crate) fn sequence_id(&self) -> Option<u64> {
        lock(&self.snapshot).as_ref().map(|snapshot| snapshot.sequence_id())
    }

    pub(crate) fn shutdown(&self) {
        let previous = lock(&self.snapshot).take();
        self.core.cancel.cancel();
        if previous.is_some() {
            debug!(view = %self.core.name, "shut down view");
        }
    }
}
