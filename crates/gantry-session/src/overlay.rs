//! Editor-supplied file contents.
//!
//! An [`Overlay`] is the in-memory state of a file the editor has open. It
//! takes precedence over the bytes on disk until the file is closed. Overlays
//! are never mutated: every edit replaces the overlay with a new one.

use std::fmt;
use std::sync::Arc;

use gantry_source::ContentHash;
use gantry_source::FileError;
use gantry_source::FileHandle;
use gantry_source::FileIdentity;
use gantry_source::FileKind;
use gantry_source::FileSource;
use rustc_hash::FxHashMap;
use url::Url;

use crate::error::SessionError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FileAction {
    Open,
    Change,
    Close,
    Save,
    Create,
    Delete,
    /// Not a file event: forces package metadata to be reloaded.
    InvalidateMetadata,
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileAction::Open => "open",
            FileAction::Change => "change",
            FileAction::Close => "close",
            FileAction::Save => "save",
            FileAction::Create => "create",
            FileAction::Delete => "delete",
            FileAction::InvalidateMetadata => "invalidate metadata",
        })
    }
}

/// One file event reported by the editor or the file watcher.
#[derive(Clone, Debug)]
pub struct FileModification {
    pub uri: Url,
    pub action: FileAction,
    /// A watched file changed on disk. Such events carry no text or version.
    pub on_disk: bool,
    pub version: Option<i32>,
    pub text: Option<Arc<[u8]>>,
    /// Sent by the editor on open only.
    pub language_id: Option<String>,
}

impl FileModification {
    fn new(uri: Url, action: FileAction) -> Self {
        Self {
            uri,
            action,
            on_disk: false,
            version: None,
            text: None,
            language_id: None,
        }
    }

    #[must_use]
    pub fn open(uri: Url, version: i32, text: impl Into<Vec<u8>>, language_id: &str) -> Self {
        Self {
            version: Some(version),
            text: Some(Arc::from(text.into())),
            language_id: Some(language_id.to_string()),
            ..Self::new(uri, FileAction::Open)
        }
    }

    #[must_use]
    pub fn change(uri: Url, version: i32, text: impl Into<Vec<u8>>) -> Self {
        Self {
            version: Some(version),
            text: Some(Arc::from(text.into())),
            ..Self::new(uri, FileAction::Change)
        }
    }

    #[must_use]
    pub fn save(uri: Url, text: Option<Vec<u8>>) -> Self {
        Self {
            text: text.map(Arc::from),
            ..Self::new(uri, FileAction::Save)
        }
    }

    #[must_use]
    pub fn close(uri: Url) -> Self {
        Self::new(uri, FileAction::Close)
    }

    /// A change observed by the file watcher.
    #[must_use]
    pub fn on_disk(uri: Url, action: FileAction) -> Self {
        Self {
            on_disk: true,
            ..Self::new(uri, action)
        }
    }

    #[must_use]
    pub fn invalidate_metadata(uri: Url) -> Self {
        Self::new(uri, FileAction::InvalidateMetadata)
    }
}

/// The content of a file open in the editor.
#[derive(Debug)]
pub struct Overlay {
    uri: Url,
    text: Arc<[u8]>,
    hash: ContentHash,
    version: i32,
    kind: FileKind,
    /// The text is known to match the bytes on disk, so the overlay need not
    /// be handed to the toolchain.
    saved: bool,
}

impl Overlay {
    #[must_use]
    pub fn text(&self) -> &Arc<[u8]> {
        &self.text
    }

    #[must_use]
    pub fn hash(&self) -> ContentHash {
        self.hash
    }
}

impl FileHandle for Overlay {
    fn uri(&self) -> &Url {
        &self.uri
    }

    fn identity(&self) -> FileIdentity {
        FileIdentity {
            uri: self.uri.clone(),
            hash: self.hash,
        }
    }

    fn read(&self) -> Result<Arc<[u8]>, FileError> {
        Ok(Arc::clone(&self.text))
    }

    fn saved(&self) -> bool {
        self.saved
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn kind(&self) -> FileKind {
        self.kind
    }

    fn is_overlay(&self) -> bool {
        true
    }
}

/// The set of open overlays.
#[derive(Clone, Debug, Default)]
pub(crate) struct Overlays {
    files: FxHashMap<Url, Arc<Overlay>>,
}

impl Overlays {
    pub(crate) fn get(&self, uri: &Url) -> Option<&Arc<Overlay>> {
        self.files.get(uri)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Arc<Overlay>> {
        self.files.values()
    }

    /// Apply one modification. `disk` reads the on-disk state of a file, to
    /// decide whether the new overlay is saved.
    pub(crate) fn apply(
        &mut self,
        change: &FileModification,
        disk: &dyn FileSource,
    ) -> Result<(), SessionError> {
        if change.action == FileAction::InvalidateMetadata {
            return Ok(());
        }

        let uri = &change.uri;
        let current = self.files.get(uri).cloned();

        // A watched change to a closed file leaves no overlay to update.
        if current.is_none() && change.on_disk {
            return Ok(());
        }

        let kind = match (change.action, &current) {
            (FileAction::Open, _) => {
                let kind = change
                    .language_id
                    .as_deref()
                    .map_or(FileKind::Unknown, FileKind::from_language_id);
                let kind = match kind {
                    FileKind::Unknown => FileKind::from_url(uri),
                    kind => kind,
                };
                if kind == FileKind::Unknown {
                    return Err(SessionError::UnknownFileKind(uri.clone()));
                }
                kind
            }
            (_, Some(overlay)) => overlay.kind,
            (_, None) => return Err(SessionError::UnopenedOverlay(uri.clone())),
        };

        if change.action == FileAction::Close {
            self.files.remove(uri);
            return Ok(());
        }

        let keeps_text = change.on_disk
            || matches!(
                change.action,
                FileAction::Save | FileAction::Create | FileAction::Delete
            );
        let text = match (&change.text, &current) {
            (Some(text), _) => Arc::clone(text),
            (None, Some(overlay)) if keeps_text => Arc::clone(&overlay.text),
            (None, _) => {
                return Err(SessionError::MissingContent {
                    uri: uri.clone(),
                    action: change.action,
                })
            }
        };

        let version = match (&current, change.version) {
            (Some(overlay), _) if change.on_disk || change.action == FileAction::Save => {
                overlay.version
            }
            (_, Some(version)) => version,
            (Some(overlay), None) => overlay.version,
            (None, None) => 0,
        };

        let hash = ContentHash::of(&text);
        let saved = match (change.action, &current) {
            (FileAction::Delete, _) => false,
            (FileAction::Save, Some(overlay)) => {
                if change.text.is_some() && overlay.hash != hash {
                    return Err(SessionError::SaveMismatch(uri.clone()));
                }
                true
            }
            _ => {
                let on_disk = disk.get_file(uri);
                on_disk.read().is_ok() && on_disk.identity().hash == hash
            }
        };

        self.files.insert(
            uri.clone(),
            Arc::new(Overlay {
                uri: uri.clone(),
                text,
                hash,
                version,
                kind,
                saved,
            }),
        );
        Ok(())
    }
}
