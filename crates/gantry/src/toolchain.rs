//! A toolchain that needs nothing but the source tree.
//!
//! Every directory holding source files is one package, named after the
//! module whose `go.mod` sits at the workspace directory it was found under.
//! Imports are read from file headers and resolved against the packages of
//! the same listing; anything else is treated as an external dependency and
//! left out of the graph.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use gantry_session::Checker;
use gantry_session::LoadRequest;
use gantry_session::LoadScope;
use gantry_session::Metadata;
use gantry_session::ModuleGraph;
use gantry_session::ModuleInfo;
use gantry_session::Package;
use gantry_session::PackageId;
use gantry_session::PackagePath;
use gantry_session::ParseMode;
use gantry_session::ParsedFile;
use gantry_session::Toolchain;
use gantry_session::ToolchainError;
use gantry_session::TypecheckMode;
use gantry_source::in_dir;
use gantry_source::path_to_url;
use gantry_source::url_to_path;
use gantry_source::ContentHash;
use gantry_source::Diagnostic;
use gantry_source::DiagnosticSource;
use gantry_source::FileHandle;
use gantry_source::FileKind;
use gantry_workspace::is_ignored_dir;
use gantry_workspace::ModFile;
use ignore::WalkBuilder;
use tracing::debug;
use url::Url;

const MANIFEST: &str = "go.mod";

#[derive(Debug, Default)]
pub struct SourceTreeToolchain;

impl Toolchain for SourceTreeToolchain {
    fn resolve_module_graph(&self, request: &LoadRequest) -> Result<ModuleGraph, ToolchainError> {
        let mut modules = Vec::new();
        for dir in request.dirs.iter().filter_map(url_to_path) {
            check_cancelled(request)?;
            if let Some(module) = main_module(request, &dir) {
                modules.push(module);
            }
        }
        Ok(ModuleGraph { modules })
    }

    fn list_packages(
        &self,
        request: &LoadRequest,
        scope: &LoadScope,
    ) -> Result<Vec<Metadata>, ToolchainError> {
        let packages = SourceTree::load(request)?.into_packages();
        debug!(packages = packages.len(), ?scope, "listed source tree");
        Ok(match scope {
            LoadScope::Workspace => packages,
            LoadScope::Files(uris) => packages
                .into_iter()
                .filter(|m| m.files().any(|file| uris.contains(file)))
                .collect(),
        })
    }
}

fn check_cancelled(request: &LoadRequest) -> Result<(), ToolchainError> {
    if request.cancel.is_cancelled() {
        return Err(ToolchainError::Cancelled);
    }
    Ok(())
}

fn is_source(path: &Utf8Path) -> bool {
    FileKind::from_path(path) == FileKind::Source
}

/// Reads `uri` as the request sees it, unsaved edits first.
fn read(request: &LoadRequest, uri: &Url, path: &Utf8Path) -> Option<String> {
    match request.overlays.get(uri) {
        Some(text) => Some(String::from_utf8_lossy(text).into_owned()),
        None => std::fs::read_to_string(path).ok(),
    }
}

fn main_module(request: &LoadRequest, dir: &Utf8Path) -> Option<ModuleInfo> {
    let manifest = dir.join(MANIFEST);
    let text = read(request, &path_to_url(&manifest)?, &manifest)?;
    let path = ModFile::parse(manifest.as_str(), &text).ok()?.module?;
    Some(ModuleInfo {
        path,
        version: None,
        main: true,
    })
}

/// Source files under `root`, leaving out ignored directories and nested
/// modules.
fn walk(root: &Utf8Path) -> impl Iterator<Item = Utf8PathBuf> {
    WalkBuilder::new(root.as_std_path())
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                return true;
            }
            let ignored = entry.file_name().to_str().is_none_or(is_ignored_dir);
            !ignored && !entry.path().join(MANIFEST).exists()
        })
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
        .filter(|path| is_source(path))
}

#[derive(Debug)]
struct PackageDir {
    root: Utf8PathBuf,
    module: Option<ModuleInfo>,
    files: BTreeSet<Utf8PathBuf>,
}

struct SourceTree<'a> {
    request: &'a LoadRequest,
    dirs: BTreeMap<Utf8PathBuf, PackageDir>,
}

impl<'a> SourceTree<'a> {
    fn load(request: &'a LoadRequest) -> Result<Self, ToolchainError> {
        let mut tree = Self {
            request,
            dirs: BTreeMap::new(),
        };
        check_cancelled(request)?;
        for root in request.dirs.iter().filter_map(url_to_path) {
            let module = main_module(request, &root);
            for path in walk(&root) {
                check_cancelled(request)?;
                tree.add(&root, module.as_ref(), path);
            }
            // Files that exist only in the editor.
            let unsaved: Vec<Utf8PathBuf> = request
                .overlays
                .keys()
                .filter_map(url_to_path)
                .filter(|path| is_source(path) && owned_by(&root, path))
                .collect();
            for path in unsaved {
                tree.add(&root, module.as_ref(), path);
            }
        }
        Ok(tree)
    }

    fn add(&mut self, root: &Utf8Path, module: Option<&ModuleInfo>, path: Utf8PathBuf) {
        let Some(dir) = path.parent() else {
            return;
        };
        self.dirs
            .entry(dir.to_owned())
            .or_insert_with(|| PackageDir {
                root: root.to_owned(),
                module: module.cloned(),
                files: BTreeSet::new(),
            })
            .files
            .insert(path);
    }

    fn into_packages(self) -> Vec<Metadata> {
        let mut packages: Vec<(Metadata, BTreeSet<String>)> = self
            .dirs
            .iter()
            .map(|(dir, entry)| self.package(dir, entry))
            .collect();

        let ids: BTreeMap<PackagePath, PackageId> = packages
            .iter()
            .map(|(m, _)| (m.pkg_path.clone(), m.id.clone()))
            .collect();
        for (metadata, imports) in &mut packages {
            for import in imports.iter() {
                let path = PackagePath::from(import.as_str());
                if let Some(id) = ids.get(&path) {
                    if *id != metadata.id {
                        metadata.deps.insert(path, id.clone());
                    }
                }
            }
        }
        packages.into_iter().map(|(m, _)| m).collect()
    }

    fn package(&self, dir: &Utf8Path, entry: &PackageDir) -> (Metadata, BTreeSet<String>) {
        let mut name = None;
        let mut imports = BTreeSet::new();
        let mut files = Vec::new();
        let mut errors = Vec::new();
        for path in &entry.files {
            let Some(uri) = path_to_url(path) else {
                continue;
            };
            match read(self.request, &uri, path) {
                Some(text) => {
                    let header = Header::scan(&text);
                    if name.is_none() {
                        name = header.name;
                    }
                    imports.extend(header.imports);
                }
                None => errors.push(format!("cannot read {path}")),
            }
            files.push(uri);
        }

        let relative = dir
            .strip_prefix(&entry.root)
            .ok()
            .filter(|relative| !relative.as_str().is_empty());
        let pkg_path = match (&entry.module, relative) {
            (Some(module), Some(relative)) => format!("{}/{relative}", module.path),
            (Some(module), None) => module.path.clone(),
            (None, Some(relative)) => relative.to_string(),
            (None, None) => dir.file_name().unwrap_or(".").to_string(),
        };

        let metadata = Metadata {
            id: PackageId::from(pkg_path.as_str()),
            pkg_path: PackagePath::from(pkg_path),
            name: name.unwrap_or_default(),
            go_files: files.clone(),
            compiled_go_files: files,
            module: entry.module.clone(),
            errors,
            ..Metadata::default()
        };
        (metadata, imports)
    }
}

/// Reports whether an unsaved file at `path` belongs to the module at `root`
/// rather than to an ignored directory or a nested module.
fn owned_by(root: &Utf8Path, path: &Utf8Path) -> bool {
    if !in_dir(root, path) {
        return false;
    }
    let Some(parent) = path.parent() else {
        return false;
    };
    parent
        .ancestors()
        .take_while(|dir| *dir != root)
        .all(|dir| {
            let ignored = dir.file_name().is_some_and(is_ignored_dir);
            !ignored && !dir.join(MANIFEST).exists()
        })
}

/// The package clause and imports of a source file.
#[derive(Debug, Default, PartialEq, Eq)]
struct Header {
    name: Option<String>,
    imports: Vec<String>,
}

impl Header {
    /// Reads up to the first declaration.
    fn scan(text: &str) -> Self {
        let mut header = Header::default();
        let mut in_block = false;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            if in_block {
                if line.starts_with(')') {
                    in_block = false;
                } else if let Some(path) = quoted(line) {
                    header.imports.push(path.to_string());
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("package ") {
                header.name = rest.split_whitespace().next().map(str::to_string);
                continue;
            }
            if let Some(rest) = line.strip_prefix("import") {
                let rest = rest.trim_start();
                if rest.starts_with('(') {
                    in_block = !rest.ends_with(')');
                    header.imports.extend(quoted(rest).map(str::to_string));
                } else if let Some(path) = quoted(rest) {
                    header.imports.push(path.to_string());
                }
                continue;
            }
            break;
        }
        header
    }

    fn fingerprint(&self) -> ContentHash {
        ContentHash::of_fmt(format_args!("{:?}\0{:?}", self.name, self.imports))
    }
}

fn quoted(text: &str) -> Option<&str> {
    let start = text.find('"')? + 1;
    let len = text[start..].find('"')?;
    Some(&text[start..start + len])
}

/// Reads headers, and reports files without a package clause.
#[derive(Debug, Default)]
pub struct HeaderChecker;

impl Checker for HeaderChecker {
    fn parse(&self, file: &dyn FileHandle, mode: ParseMode) -> ParsedFile {
        let mut diagnostics = Vec::new();
        let header = match file.read() {
            Ok(bytes) => {
                let header = Header::scan(&String::from_utf8_lossy(&bytes));
                if header.name.is_none() {
                    diagnostics.push(Diagnostic::error(
                        file.uri().clone(),
                        DiagnosticSource::Parse,
                        "expected 'package' clause",
                    ));
                }
                header
            }
            Err(err) => {
                diagnostics.push(Diagnostic::error(
                    file.uri().clone(),
                    DiagnosticSource::Io,
                    err.to_string(),
                ));
                Header::default()
            }
        };
        ParsedFile {
            identity: file.identity(),
            mode,
            header: header.fingerprint(),
            diagnostics,
        }
    }

    fn type_check(
        &self,
        metadata: &Metadata,
        files: &[std::sync::Arc<ParsedFile>],
        mode: TypecheckMode,
    ) -> Package {
        let mut diagnostics: Vec<Diagnostic> = files
            .iter()
            .flat_map(|file| file.diagnostics.iter().cloned())
            .collect();
        if let Some(first) = metadata.compiled_go_files.first() {
            diagnostics.extend(metadata.errors.iter().map(|error| {
                Diagnostic::error(first.clone(), DiagnosticSource::List, error.clone())
            }));
        }
        Package {
            id: metadata.id.clone(),
            mode,
            files: files.to_vec(),
            diagnostics,
        }
    }
}
