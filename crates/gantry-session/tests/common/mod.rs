#![allow(dead_code)]

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use gantry_conf::Options;
use gantry_session::Checker;
use gantry_session::LoadRequest;
use gantry_session::LoadScope;
use gantry_session::Metadata;
use gantry_session::ModuleGraph;
use gantry_session::ModuleInfo;
use gantry_session::Package;
use gantry_session::ParseMode;
use gantry_session::ParsedFile;
use gantry_session::Session;
use gantry_session::SnapshotRef;
use gantry_session::Toolchain;
use gantry_session::ToolchainError;
use gantry_session::TypecheckMode;
use gantry_session::View;
use gantry_source::path_to_url;
use gantry_source::Cache;
use gantry_source::ContentHash;
use gantry_source::FileHandle;
use gantry_source::OsFileSystem;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use url::Url;

/// Reports a fixed set of packages.
#[derive(Default)]
pub struct FakeToolchain {
    packages: Mutex<Vec<Metadata>>,
    failure: Mutex<Option<String>>,
    workspace_loads: AtomicUsize,
    file_loads: AtomicUsize,
}

impl FakeToolchain {
    pub fn add_package(&self, metadata: Metadata) {
        self.packages.lock().unwrap().push(metadata);
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn workspace_loads(&self) -> usize {
        self.workspace_loads.load(Ordering::SeqCst)
    }

    pub fn file_loads(&self) -> usize {
        self.file_loads.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), ToolchainError> {
        match &*self.failure.lock().unwrap() {
            Some(message) => Err(ToolchainError::Failed(message.clone())),
            None => Ok(()),
        }
    }
}

impl Toolchain for FakeToolchain {
    fn resolve_module_graph(&self, _request: &LoadRequest) -> Result<ModuleGraph, ToolchainError> {
        self.check_failure()?;
        Ok(ModuleGraph {
            modules: vec![ModuleInfo {
                path: "example.com".to_string(),
                version: None,
                main: true,
            }],
        })
    }

    fn list_packages(
        &self,
        _request: &LoadRequest,
        scope: &LoadScope,
    ) -> Result<Vec<Metadata>, ToolchainError> {
        self.check_failure()?;
        let packages = self.packages.lock().unwrap();
        match scope {
            LoadScope::Workspace => {
                self.workspace_loads.fetch_add(1, Ordering::SeqCst);
                Ok(packages.clone())
            }
            LoadScope::Files(uris) => {
                self.file_loads.fetch_add(1, Ordering::SeqCst);
                Ok(packages
                    .iter()
                    .filter(|m| m.files().any(|file| uris.contains(file)))
                    .cloned()
                    .collect())
            }
        }
    }
}

/// Treats `package` and `import` lines as the header and type-checks
/// without looking at the files.
#[derive(Default)]
pub struct FakeChecker {
    parses: AtomicUsize,
    checks: AtomicUsize,
}

impl FakeChecker {
    pub fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl Checker for FakeChecker {
    fn parse(&self, file: &dyn FileHandle, mode: ParseMode) -> ParsedFile {
        self.parses.fetch_add(1, Ordering::SeqCst);
        let text = file
            .read()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        let header: Vec<&str> = text
            .lines()
            .filter(|line| line.starts_with("package") || line.starts_with("import"))
            .collect();
        ParsedFile {
            identity: file.identity(),
            mode,
            header: ContentHash::of(header.join("\n").as_bytes()),
            diagnostics: Vec::new(),
        }
    }

    fn type_check(
        &self,
        metadata: &Metadata,
        files: &[Arc<ParsedFile>],
        mode: TypecheckMode,
    ) -> Package {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Package {
            id: metadata.id.clone(),
            mode,
            files: files.to_vec(),
            diagnostics: Vec::new(),
        }
    }
}

pub struct Fixture {
    pub session: Session,
    pub toolchain: Arc<FakeToolchain>,
    pub checker: Arc<FakeChecker>,
    pub root: Utf8PathBuf,
    _dir: TempDir,
    pub runtime: Runtime,
}

/// A session over a temporary directory holding `files`.
pub fn fixture(files: &[(&str, &str)]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
    let runtime = Runtime::new().unwrap();
    let toolchain = Arc::new(FakeToolchain::default());
    let checker = Arc::new(FakeChecker::default());
    let session = Session::new(
        Arc::new(Cache::new(Arc::new(OsFileSystem))),
        toolchain.clone(),
        checker.clone(),
        runtime.handle().clone(),
    );
    let fixture = Fixture {
        session,
        toolchain,
        checker,
        root,
        _dir: dir,
        runtime,
    };
    for (path, content) in files {
        fixture.write(path, content);
    }
    fixture
}

impl Fixture {
    pub fn folder(&self) -> Url {
        path_to_url(&self.root).unwrap()
    }

    pub fn uri(&self, path: &str) -> Url {
        path_to_url(&self.root.join(path)).unwrap()
    }

    pub fn write(&self, path: &str, content: &str) {
        let path = self.root.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// A main-module package made of `files`, importing `deps`.
    pub fn package(&self, id: &str, files: &[&str], deps: &[&str]) -> Metadata {
        let files: Vec<Url> = files.iter().map(|f| self.uri(f)).collect();
        Metadata {
            id: id.into(),
            pkg_path: id.into(),
            name: id.rsplit('/').next().unwrap_or(id).to_string(),
            go_files: files.clone(),
            compiled_go_files: files,
            deps: deps.iter().map(|d| ((*d).into(), (*d).into())).collect(),
            module: Some(ModuleInfo {
                path: "example.com".to_string(),
                version: None,
                main: true,
            }),
            ..Metadata::default()
        }
    }

    /// Create a view of the whole directory and wait for its first load.
    pub fn view(&self, options: Options) -> (Arc<View>, SnapshotRef) {
        let (view, snapshot) = self
            .session
            .new_view("root", self.folder(), options)
            .unwrap();
        self.runtime.block_on(view.await_initialized());
        (view, snapshot)
    }

    pub fn read(&self, file: &Arc<dyn FileHandle>) -> String {
        String::from_utf8(file.read().unwrap().to_vec()).unwrap()
    }
}
