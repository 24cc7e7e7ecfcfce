use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use clap::Parser;
use gantry_conf::Options;
use gantry_session::Session;
use gantry_session::SnapshotRef;
use gantry_session::View;
use gantry_source::path_to_url;
use gantry_source::Cache;
use gantry_source::CriticalError;
use gantry_source::OsFileSystem;
use serde::Serialize;
use tracing::info;

use crate::args::Args;
use crate::commands::resolve_folder;
use crate::commands::Command;
use crate::exit::Exit;
use crate::toolchain::HeaderChecker;
use crate::toolchain::SourceTreeToolchain;

#[derive(Debug, Parser)]
pub struct Inspect {
    /// Folder to load. Defaults to the current directory.
    folder: Option<Utf8PathBuf>,

    /// List the packages that belong to the workspace.
    #[arg(long)]
    packages: bool,

    /// Treat every module under the folder as part of one workspace.
    #[arg(long)]
    experimental_workspace_module: bool,
}

impl Command for Inspect {
    fn execute(&self, args: &Args) -> Result<Exit> {
        let folder = resolve_folder(self.folder.as_deref())?;
        let mut options = Options::load(folder.as_std_path())
            .with_context(|| format!("Failed to load settings for {folder}"))?;
        if self.experimental_workspace_module {
            options.experimental_workspace_module = true;
        }

        let report = inspect(&folder, options, self.packages)?;
        if !args.global.quiet {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        match &report.critical_error {
            Some(error) => Ok(Exit::error().with_message(format!("Workspace is broken: {}", error.message))),
            None => Ok(Exit::success()),
        }
    }
}

/// Load `folder` into a fresh session and describe what it resolved to.
pub fn inspect(folder: &Utf8Path, options: Options, packages: bool) -> Result<Report> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    let session = Session::new(
        Arc::new(Cache::new(Arc::new(OsFileSystem))),
        Arc::new(SourceTreeToolchain),
        Arc::new(HeaderChecker),
        runtime.handle().clone(),
    );

    let uri = path_to_url(folder).with_context(|| format!("{folder} is not a valid folder"))?;
    let (view, snapshot) = session.new_view("inspect", uri, options)?;
    runtime.block_on(view.await_initialized());
    info!(view = view.name(), snapshot = snapshot.global_id(), "loaded folder");

    let report = Report::new(&session, &view, &snapshot, packages)?;
    drop(snapshot);
    session.shutdown();
    Ok(report)
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub view: String,
    pub folder: String,
    pub root: String,
    pub root_source: Option<String>,
    pub source: String,
    pub mod_files: Vec<String>,
    pub work_file: Option<String>,
    pub dirs: Vec<String>,
    pub watch_patterns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<PackageReport>>,
    pub critical_error: Option<ErrorReport>,
}

#[derive(Debug, Serialize)]
pub struct PackageReport {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub message: String,
    pub diagnostics: Vec<String>,
}

impl From<CriticalError> for ErrorReport {
    fn from(error: CriticalError) -> Self {
        Self {
            message: error.main.to_string(),
            diagnostics: error.diagnostics.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Report {
    fn new(session: &Session, view: &View, snapshot: &SnapshotRef, packages: bool) -> Result<Self> {
        let packages = if packages {
            let listed = snapshot
                .workspace_packages()
                .context("Failed to list workspace packages")?;
            Some(
                listed
                    .into_iter()
                    .map(|(id, path)| PackageReport {
                        id: id.to_string(),
                        path: path.to_string(),
                    })
                    .collect(),
            )
        } else {
            None
        };

        Ok(Self {
            view: view.name().to_string(),
            folder: view.folder().to_string(),
            root: view.root().to_string(),
            root_source: view.root_source().map(ToString::to_string),
            source: snapshot.workspace().source().to_string(),
            mod_files: snapshot.mod_files().iter().map(ToString::to_string).collect(),
            work_file: snapshot.work_file().map(ToString::to_string),
            dirs: snapshot.workspace_dirs().iter().map(ToString::to_string).collect(),
            watch_patterns: session.file_watching_glob_patterns().into_iter().collect(),
            packages,
            critical_error: snapshot.critical_error().map(ErrorReport::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(files: &[(&str, &str)]) -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().unwrap()).unwrap();
        for (path, content) in files {
            let path = root.join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        (dir, root)
    }

    fn uri(root: &Utf8Path, path: &str) -> String {
        path_to_url(&root.join(path)).unwrap().to_string()
    }

    #[test]
    fn single_module() {
        let (_dir, root) = folder(&[
            ("go.mod", "module example.com\n"),
            ("a.go", "package a\n"),
            ("b/b.go", "package b\n\nimport \"example.com\"\n"),
        ]);
        let report = inspect(&root, Options::default(), true).unwrap();

        assert_eq!(report.source, "legacy");
        assert_eq!(report.root_source, Some(uri(&root, "go.mod")));
        assert_eq!(report.mod_files, vec![uri(&root, "go.mod")]);
        assert!(report.critical_error.is_none());
        let ids: Vec<&str> = report
            .packages
            .as_deref()
            .unwrap()
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(ids, vec!["example.com", "example.com/b"]);
    }

    #[test]
    fn broken_work_file() {
        let (_dir, root) = folder(&[
            ("go.work", "go 1.18\nuse (\n"),
            ("a/go.mod", "module example.com/a\n"),
        ]);
        let report = inspect(&root, Options::default(), false).unwrap();

        assert_eq!(report.source, "go.work");
        assert_eq!(report.work_file, Some(uri(&root, "go.work")));
        assert!(report.packages.is_none());
        let error = report.critical_error.unwrap();
        assert!(error.diagnostics[0].starts_with(&uri(&root, "go.work")));
    }

    #[test]
    fn scanned_workspace() {
        let (_dir, root) = folder(&[
            ("a/go.mod", "module example.com/a\n"),
            ("b/go.mod", "module example.com/b\n"),
        ]);
        let options = Options {
            experimental_workspace_module: true,
            ..Options::default()
        };
        let report = inspect(&root, options, false).unwrap();

        assert_eq!(report.source, "file system");
        assert_eq!(report.mod_files, vec![uri(&root, "a/go.mod"), uri(&root, "b/go.mod")]);
        assert_eq!(
            report.dirs,
            vec![path_to_url(&root).unwrap().to_string(), uri(&root, "a"), uri(&root, "b")]
        );
    }
}
