//! The synthetic workspace module joining every active module.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use gantry_source::url_to_path;
use gantry_source::FileSource;
use im::OrdSet;
use url::Url;

use crate::error::WorkspaceError;
use crate::modfile::compare_go_versions;
use crate::modfile::parse_sum;
use crate::modfile::ModFile;
use crate::modfile::Replace;
use crate::modfile::Require;

pub const WORKSPACE_MODULE: &str = "gantry-workspace";

const DEFAULT_GO_VERSION: &str = "1.12";

/// The version required for a workspace member with the given major version.
///
/// Uses the highest compatible version so that no requirement elsewhere in the
/// build list can select a different copy of the module.
#[must_use]
pub fn workspace_module_version(major: &str) -> String {
    format!("{major}.9999999.0-gantryworkspace")
}

/// The major version suffix of a module path: `v2` for `example.com/m/v2`
/// and `gopkg.in/yaml.v3`, `v0` otherwise.
#[must_use]
pub fn major_version(path: &str) -> &str {
    let is_major = |suffix: &str| {
        suffix.len() >= 2
            && suffix.starts_with('v')
            && suffix[1..].bytes().all(|b| b.is_ascii_digit())
            && !suffix[1..].starts_with('0')
    };
    if path.starts_with("gopkg.in/") {
        if let Some((_, suffix)) = path.rsplit_once('.') {
            if is_major(suffix) || suffix == "v0" || suffix == "v1" {
                return suffix;
            }
        }
        return "v0";
    }
    match path.rsplit_once('/') {
        Some((_, suffix)) if is_major(suffix) && suffix != "v1" => suffix,
        _ => "v0",
    }
}

/// Absolutize a replacement directory relative to `base`.
pub(crate) fn absolute_path(base: &Utf8Path, path: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(path);
    if path.is_absolute() {
        path.to_owned()
    } else {
        normalize(&base.join(path))
    }
}

fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            camino::Utf8Component::CurDir => {}
            camino::Utf8Component::ParentDir => {
                out.pop();
            }
            component => out.push(component),
        }
    }
    out
}

pub(crate) fn read(fs: &dyn FileSource, uri: &Url) -> Result<String, WorkspaceError> {
    let bytes = fs
        .get_file(uri)
        .read()
        .map_err(|source| WorkspaceError::Read {
            uri: uri.clone(),
            source,
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub(crate) fn parse_mod(fs: &dyn FileSource, uri: &Url) -> Result<ModFile, WorkspaceError> {
    let text = read(fs, uri)?;
    Ok(ModFile::parse(uri.as_str(), &text)?)
}

struct Member {
    path: String,
    dir: Utf8PathBuf,
    file: ModFile,
}

/// Merge the active modules into one descriptor that requires every member
/// at its workspace version and replaces it with its directory.
pub(crate) fn build_workspace_mod_file(
    active: &OrdSet<Url>,
    fs: &dyn FileSource,
) -> Result<ModFile, WorkspaceError> {
    let mut members: Vec<Member> = Vec::with_capacity(active.len());
    let mut dirs_by_path: BTreeMap<String, Utf8PathBuf> = BTreeMap::new();
    let mut go_version: Option<String> = None;

    for uri in active {
        let file = parse_mod(fs, uri)?;
        let Some(path) = file.module.clone() else {
            return Err(WorkspaceError::MissingModule { uri: uri.clone() });
        };
        let Some(dir) = url_to_path(uri).and_then(|p| p.parent().map(Utf8Path::to_owned)) else {
            return Err(WorkspaceError::NotFileUri { uri: uri.clone() });
        };
        if dirs_by_path.insert(path.clone(), dir.clone()).is_some() {
            return Err(WorkspaceError::DuplicateModule { path });
        }
        if let Some(go) = &file.go {
            let newer = go_version
                .as_deref()
                .is_none_or(|current| compare_go_versions(go, current) == Ordering::Greater);
            if newer {
                go_version = Some(go.clone());
            }
        }
        members.push(Member { path, dir, file });
    }

    let mut merged = ModFile {
        module: Some(WORKSPACE_MODULE.to_string()),
        go: Some(go_version.unwrap_or_else(|| DEFAULT_GO_VERSION.to_string())),
        ..ModFile::default()
    };

    for member in &members {
        merged.requires.push(Require {
            path: member.path.clone(),
            version: workspace_module_version(major_version(&member.path)),
            indirect: false,
        });
        merged.add_replace(Replace {
            old_path: member.path.clone(),
            old_version: None,
            new_path: member.dir.to_string(),
            new_version: None,
        });
    }

    for member in &members {
        for replace in &member.file.replaces {
            if dirs_by_path.contains_key(&replace.old_path) {
                continue;
            }
            let target = match (&replace.new_version, dirs_by_path.get(&replace.new_path)) {
                (Some(_), Some(dir)) => dir.to_string(),
                (Some(_), None) => replace.new_path.clone(),
                (None, _) => absolute_path(&member.dir, &replace.new_path).to_string(),
            };
            let redirected = replace.new_version.is_some()
                && dirs_by_path.contains_key(&replace.new_path);
            merged.add_replace(Replace {
                old_path: replace.old_path.clone(),
                old_version: replace.old_version.clone(),
                new_path: target,
                new_version: if redirected {
                    None
                } else {
                    replace.new_version.clone()
                },
            });
        }
        for exclude in &member.file.excludes {
            merged.add_exclude(exclude.clone());
        }
    }

    Ok(merged)
}

/// Concatenate the `go.sum` files of the active modules, sorted and
/// de-duplicated. Modules without a `go.sum` contribute nothing.
pub(crate) fn build_workspace_sum_file(
    active: &OrdSet<Url>,
    fs: &dyn FileSource,
) -> Result<Vec<u8>, WorkspaceError> {
    let mut lines = Vec::new();
    for uri in active {
        let Some(sum_uri) = sum_uri(uri) else {
            continue;
        };
        let handle = fs.get_file(&sum_uri);
        let bytes = match handle.read() {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => continue,
            Err(source) => {
                return Err(WorkspaceError::Read {
                    uri: sum_uri,
                    source,
                })
            }
        };
        lines.extend(parse_sum(sum_uri.as_str(), &String::from_utf8_lossy(&bytes))?);
    }
    lines.sort();
    lines.dedup();

    let mut out = String::new();
    for line in &lines {
        out.push_str(&line.to_string());
        out.push('\n');
    }
    Ok(out.into_bytes())
}

/// The `go.sum` next to a `go.mod`.
pub(crate) fn sum_uri(mod_uri: &Url) -> Option<Url> {
    let dir = url_to_path(mod_uri)?.parent()?.to_owned();
    gantry_source::path_to_url(&dir.join("go.sum"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gantry_source::Cache;
    use gantry_source::InMemoryFileSystem;

    use super::*;

    fn uri(path: &str) -> Url {
        Url::parse(&format!("file://{path}")).unwrap()
    }

    fn cache(files: &[(&str, &str)]) -> Cache {
        let fs = InMemoryFileSystem::new();
        for (path, content) in files {
            fs.write(*path, *content);
        }
        Cache::new(Arc::new(fs))
    }

    #[test]
    fn major_versions() {
        assert_eq!(major_version("example.com/m"), "v0");
        assert_eq!(major_version("example.com/m/v2"), "v2");
        assert_eq!(major_version("example.com/m/v1"), "v0");
        assert_eq!(major_version("example.com/m/v02"), "v0");
        assert_eq!(major_version("gopkg.in/yaml.v3"), "v3");
        assert_eq!(workspace_module_version("v2"), "v2.9999999.0-gantryworkspace");
    }

    #[test]
    fn absolute_paths_are_normalized() {
        assert_eq!(absolute_path(Utf8Path::new("/ws/a"), "../b"), "/ws/b");
        assert_eq!(absolute_path(Utf8Path::new("/ws/a"), "./c"), "/ws/a/c");
        assert_eq!(absolute_path(Utf8Path::new("/ws/a"), "/abs"), "/abs");
    }

    #[test]
    fn merges_members_and_their_replacements() {
        let fs = cache(&[
            (
                "/ws/a/go.mod",
                "module example.com/a\n\ngo 1.18\n\nreplace example.com/dep => ../dep\nreplace example.com/b v1.0.0 => ../elsewhere\nexclude example.com/bad v0.1.0\n",
            ),
            (
                "/ws/b/go.mod",
                "module example.com/b/v2\n\ngo 1.20\n\nreplace example.com/fork v1.0.0 => example.com/a v1.2.0\nexclude example.com/bad v0.1.0\n",
            ),
        ]);
        let active: OrdSet<Url> = [uri("/ws/a/go.mod"), uri("/ws/b/go.mod")].into_iter().collect();

        let merged = build_workspace_mod_file(&active, &fs).unwrap();
        insta::assert_snapshot!(merged.to_string(), @r"
        module gantry-workspace

        go 1.20

        require (
        	example.com/a v0.9999999.0-gantryworkspace
        	example.com/b/v2 v2.9999999.0-gantryworkspace
        )

        replace (
        	example.com/a => /ws/a
        	example.com/b/v2 => /ws/b
        	example.com/dep => /ws/dep
        	example.com/b v1.0.0 => /ws/elsewhere
        	example.com/fork v1.0.0 => /ws/a
        )

        exclude example.com/bad v0.1.0
        ");
    }

    #[test]
    fn duplicate_module_paths_are_an_error() {
        let fs = cache(&[
            ("/ws/a/go.mod", "module example.com/same\n"),
            ("/ws/b/go.mod", "module example.com/same\n"),
        ]);
        let active: OrdSet<Url> = [uri("/ws/a/go.mod"), uri("/ws/b/go.mod")].into_iter().collect();
        let err = build_workspace_mod_file(&active, &fs).unwrap_err();
        assert!(matches!(err, WorkspaceError::DuplicateModule { path } if path == "example.com/same"));
    }

    #[test]
    fn default_go_version_without_directives() {
        let fs = cache(&[("/ws/go.mod", "module example.com/a\n")]);
        let active: OrdSet<Url> = [uri("/ws/go.mod")].into_iter().collect();
        let merged = build_workspace_mod_file(&active, &fs).unwrap();
        assert_eq!(merged.go.as_deref(), Some("1.12"));
    }

    #[test]
    fn missing_member_is_an_error() {
        let fs = cache(&[]);
        let active: OrdSet<Url> = [uri("/ws/go.mod")].into_iter().collect();
        assert!(matches!(
            build_workspace_mod_file(&active, &fs),
            Err(WorkspaceError::Read { .. })
        ));
    }

    #[test]
    fn sum_files_are_merged_sorted() {
        let fs = cache(&[
            ("/ws/a/go.mod", "module example.com/a\n"),
            ("/ws/a/go.sum", "example.com/z v1.0.0 h1:z=\nexample.com/c v1.0.0 h1:c=\n"),
            ("/ws/b/go.mod", "module example.com/b\n"),
            ("/ws/b/go.sum", "example.com/c v1.0.0 h1:c=\nexample.com/m v0.1.0 h1:m=\n"),
            ("/ws/c/go.mod", "module example.com/c\n"),
        ]);
        let active: OrdSet<Url> = [
            uri("/ws/a/go.mod"),
            uri("/ws/b/go.mod"),
            uri("/ws/c/go.mod"),
        ]
        .into_iter()
        .collect();
        let sum = build_workspace_sum_file(&active, &fs).unwrap();
        assert_eq!(
            String::from_utf8(sum).unwrap(),
            "example.com/c v1.0.0 h1:c=\nexample.com/m v0.1.0 h1:m=\nexample.com/z v1.0.0 h1:z=\n"
        );
    }
}
