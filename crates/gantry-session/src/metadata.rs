//! Package metadata as reported by the toolchain, and the graph over it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use im::OrdMap;
use im::OrdSet;
use url::Url;

macro_rules! name_type {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

name_type!(
    /// Uniquely identifies a package variant, e.g. `example.com/a [example.com/a.test]`.
    PackageId
);
name_type!(
    /// The path a package is imported by.
    PackagePath
);

/// The module a package belongs to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub path: String,
    pub version: Option<String>,
    /// One of the modules being developed, as opposed to a dependency.
    pub main: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    pub id: PackageId,
    pub pkg_path: PackagePath,
    pub name: String,
    pub go_files: Vec<Url>,
    pub compiled_go_files: Vec<Url>,
    /// The package under test, for test variants.
    pub for_test: Option<PackagePath>,
    pub deps: BTreeMap<PackagePath, PackageId>,
    pub module: Option<ModuleInfo>,
    pub errors: Vec<String>,
}

impl Metadata {
    /// Reports whether this is an intermediate test variant, a copy of a
    /// package made only so that an external test package sees a single
    /// version of the package under test, e.g. `net/http [net/url.test]`.
    #[must_use]
    pub fn is_intermediate_test_variant(&self) -> bool {
        match &self.for_test {
            Some(for_test) => {
                for_test != &self.pkg_path
                    && format!("{for_test}_test") != self.pkg_path.as_str()
            }
            None => false,
        }
    }

    /// Every file of the package, compiled or not.
    pub fn files(&self) -> impl Iterator<Item = &Url> {
        self.compiled_go_files
            .iter()
            .chain(self.go_files.iter().filter(|uri| !self.compiled_go_files.contains(uri)))
    }
}

/// An immutable index over package metadata.
///
/// Updating a graph produces a new one that shares unchanged entries with
/// its predecessor.
#[derive(Clone, Debug, Default)]
pub struct MetadataGraph {
    metadata: OrdMap<PackageId, Arc<Metadata>>,
    imported_by: OrdMap<PackageId, OrdSet<PackageId>>,
    ids: OrdMap<Url, Vec<PackageId>>,
}

impl MetadataGraph {
    #[must_use]
    pub fn new(packages: impl IntoIterator<Item = Metadata>) -> Self {
        let metadata = packages
            .into_iter()
            .map(|m| (m.id.clone(), Arc::new(m)))
            .collect();
        Self::index(metadata)
    }

    fn index(metadata: OrdMap<PackageId, Arc<Metadata>>) -> Self {
        let mut imported_by: BTreeMap<PackageId, OrdSet<PackageId>> = BTreeMap::new();
        let mut ids: BTreeMap<Url, Vec<PackageId>> = BTreeMap::new();
        for (id, m) in &metadata {
            for dep in m.deps.values() {
                imported_by.entry(dep.clone()).or_default().insert(id.clone());
            }
            for uri in m.files() {
                ids.entry(uri.clone()).or_default().push(id.clone());
            }
        }

        // narrowest package first
        let width = |id: &PackageId| metadata.get(id).map_or(0, |m| m.compiled_go_files.len());
        for list in ids.values_mut() {
            list.sort_by(|a, b| width(a).cmp(&width(b)).then_with(|| a.cmp(b)));
        }

        Self {
            imported_by: imported_by.into_iter().collect(),
            ids: ids.into_iter().collect(),
            metadata,
        }
    }

    /// A graph with `updates` applied: `Some` replaces or adds a package,
    /// `None` removes it.
    #[must_use]
    pub fn update(&self, updates: impl IntoIterator<Item = (PackageId, Option<Metadata>)>) -> Self {
        let mut metadata = self.metadata.clone();
        for (id, m) in updates {
            match m {
                Some(m) => {
                    metadata.insert(id, Arc::new(m));
                }
                None => {
                    metadata.remove(&id);
                }
            }
        }
        Self::index(metadata)
    }

    #[must_use]
    pub fn get(&self, id: &PackageId) -> Option<&Arc<Metadata>> {
        self.metadata.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Metadata>> {
        self.metadata.values()
    }

    /// The packages containing `uri`, narrowest first.
    #[must_use]
    pub fn ids_for_file(&self, uri: &Url) -> &[PackageId] {
        self.ids.get(uri).map(Vec::as_slice).unwrap_or_default()
    }

    /// The packages that import `id`, directly or (when `transitive`)
    /// through other packages. `id` itself is excluded.
    #[must_use]
    pub fn reverse_dependencies(
        &self,
        id: &PackageId,
        transitive: bool,
    ) -> BTreeMap<PackageId, Arc<Metadata>> {
        let mut result = BTreeMap::new();
        let mut queue = vec![id.clone()];
        while let Some(next) = queue.pop() {
            let Some(importers) = self.imported_by.get(&next) else {
                continue;
            };
            for importer in importers {
                if importer == id || result.contains_key(importer) {
                    continue;
                }
                let Some(m) = self.metadata.get(importer) else {
                    continue;
                };
                result.insert(importer.clone(), Arc::clone(m));
                if transitive {
                    queue.push(importer.clone());
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(path: &str) -> Url {
        Url::parse(&format!("file://{path}")).unwrap()
    }

    fn package(id: &str, files: &[&str], deps: &[&str]) -> Metadata {
        Metadata {
            id: id.into(),
            pkg_path: id.into(),
            name: id.rsplit('/').next().unwrap_or(id).to_string(),
            go_files: files.iter().map(|f| uri(f)).collect(),
            compiled_go_files: files.iter().map(|f| uri(f)).collect(),
            deps: deps.iter().map(|d| ((*d).into(), (*d).into())).collect(),
            ..Metadata::default()
        }
    }

    fn graph() -> MetadataGraph {
        MetadataGraph::new([
            package("example.com/a", &["/ws/a/a.go"], &[]),
            package("example.com/b", &["/ws/b/b.go"], &["example.com/a"]),
            package("example.com/c", &["/ws/c/c.go"], &["example.com/b"]),
            package(
                "example.com/a [example.com/a.test]",
                &["/ws/a/a.go", "/ws/a/a_test.go"],
                &[],
            ),
        ])
    }

    #[test]
    fn ids_for_file_are_narrowest_first() {
        let graph = graph();
        let ids: Vec<&str> = graph
            .ids_for_file(&uri("/ws/a/a.go"))
            .iter()
            .map(PackageId::as_str)
            .collect();
        assert_eq!(ids, vec!["example.com/a", "example.com/a [example.com/a.test]"]);
        assert!(graph.ids_for_file(&uri("/ws/none.go")).is_empty());
    }

    #[test]
    fn reverse_dependencies() {
        let graph = graph();
        let direct = graph.reverse_dependencies(&"example.com/a".into(), false);
        assert_eq!(direct.keys().map(PackageId::as_str).collect::<Vec<_>>(), vec!["example.com/b"]);

        let all = graph.reverse_dependencies(&"example.com/a".into(), true);
        assert_eq!(
            all.keys().map(PackageId::as_str).collect::<Vec<_>>(),
            vec!["example.com/b", "example.com/c"]
        );
    }

    #[test]
    fn update_shares_unchanged_entries() {
        let before = graph();
        let after = before.update([
            ("example.com/c".into(), None),
            ("example.com/d".into(), Some(package("example.com/d", &["/ws/d/d.go"], &["example.com/a"]))),
        ]);

        assert!(after.get(&"example.com/c".into()).is_none());
        assert!(Arc::ptr_eq(
            before.get(&"example.com/a".into()).unwrap(),
            after.get(&"example.com/a".into()).unwrap()
        ));
        let importers = after.reverse_dependencies(&"example.com/a".into(), true);
        assert!(importers.contains_key(&PackageId::from("example.com/d")));
        assert!(!importers.contains_key(&PackageId::from("example.com/c")));
    }

    #[test]
    fn intermediate_test_variants() {
        let mut m = package("net/http [net/url.test]", &[], &[]);
        m.pkg_path = "net/http".into();
        m.for_test = Some("net/url".into());
        assert!(m.is_intermediate_test_variant());

        m.pkg_path = "net/url".into();
        assert!(!m.is_intermediate_test_variant());

        m.pkg_path = "net/url_test".into();
        assert!(!m.is_intermediate_test_variant());

        m.for_test = None;
        assert!(!m.is_intermediate_test_variant());
    }
}
