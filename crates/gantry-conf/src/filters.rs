use camino::Utf8Path;

use crate::ConfigError;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Filter {
    include: bool,
    segments: Vec<String>,
}

/// Compiled `directory_filters`.
///
/// Each filter is `-path` (exclude) or `+path` (include) relative to the
/// workspace folder. The last filter matching a path decides; paths no
/// filter matches are included. A `**` segment matches any number of path
/// segments, and a filter matches a path when it matches any leading run of
/// the path's segments, so `-node_modules` also excludes
/// `node_modules/pkg/a.go`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryFilters {
    filters: Vec<Filter>,
}

impl DirectoryFilters {
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self, ConfigError> {
        let mut filters = Vec::with_capacity(raw.len());
        for filter in raw {
            let filter = filter.as_ref();
            let (include, rest) = match filter.split_at_checked(1) {
                Some(("+", rest)) => (true, rest),
                Some(("-", rest)) => (false, rest),
                _ => return Err(ConfigError::InvalidFilter(filter.to_string())),
            };
            let segments: Vec<String> = rest
                .trim_matches('/')
                .split('/')
                .filter(|segment| !segment.is_empty() && *segment != ".")
                .map(str::to_string)
                .collect();
            if segments.is_empty() {
                return Err(ConfigError::InvalidFilter(filter.to_string()));
            }
            filters.push(Filter { include, segments });
        }
        Ok(Self { filters })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Reports whether the folder-relative `path` is excluded.
    #[must_use]
    pub fn excludes(&self, path: &Utf8Path) -> bool {
        let path: Vec<&str> = path
            .as_str()
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();

        let mut excluded = false;
        for filter in &self.filters {
            if matches_prefix(&filter.segments, &path) {
                excluded = !filter.include;
            }
        }
        excluded
    }
}

fn matches_prefix(pattern: &[String], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => true,
        Some((head, rest)) if head == "**" => {
            (0..=path.len()).any(|skip| matches_prefix(rest, &path[skip..]))
        }
        Some((head, rest)) => match path.split_first() {
            Some((segment, path)) => head == segment && matches_prefix(rest, path),
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(raw: &[&str]) -> DirectoryFilters {
        DirectoryFilters::parse(raw).unwrap()
    }

    #[test]
    fn empty_filters_exclude_nothing() {
        let filters = DirectoryFilters::default();
        assert!(filters.is_empty());
        assert!(!filters.excludes(Utf8Path::new("node_modules")));
    }

    #[test]
    fn exclude_applies_to_subtree() {
        let filters = filters(&["-node_modules"]);
        assert!(filters.excludes(Utf8Path::new("node_modules")));
        assert!(filters.excludes(Utf8Path::new("node_modules/pkg/a.go")));
        assert!(!filters.excludes(Utf8Path::new("src/node_modules")));
        assert!(!filters.excludes(Utf8Path::new("node_modules_extra")));
    }

    #[test]
    fn last_match_wins() {
        let filters = filters(&["-gen", "+gen/keep"]);
        assert!(filters.excludes(Utf8Path::new("gen/drop")));
        assert!(!filters.excludes(Utf8Path::new("gen/keep/a.go")));
    }

    #[test]
    fn double_star_matches_any_depth() {
        let filters = filters(&["-**/testdata"]);
        assert!(filters.excludes(Utf8Path::new("testdata")));
        assert!(filters.excludes(Utf8Path::new("a/b/testdata/x.go")));
        assert!(!filters.excludes(Utf8Path::new("a/b/data")));
    }

    #[test]
    fn rejects_filters_without_sign() {
        let err = DirectoryFilters::parse(&["node_modules"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFilter(f) if f == "node_modules"));
        assert!(DirectoryFilters::parse(&["-"]).is_err());
    }
}
