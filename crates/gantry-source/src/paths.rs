//! Path and URL conversion utilities
//!
//! Files are identified by `file://` URLs everywhere above this crate; these
//! helpers convert between URLs and UTF-8 paths consistently.

use camino::Utf8Path;
use camino::Utf8PathBuf;
use url::Url;

/// Convert a `file://` URL to a [`Utf8PathBuf`].
///
/// Handles percent-encoding and platform-specific path formats (e.g., Windows drives).
#[must_use]
pub fn url_to_path(url: &Url) -> Option<Utf8PathBuf> {
    if url.scheme() != "file" {
        return None;
    }

    let path = percent_encoding::percent_decode_str(url.path())
        .decode_utf8()
        .ok()?;

    #[cfg(windows)]
    let path = {
        // Remove leading '/' for paths like /C:/...
        path.strip_prefix('/').unwrap_or(&path)
    };

    Some(Utf8PathBuf::from(path.as_ref()))
}

/// Convert an absolute [`Utf8Path`] to a `file://` URL.
#[must_use]
pub fn path_to_url(path: &Utf8Path) -> Option<Url> {
    if path.is_absolute() {
        return Url::from_file_path(path.as_std_path()).ok();
    }

    let absolute = std::fs::canonicalize(path.as_std_path()).ok()?;
    Url::from_file_path(absolute).ok()
}

/// The URL of the directory containing `url`.
#[must_use]
pub fn url_dir(url: &Url) -> Option<Url> {
    let path = url_to_path(url)?;
    path_to_url(path.parent()?)
}

/// The URL of `name` inside the directory `dir`.
#[must_use]
pub fn url_join(dir: &Url, name: &str) -> Option<Url> {
    let path = url_to_path(dir)?;
    path_to_url(&path.join(name))
}

/// The final path segment of `url`, decoded.
#[must_use]
pub fn url_file_name(url: &Url) -> Option<String> {
    url_to_path(url).and_then(|path| path.file_name().map(str::to_string))
}

/// Reports whether `path` is `dir` or lies underneath it.
///
/// Comparison is by path component, so `/ws/foo` is not inside `/ws/fo`.
#[must_use]
pub fn in_dir(dir: &Utf8Path, path: &Utf8Path) -> bool {
    path.starts_with(dir)
}
