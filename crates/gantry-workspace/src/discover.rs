use gantry_source::path_to_url;
use gantry_source::url_to_path;
use gantry_source::FileSource;
use url::Url;

use crate::scan::find_modules;
use crate::scan::PathFilter;

/// Find the manifest that decides the module layout for `folder`.
///
/// Looks for `go.work`, then `gantry.mod` (only with the experimental
/// workspace module), then `go.mod`, in `folder` or the nearest ancestor
/// holding one. Without the experimental workspace module a folder that holds
/// no manifest but contains exactly one nested module resolves to that
/// module. A scan that runs out of budget resolves to nothing.
#[must_use]
pub fn find_module_source(
    folder: &Url,
    fs: &dyn FileSource,
    filter: &PathFilter,
    experimental: bool,
    file_limit: usize,
) -> Option<Url> {
    let folder_path = url_to_path(folder)?;
    let patterns: &[&str] = if experimental {
        &["go.work", "gantry.mod", "go.mod"]
    } else {
        &["go.work", "go.mod"]
    };

    for basename in patterns {
        for dir in folder_path.ancestors() {
            let Some(uri) = path_to_url(&dir.join(basename)) else {
                continue;
            };
            if fs.get_file(&uri).exists() {
                return Some(uri);
            }
        }
    }

    if experimental {
        return None;
    }

    let scan = find_modules(&folder_path, filter, 2, file_limit);
    if scan.exhausted || scan.modules.len() != 1 {
        return None;
    }
    scan.modules.iter().next().cloned()
}
