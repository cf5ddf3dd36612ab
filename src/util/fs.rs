//! Recursive file enumeration and line counting for artifact analysis.

use std::collections::HashMap;
use std::path::Path;

use walkdir::WalkDir;

/// Line count charged for a file that cannot be read as text.
///
/// Unreadable files push the artifact over any line-count maximum so it
/// is filtered out rather than silently under-counted.
pub const LARGE_NUM_LINES: usize = 1_000_000;

/// List all files under `path` as paths relative to `path`.
///
/// Directories are traversed recursively; the returned entries are files
/// only. Paths use the platform separator and are relative, e.g.
/// `dir1/file1`.
pub fn list_files_in_dir(path: &Path) -> Vec<String> {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(path)
                .ok()
                .map(|rel| rel.to_string_lossy().into_owned())
        })
        .collect()
}

/// Group files by lowercase extension into the given buckets.
///
/// Files whose extension matches none of `extensions` land in the
/// `"others"` bucket. Matching is exact and case-insensitive.
pub fn filter_files_by_extension<'a>(
    files: &'a [String],
    extensions: &[&str],
) -> HashMap<String, Vec<&'a str>> {
    let mut buckets: HashMap<String, Vec<&str>> = extensions
        .iter()
        .map(|ext| (ext.to_string(), Vec::new()))
        .collect();
    buckets.insert("others".to_string(), Vec::new());

    for file in files {
        let ext = Path::new(file)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let bucket = if buckets.contains_key(&ext) {
            ext
        } else {
            "others".to_string()
        };
        if let Some(entries) = buckets.get_mut(&bucket) {
            entries.push(file.as_str());
        }
    }

    buckets
}

/// Count the total number of lines across `files` (relative to `root`).
///
/// A file that cannot be read contributes [`LARGE_NUM_LINES`].
pub fn count_num_lines_in_files(root: &Path, files: &[&str]) -> usize {
    files
        .iter()
        .map(|file| match std::fs::read_to_string(root.join(file)) {
            Ok(content) => content.lines().count(),
            Err(_) => LARGE_NUM_LINES,
        })
        .sum()
}
