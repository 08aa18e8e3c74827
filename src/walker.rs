use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use globset::GlobMatcher;

use crate::error::Result;

/// A discovered report file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the directory that was walked.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
}

/// Expand a mix of file and directory paths into report files.
///
/// Files are taken as given (whatever their extension); directories are
/// walked recursively for PDFs. When `filter` is set, only files whose
/// path relative to the walked directory matches it are kept.
pub fn collect_inputs(
    inputs: &[PathBuf],
    filter: Option<&GlobMatcher>,
) -> Result<Vec<DiscoveredFile>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            files.extend(discover_pdfs(input, filter)?);
        } else {
            let absolute_path = input.canonicalize()?;
            let relative_path =
                PathBuf::from(input.file_name().unwrap_or(input.as_os_str()));
            files.push(DiscoveredFile {
                mtime: mtime_of(&absolute_path)?,
                relative_path,
                absolute_path,
            });
        }
    }
    Ok(files)
}

/// Recursively walk a directory and discover PDF files.
///
/// Skips hidden files/directories (names starting with `.`). The `.pdf`
/// extension is matched case-insensitively.
pub fn discover_pdfs(
    root: &Path,
    filter: Option<&GlobMatcher>,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    if let Some(filter) = filter {
        results.retain(|f| filter.is_match(&f.relative_path));
    }
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            // Directory links are not followed; they may cycle.
            if resolved.is_file() && is_pdf(&resolved) {
                results.push(make_discovered(root, &path, &resolved)?);
            }
        } else if file_type.is_file() && is_pdf(&path) {
            let abs = path.canonicalize()?;
            results.push(make_discovered(root, &path, &abs)?);
        }
    }

    Ok(())
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> Result<DiscoveredFile> {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    Ok(DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        mtime: mtime_of(absolute_path)?,
    })
}

fn mtime_of(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs())
}
