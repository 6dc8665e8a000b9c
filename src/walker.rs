//! Recursive directory traversal.
//!
//! The walk is depth-limited, pattern-filtered, and symlink-aware. Every
//! directory is canonicalized and recorded in a visited set before it is
//! entered, so circular symlinks terminate. When a DICOMDIR index file
//! is found at the top scan level, the walk hands the whole directory to
//! the index decoder instead of enumerating files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::dirfile;
use crate::error::{canonicalize_existing_path, DirectoryError};
use crate::scanner::ScanPass;

/// Name of the per-directory index file.
pub const INDEX_FILE_NAME: &str = "DICOMDIR";

/// Sorted set of canonicalized directory paths seen during one pass.
#[derive(Debug, Default)]
pub struct VisitedPaths {
    paths: Vec<PathBuf>,
}

impl VisitedPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a path keeping sort order; returns false if it was
    /// already present.
    pub fn insert(&mut self, path: PathBuf) -> bool {
        match self.paths.binary_search(&path) {
            Ok(_) => false,
            Err(position) => {
                self.paths.insert(position, path);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Walks one directory, collecting candidate file paths into `files`.
///
/// `depth` counts down from the configured scan depth; at zero no
/// further recursion happens. Subdirectories are visited depth-first in
/// name order so repeated runs over an unchanged tree produce identical
/// output.
pub(crate) fn process_directory(
    pass: &mut ScanPass<'_>,
    dirname: &Path,
    depth: u32,
    files: &mut Vec<PathBuf>,
) {
    // Cycle guard: canonicalize and refuse to enter a directory twice.
    let realname = canonicalize_existing_path(dirname.to_path_buf());
    if !pass.visited.insert(realname) {
        return;
    }

    // The index file is only trusted at the designated scan level, and
    // never when the caller supplied an explicit file list.
    if !pass.from_input_list && depth == pass.scan_depth {
        let index_path = dirname.join(INDEX_FILE_NAME);
        if index_path.is_file() {
            match pass.parser.parse_directory_file(&index_path) {
                Ok(dirfile) => {
                    if pass.query.is_some() {
                        // Route the referenced files through grouping so
                        // the query filter applies.
                        dirfile::process_directory_file(pass, dirname, &dirfile, Some(files));
                    } else {
                        dirfile::process_directory_file(pass, dirname, &dirfile, None);
                    }
                    return;
                }
                Err(err) => {
                    if depth == 0 {
                        pass.retain_error(err);
                        return;
                    }
                    // Deeper levels fall back to plain enumeration.
                    log::debug!(
                        "ignoring undecodable {} in {}: {}",
                        INDEX_FILE_NAME,
                        dirname.display(),
                        err
                    );
                }
            }
        }
    }

    if depth == 0 {
        return;
    }

    if pass.is_cancelled() {
        return;
    }
    pass.control.report(0.0);

    let mut names = Vec::new();
    match fs::read_dir(dirname) {
        Ok(entries) => {
            for entry in entries.flatten() {
                names.push(entry.file_name());
            }
        }
        Err(err) => {
            // Only an unreadable top-level directory is an error.
            if depth == pass.scan_depth {
                log::debug!("cannot read {}: {}", dirname.display(), err);
                pass.retain_error(DirectoryError::CannotOpen(dirname.to_path_buf()));
            }
            return;
        }
    }
    names.sort_unstable();

    for name in names {
        let display = name.to_string_lossy();
        if display.starts_with('.') || display == INDEX_FILE_NAME {
            continue;
        }
        let path = dirname.join(&name);

        if !pass.follow_symlinks && is_symlink(&path) {
            continue;
        }
        if path.is_dir() {
            if depth > 1 {
                process_directory(pass, &path, depth - 1, files);
            }
        } else if pass.matches_pattern(&display) {
            files.push(path);
        }
    }
}

fn is_symlink(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}
