//! Scan driver: configuration surface and one-pass execution.
//!
//! `DirectoryScanner` owns the configuration, the catalog being built,
//! and the control handle. One call to `scan` clears the previous
//! results and runs a full discovery pass: walk (or index-file decode),
//! then grouping. The pass always runs to completion or cancellation;
//! the first error encountered is retained for the caller to inspect,
//! next to whatever was successfully discovered.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cancel::ScanControl;
use crate::catalog::Catalog;
use crate::error::DirectoryError;
use crate::parser::HeaderParser;
use crate::query::{FindLevel, QueryTemplate};
use crate::sorter;
use crate::walker::{self, VisitedPaths};

/// Run-scoped state threaded through the walker, the index decoder, and
/// the grouping engine. Rebuilt from the configuration at the start of
/// every pass.
pub(crate) struct ScanPass<'a> {
    pub(crate) parser: &'a dyn HeaderParser,
    pub(crate) control: &'a ScanControl,
    pub(crate) catalog: &'a mut Catalog,
    pub(crate) visited: VisitedPaths,
    pub(crate) first_error: Option<DirectoryError>,
    pub(crate) scan_depth: u32,
    pub(crate) pattern: Option<glob::Pattern>,
    pub(crate) follow_symlinks: bool,
    pub(crate) require_pixel_data: bool,
    pub(crate) query: Option<&'a QueryTemplate>,
    pub(crate) find_level: FindLevel,
    pub(crate) from_input_list: bool,
}

impl<'a> ScanPass<'a> {
    pub(crate) fn new(
        parser: &'a dyn HeaderParser,
        control: &'a ScanControl,
        catalog: &'a mut Catalog,
    ) -> Self {
        Self {
            parser,
            control,
            catalog,
            visited: VisitedPaths::new(),
            first_error: None,
            scan_depth: 1,
            pattern: None,
            follow_symlinks: true,
            require_pixel_data: true,
            query: None,
            find_level: FindLevel::default(),
            from_input_list: false,
        }
    }

    /// Keeps only the first error of the run.
    pub(crate) fn retain_error(&mut self, err: DirectoryError) {
        if self.first_error.is_none() {
            self.first_error = Some(err);
        } else {
            log::debug!("suppressing later scan error: {err}");
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// True when the name passes the configured glob; no glob matches all.
    pub(crate) fn matches_pattern(&self, name: &str) -> bool {
        self.pattern.as_ref().map_or(true, |p| p.matches(name))
    }
}

/// Discovers DICOM files under a root directory (or from an explicit
/// input list) and organizes them into a Patient → Study → Series
/// catalog.
pub struct DirectoryScanner {
    root: Option<PathBuf>,
    input_files: Option<Vec<PathBuf>>,
    scan_depth: u32,
    file_pattern: Option<String>,
    follow_symlinks: bool,
    require_pixel_data: bool,
    query: Option<QueryTemplate>,
    find_level: FindLevel,
    control: Arc<ScanControl>,
    catalog: Catalog,
    first_error: Option<DirectoryError>,
}

impl Default for DirectoryScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryScanner {
    pub fn new() -> Self {
        Self {
            root: None,
            input_files: None,
            scan_depth: 1,
            file_pattern: None,
            follow_symlinks: true,
            require_pixel_data: true,
            query: None,
            find_level: FindLevel::default(),
            control: Arc::new(ScanControl::new()),
            catalog: Catalog::new(),
            first_error: None,
        }
    }

    /// Sets the root directory to scan, clearing any explicit input list.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self.input_files = None;
        self
    }

    /// Sets an explicit input list, clearing the root. Entries that are
    /// directories are walked; the rest are taken as candidate files.
    pub fn with_input_files(mut self, files: Vec<PathBuf>) -> Self {
        self.input_files = Some(files);
        self.root = None;
        self
    }

    /// How many directory levels to scan; 1 scans only the root itself.
    pub fn with_scan_depth(mut self, depth: u32) -> Self {
        self.scan_depth = depth;
        self
    }

    /// Glob applied to candidate file names; empty matches everything.
    pub fn with_file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = Some(pattern.into());
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Whether files without pixel data are dropped from the catalog.
    pub fn with_require_pixel_data(mut self, require: bool) -> Self {
        self.require_pixel_data = require;
        self
    }

    pub fn with_query(mut self, query: QueryTemplate) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_find_level(mut self, level: FindLevel) -> Self {
        self.find_level = level;
        self
    }

    /// Handle for cancelling the scan or reading progress from another
    /// thread.
    pub fn control(&self) -> Arc<ScanControl> {
        Arc::clone(&self.control)
    }

    /// Results of the most recent pass.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// First error encountered during the most recent pass, if any.
    pub fn first_error(&self) -> Option<&DirectoryError> {
        self.first_error.as_ref()
    }

    /// File-set identifier, when the pass decoded an index file carrying
    /// one.
    pub fn file_set_id(&self) -> Option<&str> {
        self.catalog.file_set_id()
    }

    /// Runs one discovery pass, replacing any previous results.
    ///
    /// The pass always runs to completion (or until cancelled); whatever
    /// was discovered stays available afterwards, next to `first_error`.
    pub fn scan(&mut self, parser: &dyn HeaderParser) -> &Catalog {
        self.catalog.clear();
        self.first_error = None;
        self.control.reset();

        let pattern = match &self.file_pattern {
            Some(text) if !text.is_empty() => match glob::Pattern::new(text) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    log::warn!("ignoring invalid file pattern {text:?}: {err}");
                    None
                }
            },
            _ => None,
        };

        let root = self.root.clone();
        let input_files = self.input_files.clone();
        let scan_depth = self.scan_depth;

        let mut pass = ScanPass::new(parser, self.control.as_ref(), &mut self.catalog);
        pass.scan_depth = scan_depth;
        pass.pattern = pattern;
        pass.follow_symlinks = self.follow_symlinks;
        pass.require_pixel_data = self.require_pixel_data;
        pass.query = self.query.as_ref();
        pass.find_level = self.find_level;
        pass.from_input_list = input_files.is_some();

        let mut files: Vec<PathBuf> = Vec::new();

        if let Some(inputs) = &input_files {
            for input in inputs {
                if input.is_dir() {
                    walker::process_directory(&mut pass, input, scan_depth, &mut files);
                } else {
                    let name = input
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| input.to_string_lossy().into_owned());
                    if pass.matches_pattern(&name) {
                        files.push(input.clone());
                    }
                }
            }
        } else if let Some(root) = &root {
            if !root.exists() {
                pass.retain_error(DirectoryError::NotFound(root.clone()));
            } else if !root.is_dir() {
                pass.retain_error(DirectoryError::NotADirectory(root.clone()));
            } else {
                walker::process_directory(&mut pass, root, scan_depth, &mut files);
            }
        }
        // Neither a root nor an input list is a valid, empty run.

        if !pass.is_cancelled() && !files.is_empty() {
            sorter::sort_files(&mut pass, &files);
        }

        self.first_error = pass.first_error;
        &self.catalog
    }
}
