//! Boundary to the external DICOM parser.
//!
//! Decoding DICOM byte streams is not this crate's job. The scan engine
//! asks a `HeaderParser` implementation for the two reads it needs: the
//! minimal per-file header fields used for grouping, and the flat,
//! offset-linked record list of a DICOMDIR index file. Everything else
//! about the file format stays behind this trait.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thin_vec::ThinVec;

use crate::error::Result;
use crate::meta::MetaRecord;
use crate::query::QueryTemplate;

/// Result of a minimal header read on one candidate file.
#[derive(Debug, Clone)]
pub struct HeaderScan {
    pub meta: MetaRecord,
    /// Whether the file carries pixel data.
    pub pixel_data: bool,
    /// Whether the full header satisfied the query template handed to the
    /// parser. Always true when no template was given.
    pub query_matched: bool,
}

/// Type tag of a directory index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Patient,
    Study,
    Series,
    Image,
    /// Any other record type (presentation states, reports, ...).
    Other,
}

/// One flat record of a directory index file.
///
/// Records form a tree, but the links are byte offsets rather than
/// indices: `next` points at the following record on the same level and
/// `child` at the first record one level down. An offset of 0 means no
/// link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryRecord {
    /// Byte offset identifying this record to `next`/`child` links.
    pub offset: u32,
    pub next: u32,
    pub child: u32,
    pub kind: RecordKind,
    pub meta: MetaRecord,
    /// Path components of the referenced file, relative to the directory
    /// holding the index file. Empty for non-leaf records.
    pub file_id: ThinVec<String>,
}

/// A decoded directory index file: the flat record list plus the offset
/// of the first root-level record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryFile {
    pub file_set_id: Option<String>,
    pub root_offset: u32,
    pub records: Vec<DirectoryRecord>,
}

/// Interface to the DICOM parser the scan delegates file decoding to.
pub trait HeaderParser {
    /// Cheap check that a file looks like a DICOM file at all.
    fn is_dicom_file(&self, path: &Path) -> bool;

    /// Reads the minimal header fields used for grouping, evaluating the
    /// query template against the full header when one is given.
    fn parse_header(&self, path: &Path, query: Option<&QueryTemplate>) -> Result<HeaderScan>;

    /// Decodes a directory index file into its flat record list.
    fn parse_directory_file(&self, path: &Path) -> Result<DirectoryFile>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory parser used by the crate's tests.

    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};

    use super::{DirectoryFile, HeaderParser, HeaderScan};
    use crate::error::{DirectoryError, Result};
    use crate::meta::MetaRecord;
    use crate::query::QueryTemplate;

    /// A `HeaderParser` backed by maps instead of file contents.
    ///
    /// Paths registered with `add_file` are recognized as DICOM files;
    /// everything else is rejected by `is_dicom_file`. Query evaluation
    /// uses `QueryTemplate::matches` against the registered record.
    #[derive(Default)]
    pub struct FakeParser {
        headers: HashMap<PathBuf, (MetaRecord, bool)>,
        dirfiles: HashMap<PathBuf, DirectoryFile>,
        broken: HashSet<PathBuf>,
    }

    impl FakeParser {
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers a decodable file with pixel data.
        pub fn add_file(&mut self, path: impl Into<PathBuf>, meta: MetaRecord) {
            self.headers.insert(path.into(), (meta, true));
        }

        /// Registers a decodable file without pixel data.
        pub fn add_file_without_pixels(&mut self, path: impl Into<PathBuf>, meta: MetaRecord) {
            self.headers.insert(path.into(), (meta, false));
        }

        /// Registers a file that fails to decode.
        pub fn add_broken_file(&mut self, path: impl Into<PathBuf>) {
            let path = path.into();
            self.headers.insert(path.clone(), (MetaRecord::new(), false));
            self.broken.insert(path);
        }

        /// Registers a decoded index file for the given path.
        pub fn add_directory_file(&mut self, path: impl Into<PathBuf>, dirfile: DirectoryFile) {
            self.dirfiles.insert(path.into(), dirfile);
        }

        /// Registers an index file that fails to decode.
        pub fn add_broken_directory_file(&mut self, path: impl Into<PathBuf>) {
            self.broken.insert(path.into());
        }
    }

    impl HeaderParser for FakeParser {
        fn is_dicom_file(&self, path: &Path) -> bool {
            self.headers.contains_key(path)
        }

        fn parse_header(&self, path: &Path, query: Option<&QueryTemplate>) -> Result<HeaderScan> {
            if self.broken.contains(path) {
                return Err(DirectoryError::decode(path, "unreadable header"));
            }
            let (meta, pixel_data) = self
                .headers
                .get(path)
                .ok_or_else(|| DirectoryError::decode(path, "not a registered file"))?;
            let query_matched = query.map_or(true, |q| q.matches(meta));
            Ok(HeaderScan {
                meta: meta.clone(),
                pixel_data: *pixel_data,
                query_matched,
            })
        }

        fn parse_directory_file(&self, path: &Path) -> Result<DirectoryFile> {
            if self.broken.contains(path) {
                return Err(DirectoryError::decode(path, "unreadable index file"));
            }
            self.dirfiles
                .get(path)
                .cloned()
                .ok_or_else(|| DirectoryError::decode(path, "not a registered index file"))
        }
    }
}
