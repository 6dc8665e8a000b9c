//! DICOMDIR index decoding.
//!
//! A directory index file stores the Patient/Study/Series/Image tree as
//! a flat record list linked by byte offsets. The decoder rebuilds the
//! hierarchy without native pointers: an offset-to-index map over the
//! record arena, plus an explicit stack of levels still to resume.
//! Records are consumed as they are resolved, so malformed files with
//! self-referencing or repeated offsets cannot loop.

use std::path::{Path, PathBuf};

use fnv::FnvHashMap;

use crate::parser::{DirectoryFile, RecordKind};
use crate::scanner::ScanPass;

/// Decodes one directory index file.
///
/// Series are flushed in depth-first document order. With `capture`
/// given, the referenced file paths are appended there (the caller will
/// run them through grouping); otherwise each series goes straight into
/// the catalog with the metadata of its active patient/study/series
/// ancestors, and the running patient/study indices continue from the
/// catalog's current counts.
pub(crate) fn process_directory_file(
    pass: &mut ScanPass<'_>,
    dirname: &Path,
    dirfile: &DirectoryFile,
    mut capture: Option<&mut Vec<PathBuf>>,
) {
    if let Some(id) = &dirfile.file_set_id {
        pass.catalog.set_file_set_id(id.clone());
    }

    let records = &dirfile.records;
    let mut offset_to_index: FnvHashMap<u32, usize> = records
        .iter()
        .enumerate()
        .map(|(index, record)| (record.offset, index))
        .collect();

    let mut offset = dirfile.root_offset;
    if offset == 0 && !records.is_empty() {
        // Some writers leave the root offset empty; start at the first record.
        offset = records[0].offset;
    }

    // Levels still to resume: (offset of the next sibling, kind of the
    // record whose children we descended into).
    let mut stack: Vec<(u32, RecordKind)> = Vec::new();
    let mut patient_index = pass.catalog.patient_count();
    let mut study_index = pass.catalog.study_count();
    let mut patient_item: Option<usize> = None;
    let mut study_item: Option<usize> = None;
    let mut series_item: Option<usize> = None;
    let mut file_names: Vec<PathBuf> = Vec::new();

    while offset != 0 {
        let mut descend: Option<(u32, RecordKind)> = None;
        // Resolving an offset consumes it; a second reference finds nothing.
        let resolved = offset_to_index.remove(&offset);
        offset = 0;

        if let Some(index) = resolved {
            let record = &records[index];
            offset = record.next;
            if record.child != 0 {
                descend = Some((record.child, record.kind));
            }

            match record.kind {
                RecordKind::Patient => patient_item = Some(index),
                RecordKind::Study => study_item = Some(index),
                RecordKind::Series => series_item = Some(index),
                RecordKind::Image | RecordKind::Other => {
                    if (record.kind == RecordKind::Image || !pass.require_pixel_data)
                        && !record.file_id.is_empty()
                    {
                        let mut path = dirname.to_path_buf();
                        for component in &record.file_id {
                            path.push(component);
                        }
                        file_names.push(path);
                    }
                }
            }
        }

        if let Some((child, kind)) = descend {
            stack.push((offset, kind));
            offset = child;
        } else {
            // Pop until a level with a pending sibling turns up.
            while offset == 0 {
                let Some((next, popped)) = stack.pop() else {
                    break;
                };
                offset = next;

                match popped {
                    RecordKind::Patient => patient_index += 1,
                    RecordKind::Study => study_index += 1,
                    RecordKind::Series => {
                        let files = std::mem::take(&mut file_names);
                        if let Some(out) = capture.as_deref_mut() {
                            out.extend(files);
                        } else {
                            let patient_record = patient_item
                                .map(|i| records[i].meta.clone())
                                .unwrap_or_default();
                            let study_record = study_item
                                .map(|i| records[i].meta.clone())
                                .unwrap_or_default();
                            let series_record = series_item
                                .map(|i| records[i].meta.clone())
                                .unwrap_or_default();
                            if let Err(err) = pass.catalog.add_series(
                                patient_index,
                                study_index,
                                patient_record,
                                study_record,
                                series_record,
                                files,
                            ) {
                                log::warn!(
                                    "dropping series from index file in {}: {}",
                                    dirname.display(),
                                    err
                                );
                            }
                        }
                    }
                    RecordKind::Image | RecordKind::Other => {}
                }
            }
        }
    }
}
