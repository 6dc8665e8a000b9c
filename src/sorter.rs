//! Grouping and sorting of scanned files into series.
//!
//! Loose files are classified patient → study → series with a cascading
//! comparator. At every level a UID establishes identity when present,
//! while the human-meaningful fallback key (patient name, study
//! date/time, series number) decides sort order. An absent series UID
//! always opens a new group: two UID-less series can never be safely
//! merged, even when every other key ties.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::meta::{
    compare_uids, MetaRecord, Tag, PATIENT_RECORD_TAGS, SERIES_RECORD_TAGS, STUDY_RECORD_TAGS,
};
use crate::query::FindLevel;
use crate::scanner::ScanPass;

/// Minimal per-file sort key. The path is borrowed from the scanned file
/// list; persisted entries copy it at flush time.
#[derive(Debug, Clone, Copy)]
struct FileRecord<'a> {
    instance_number: u32,
    file_name: &'a Path,
}

/// One open series while grouping is in flight.
#[derive(Debug)]
struct SeriesGroup<'a> {
    patient_record: MetaRecord,
    patient_name: Option<String>,
    patient_id: Option<String>,
    study_record: MetaRecord,
    study_date: Option<String>,
    study_time: Option<String>,
    study_uid: Option<String>,
    series_record: MetaRecord,
    series_uid: Option<String>,
    series_number: u32,
    files: Vec<FileRecord<'a>>,
    query_matched: bool,
}

/// Comparison key of one file, borrowed from its header.
struct SortKey<'h> {
    patient_name: &'h str,
    patient_id: &'h str,
    study_uid: Option<&'h str>,
    study_date: Option<&'h str>,
    study_time: Option<&'h str>,
    series_uid: Option<&'h str>,
    series_number: u32,
}

impl<'h> SortKey<'h> {
    fn from_meta(meta: &'h MetaRecord) -> Self {
        Self {
            patient_name: meta.get(Tag::PatientName).unwrap_or(""),
            patient_id: meta.get(Tag::PatientID).unwrap_or(""),
            study_uid: meta.get(Tag::StudyInstanceUID),
            study_date: meta.get(Tag::StudyDate),
            study_time: meta.get(Tag::StudyTime),
            series_uid: meta.get(Tag::SeriesInstanceUID),
            series_number: meta.get_u32(Tag::SeriesNumber),
        }
    }
}

/// Compares an open group against a file key, existing-before-new.
///
/// Each level falls back from the identifying UID to the sortable key:
/// when the UIDs differ or the file has none, a differing fallback key
/// takes over the ordering, while equal fallback keys leave the UID
/// comparison in charge.
fn compare_group(group: &SeriesGroup<'_>, key: &SortKey<'_>) -> Ordering {
    // Patient: the ID identifies, the name sorts.
    let mut c = group
        .patient_id
        .as_deref()
        .unwrap_or("")
        .cmp(key.patient_id);
    if c != Ordering::Equal || key.patient_id.is_empty() {
        let c2 = group
            .patient_name
            .as_deref()
            .unwrap_or("")
            .cmp(key.patient_name);
        if c2 != Ordering::Equal {
            c = c2;
        }
    }
    if c != Ordering::Equal {
        return c;
    }

    // Study: the UID identifies, date and time sort.
    let mut c = compare_uids(group.study_uid.as_deref(), key.study_uid);
    if c != Ordering::Equal || key.study_uid.is_none() {
        let mut c2 = Ordering::Equal;
        if let (Some(date), Some(key_date)) = (group.study_date.as_deref(), key.study_date) {
            c2 = date.cmp(key_date);
            if c2 == Ordering::Equal {
                if let (Some(time), Some(key_time)) = (group.study_time.as_deref(), key.study_time)
                {
                    c2 = time.cmp(key_time);
                }
            }
        }
        if c2 != Ordering::Equal {
            c = c2;
        }
    }
    if c != Ordering::Equal {
        return c;
    }

    // Series: the UID identifies, the series number sorts.
    let mut c = compare_uids(group.series_uid.as_deref(), key.series_uid);
    if c != Ordering::Equal || key.series_uid.is_none() {
        let c2 = group.series_number.cmp(&key.series_number);
        if c2 != Ordering::Equal {
            c = c2;
        }
    }
    c
}

fn capture_group<'a>(
    meta: &MetaRecord,
    record: FileRecord<'a>,
    query_matched: bool,
) -> SeriesGroup<'a> {
    SeriesGroup {
        patient_record: meta.subset(PATIENT_RECORD_TAGS),
        patient_name: meta.get(Tag::PatientName).map(str::to_owned),
        patient_id: meta.get(Tag::PatientID).map(str::to_owned),
        study_record: meta.subset(STUDY_RECORD_TAGS),
        study_date: meta.get(Tag::StudyDate).map(str::to_owned),
        study_time: meta.get(Tag::StudyTime).map(str::to_owned),
        study_uid: meta.get(Tag::StudyInstanceUID).map(str::to_owned),
        series_record: meta.subset(SERIES_RECORD_TAGS),
        series_uid: meta.get(Tag::SeriesInstanceUID).map(str::to_owned),
        series_number: meta.get_u32(Tag::SeriesNumber),
        files: vec![record],
        query_matched,
    }
}

/// Groups the scanned files and appends the surviving series to the
/// catalog in ascending order.
///
/// The working list of open groups is kept sorted and scanned linearly
/// per file; group counts stay small next to file counts, so the scan is
/// cheaper than it looks. Cancellation abandons the pass before any
/// group is flushed.
pub(crate) fn sort_files(pass: &mut ScanPass<'_>, files: &[PathBuf]) {
    let mut groups: Vec<SeriesGroup<'_>> = Vec::new();
    let total = files.len();

    for (j, file_name) in files.iter().enumerate() {
        // Skip anything that does not look like a DICOM file.
        if !pass.parser.is_dicom_file(file_name) {
            continue;
        }

        let header = match pass.parser.parse_header(file_name, pass.query) {
            Ok(header) => header,
            Err(err) => {
                pass.retain_error(err);
                continue;
            }
        };
        if !header.pixel_data && pass.require_pixel_data {
            continue;
        }

        // Progress at 1% granularity; poll cancellation between files.
        let progress = (j as f64 + 1.0) / total as f64;
        if progress == 1.0 || progress > pass.control.progress() + 0.01 {
            pass.control.report((progress * 100.0).floor() / 100.0);
        }
        if pass.is_cancelled() {
            return;
        }

        let query_matched = pass.query.is_none() || header.query_matched;
        if !query_matched && pass.find_level == FindLevel::Image {
            continue;
        }

        let meta = &header.meta;
        let key = SortKey::from_meta(meta);
        let record = FileRecord {
            instance_number: meta.get_u32(Tag::InstanceNumber),
            file_name: file_name.as_path(),
        };

        let mut position = groups.len();
        let mut joined = false;
        for i in 0..groups.len() {
            let c = compare_group(&groups[i], &key);
            if c == Ordering::Equal && key.series_uid.is_some() {
                let group = &mut groups[i];
                group.files.push(record);
                group.query_matched |= query_matched;
                joined = true;
                break;
            }
            if c != Ordering::Less {
                position = i;
                break;
            }
        }
        if !joined {
            groups.insert(position, capture_group(meta, record, query_matched));
        }
    }

    let mut patient_count = pass.catalog.patient_count();
    let mut study_count = pass.catalog.study_count();
    let mut last_patient_id: Option<String> = None;
    let mut last_study_uid: Option<String> = None;

    for mut group in groups {
        if !group.query_matched {
            continue;
        }

        // Stable, so equal instance numbers keep their grouping order.
        group.files.sort_by_key(|file| file.instance_number);

        // A group with no usable patient ID always opens a new patient;
        // same for a study without a UID.
        if last_patient_id.is_none() || last_patient_id != group.patient_id {
            last_patient_id = group.patient_id.clone();
            patient_count += 1;
            last_study_uid = group.study_uid.clone();
            study_count += 1;
        } else if last_study_uid.is_none() || last_study_uid != group.study_uid {
            last_study_uid = group.study_uid.clone();
            study_count += 1;
        }

        let files: Vec<PathBuf> = group
            .files
            .iter()
            .map(|file| file.file_name.to_path_buf())
            .collect();
        if let Err(err) = pass.catalog.add_series(
            patient_count - 1,
            study_count - 1,
            group.patient_record,
            group.study_record,
            group.series_record,
            files,
        ) {
            log::warn!("dropping series group: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cancel::ScanControl;
    use crate::catalog::Catalog;
    use crate::error::DirectoryError;
    use crate::parser::fake::FakeParser;
    use crate::query::QueryTemplate;
    use crate::scanner::ScanPass;

    fn meta(
        patient_id: &str,
        study_uid: &str,
        series_uid: &str,
        instance: u32,
    ) -> MetaRecord {
        MetaRecord::new()
            .with(Tag::PatientID, patient_id)
            .with(Tag::PatientName, format!("Name^{patient_id}"))
            .with(Tag::StudyInstanceUID, study_uid)
            .with(Tag::StudyDate, "20240101")
            .with(Tag::StudyTime, "101500")
            .with(Tag::SeriesInstanceUID, series_uid)
            .with(Tag::InstanceNumber, instance.to_string())
    }

    struct Fixture {
        parser: FakeParser,
        control: ScanControl,
        catalog: Catalog,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                parser: FakeParser::new(),
                control: ScanControl::new(),
                catalog: Catalog::new(),
            }
        }

        fn pass(&mut self) -> ScanPass<'_> {
            ScanPass::new(&self.parser, &self.control, &mut self.catalog)
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn files_group_into_one_series_sorted_by_instance() {
        let mut fixture = Fixture::new();
        fixture
            .parser
            .add_file("/d/c.dcm", meta("P1", "1.2", "1.2.3", 3));
        fixture
            .parser
            .add_file("/d/a.dcm", meta("P1", "1.2", "1.2.3", 1));
        fixture
            .parser
            .add_file("/d/b.dcm", meta("P1", "1.2", "1.2.3", 2));
        fixture
            .parser
            .add_file("/d/x.dcm", meta("P1", "1.2", "1.2.4", 1));

        let files = paths(&["/d/c.dcm", "/d/a.dcm", "/d/b.dcm", "/d/x.dcm"]);
        let mut pass = fixture.pass();
        sort_files(&mut pass, &files);

        let catalog = &fixture.catalog;
        assert_eq!(catalog.patient_count(), 1);
        assert_eq!(catalog.study_count(), 1);
        assert_eq!(catalog.series_count(), 2);

        let study = catalog.study(0).unwrap();
        assert_eq!((study.first_series, study.last_series), (0, 1));

        let first = catalog.series(0).unwrap();
        assert_eq!(
            first.files,
            paths(&["/d/a.dcm", "/d/b.dcm", "/d/c.dcm"])
        );
        assert_eq!(catalog.series(1).unwrap().files, paths(&["/d/x.dcm"]));
    }

    #[test]
    fn groups_are_flushed_in_ascending_patient_order() {
        let mut fixture = Fixture::new();
        fixture
            .parser
            .add_file("/d/late.dcm", meta("P2", "2.2", "2.2.1", 1));
        fixture
            .parser
            .add_file("/d/early.dcm", meta("P1", "1.2", "1.2.1", 1));

        let files = paths(&["/d/late.dcm", "/d/early.dcm"]);
        let mut pass = fixture.pass();
        sort_files(&mut pass, &files);

        let catalog = &fixture.catalog;
        assert_eq!(catalog.patient_count(), 2);
        assert_eq!(
            catalog.patient(0).unwrap().record.get(Tag::PatientID),
            Some("P1")
        );
        assert_eq!(
            catalog.patient(1).unwrap().record.get(Tag::PatientID),
            Some("P2")
        );
    }

    #[test]
    fn missing_series_uid_never_merges() {
        let mut fixture = Fixture::new();
        let without_uid = |instance: u32| {
            MetaRecord::new()
                .with(Tag::PatientID, "P1")
                .with(Tag::StudyInstanceUID, "1.2")
                .with(Tag::InstanceNumber, instance.to_string())
        };
        fixture.parser.add_file("/d/a.dcm", without_uid(1));
        fixture.parser.add_file("/d/b.dcm", without_uid(2));

        let files = paths(&["/d/a.dcm", "/d/b.dcm"]);
        let mut pass = fixture.pass();
        sort_files(&mut pass, &files);

        // Identical keys, but no UID to prove they are the same series.
        assert_eq!(fixture.catalog.series_count(), 2);
        assert_eq!(fixture.catalog.study_count(), 1);
    }

    #[test]
    fn series_level_query_keeps_whole_matching_group() {
        let mut fixture = Fixture::new();
        fixture.parser.add_file(
            "/d/ct1.dcm",
            meta("P1", "1.2", "1.2.3", 1).with(Tag::Modality, "CT"),
        );
        fixture.parser.add_file(
            "/d/ct2.dcm",
            meta("P1", "1.2", "1.2.3", 2).with(Tag::Modality, "CT"),
        );
        fixture.parser.add_file(
            "/d/mr.dcm",
            meta("P1", "1.2", "1.2.3", 3).with(Tag::Modality, "MR"),
        );

        let query = QueryTemplate::new().with(Tag::Modality, "CT");
        let files = paths(&["/d/ct1.dcm", "/d/ct2.dcm", "/d/mr.dcm"]);
        let mut pass = fixture.pass();
        pass.query = Some(&query);
        pass.find_level = FindLevel::Series;
        sort_files(&mut pass, &files);

        // The group matched on the CT files, so the MR file rides along.
        assert_eq!(fixture.catalog.series_count(), 1);
        assert_eq!(fixture.catalog.series(0).unwrap().files.len(), 3);
    }

    #[test]
    fn image_level_query_excludes_nonmatching_files() {
        let mut fixture = Fixture::new();
        fixture.parser.add_file(
            "/d/ct1.dcm",
            meta("P1", "1.2", "1.2.3", 1).with(Tag::Modality, "CT"),
        );
        fixture.parser.add_file(
            "/d/ct2.dcm",
            meta("P1", "1.2", "1.2.3", 2).with(Tag::Modality, "CT"),
        );
        fixture.parser.add_file(
            "/d/mr.dcm",
            meta("P1", "1.2", "1.2.3", 3).with(Tag::Modality, "MR"),
        );

        let query = QueryTemplate::new().with(Tag::Modality, "CT");
        let files = paths(&["/d/ct1.dcm", "/d/ct2.dcm", "/d/mr.dcm"]);
        let mut pass = fixture.pass();
        pass.query = Some(&query);
        pass.find_level = FindLevel::Image;
        sort_files(&mut pass, &files);

        assert_eq!(fixture.catalog.series_count(), 1);
        assert_eq!(
            fixture.catalog.series(0).unwrap().files,
            paths(&["/d/ct1.dcm", "/d/ct2.dcm"])
        );
    }

    #[test]
    fn nonmatching_series_are_discarded_entirely() {
        let mut fixture = Fixture::new();
        fixture.parser.add_file(
            "/d/ct.dcm",
            meta("P1", "1.2", "1.2.3", 1).with(Tag::Modality, "CT"),
        );
        fixture.parser.add_file(
            "/d/mr.dcm",
            meta("P1", "1.2", "1.2.4", 1).with(Tag::Modality, "MR"),
        );

        let query = QueryTemplate::new().with(Tag::Modality, "CT");
        let files = paths(&["/d/ct.dcm", "/d/mr.dcm"]);
        let mut pass = fixture.pass();
        pass.query = Some(&query);
        pass.find_level = FindLevel::Series;
        sort_files(&mut pass, &files);

        assert_eq!(fixture.catalog.series_count(), 1);
        assert_eq!(fixture.catalog.series(0).unwrap().files, paths(&["/d/ct.dcm"]));
    }

    #[test]
    fn first_decode_error_is_retained_and_files_skipped() {
        let mut fixture = Fixture::new();
        fixture.parser.add_broken_file("/d/bad1.dcm");
        fixture.parser.add_broken_file("/d/bad2.dcm");
        fixture
            .parser
            .add_file("/d/good.dcm", meta("P1", "1.2", "1.2.3", 1));

        let files = paths(&["/d/bad1.dcm", "/d/bad2.dcm", "/d/good.dcm"]);
        let mut pass = fixture.pass();
        sort_files(&mut pass, &files);

        match &pass.first_error {
            Some(DirectoryError::Decode { path, .. }) => {
                assert_eq!(path, &PathBuf::from("/d/bad1.dcm"));
            }
            other => panic!("expected retained decode error, got {other:?}"),
        }
        assert_eq!(fixture.catalog.series_count(), 1);
    }

    #[test]
    fn files_without_pixel_data_are_skipped_when_required() {
        let mut fixture = Fixture::new();
        fixture
            .parser
            .add_file_without_pixels("/d/meta-only.dcm", meta("P1", "1.2", "1.2.3", 1));
        fixture
            .parser
            .add_file("/d/image.dcm", meta("P1", "1.2", "1.2.3", 2));

        let files = paths(&["/d/meta-only.dcm", "/d/image.dcm"]);
        let mut pass = fixture.pass();
        sort_files(&mut pass, &files);
        assert_eq!(fixture.catalog.series(0).unwrap().files, paths(&["/d/image.dcm"]));

        let mut fixture2 = Fixture::new();
        fixture2
            .parser
            .add_file_without_pixels("/d/meta-only.dcm", meta("P1", "1.2", "1.2.3", 1));
        let mut pass = fixture2.pass();
        pass.require_pixel_data = false;
        sort_files(&mut pass, &paths(&["/d/meta-only.dcm"]));
        assert_eq!(fixture2.catalog.series_count(), 1);
    }

    #[test]
    fn cancellation_abandons_the_pass_before_flushing() {
        let mut fixture = Fixture::new();
        fixture
            .parser
            .add_file("/d/a.dcm", meta("P1", "1.2", "1.2.3", 1));
        fixture.control.cancel();

        let files = paths(&["/d/a.dcm"]);
        let mut pass = fixture.pass();
        sort_files(&mut pass, &files);
        assert!(fixture.catalog.is_empty());
    }

    #[test]
    fn empty_patient_ids_group_by_name() {
        let mut fixture = Fixture::new();
        let named = |name: &str, series: &str| {
            MetaRecord::new()
                .with(Tag::PatientName, name)
                .with(Tag::StudyInstanceUID, "1.2")
                .with(Tag::SeriesInstanceUID, series)
                .with(Tag::InstanceNumber, "1")
        };
        fixture.parser.add_file("/d/a.dcm", named("Doe^Jane", "1.2.3"));
        fixture.parser.add_file("/d/b.dcm", named("Doe^Jane", "1.2.3"));
        fixture.parser.add_file("/d/c.dcm", named("Roe^Rick", "1.2.9"));

        let files = paths(&["/d/a.dcm", "/d/b.dcm", "/d/c.dcm"]);
        let mut pass = fixture.pass();
        sort_files(&mut pass, &files);

        assert_eq!(fixture.catalog.series_count(), 2);
        assert_eq!(fixture.catalog.series(0).unwrap().files.len(), 2);
    }
}
