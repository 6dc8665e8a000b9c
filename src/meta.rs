//! Attribute records exchanged with the DICOM parser.
//!
//! The scan engine only ever looks at a small, fixed set of header
//! attributes; `Tag` enumerates them and `MetaRecord` holds their string
//! values. Full attribute dictionaries, value representations, and
//! charset handling stay on the parser's side of the boundary.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Header attributes read during a scan.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Tag {
    SpecificCharacterSet,
    // Patient level
    PatientName,
    PatientID,
    PatientBirthDate,
    PatientSex,
    PatientAge,
    // Study level
    StudyDate,
    StudyTime,
    ReferringPhysicianName,
    StudyInstanceUID,
    StudyID,
    AccessionNumber,
    StudyDescription,
    // Series level
    SeriesDate,
    SeriesTime,
    Modality,
    SeriesDescription,
    SeriesInstanceUID,
    SeriesNumber,
    // Image level
    InstanceNumber,
    // File-set level
    FileSetID,
}

/// Attributes captured into a patient record.
pub const PATIENT_RECORD_TAGS: &[Tag] = &[
    Tag::SpecificCharacterSet,
    Tag::PatientName,
    Tag::PatientID,
    Tag::PatientBirthDate,
    Tag::PatientSex,
];

/// Attributes captured into a study record.
pub const STUDY_RECORD_TAGS: &[Tag] = &[
    Tag::SpecificCharacterSet,
    Tag::StudyDate,
    Tag::StudyTime,
    Tag::ReferringPhysicianName,
    Tag::PatientAge,
    Tag::StudyInstanceUID,
    Tag::StudyID,
    Tag::AccessionNumber,
    Tag::StudyDescription,
];

/// Attributes captured into a series record.
pub const SERIES_RECORD_TAGS: &[Tag] = &[
    Tag::SpecificCharacterSet,
    Tag::SeriesDate,
    Tag::SeriesTime,
    Tag::Modality,
    Tag::SeriesDescription,
    Tag::SeriesInstanceUID,
    Tag::SeriesNumber,
];

/// An ordered attribute-to-value map.
///
/// Values are kept as the raw header strings; numeric attributes are
/// parsed on access. Absent attributes are simply missing keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    attrs: BTreeMap<Tag, String>,
}

impl MetaRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an attribute value, replacing any previous one.
    pub fn set(&mut self, tag: Tag, value: impl Into<String>) {
        self.attrs.insert(tag, value.into());
    }

    /// Builder-style `set`.
    pub fn with(mut self, tag: Tag, value: impl Into<String>) -> Self {
        self.set(tag, value);
        self
    }

    /// Returns the attribute value, or None if absent.
    pub fn get(&self, tag: Tag) -> Option<&str> {
        self.attrs.get(&tag).map(String::as_str)
    }

    /// Returns the attribute parsed as an unsigned integer, 0 if absent
    /// or unparseable.
    pub fn get_u32(&self, tag: Tag) -> u32 {
        self.get(tag)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Copies the listed attributes (those present) into a new record.
    pub fn subset(&self, tags: &[Tag]) -> MetaRecord {
        let mut record = MetaRecord::new();
        for &tag in tags {
            if let Some(value) = self.get(tag) {
                record.set(tag, value);
            }
        }
        record
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tag, &str)> {
        self.attrs.iter().map(|(tag, value)| (*tag, value.as_str()))
    }
}

/// Orders two UIDs by their numeric components.
///
/// UIDs are dot-separated decimal components; comparing them as plain
/// strings would put "1.2.10" before "1.2.9". Components are compared
/// numerically (zero-stripped length, then digits), a missing UID sorts
/// before any present one, and a UID that is a prefix of another sorts
/// first.
pub fn compare_uids(a: Option<&str>, b: Option<&str>) -> Ordering {
    let (a, b) = match (a, b) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(a), Some(b)) => (a, b),
    };

    let mut parts_a = a.split('.');
    let mut parts_b = b.split('.');
    loop {
        match (parts_a.next(), parts_b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let x = x.trim_start_matches('0');
                let y = y.trim_start_matches('0');
                let c = x.len().cmp(&y.len()).then_with(|| x.cmp(y));
                if c != Ordering::Equal {
                    return c;
                }
            }
        }
    }
}
