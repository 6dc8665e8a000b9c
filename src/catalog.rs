//! The Patient → Study → Series catalog built by a scan.
//!
//! All three tables are append-only for the duration of one pass; a new
//! pass clears and rebuilds them. Series are appended in discovery
//! order, each study covers a contiguous index range of the series
//! table, and patients reference studies by index. Insertions must
//! arrive with monotonically increasing patient and study indices;
//! anything else is rejected without touching the tables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, Result};
use crate::meta::MetaRecord;

/// One series: its metadata record and the files that compose it, in the
/// order established at grouping time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub record: MetaRecord,
    pub files: Vec<PathBuf>,
}

/// One study, covering the series index range `[first_series, last_series]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyEntry {
    pub record: MetaRecord,
    /// Copy of the owning patient's record, so a study can be rendered
    /// without a second lookup.
    pub patient_record: MetaRecord,
    pub first_series: usize,
    pub last_series: usize,
}

/// One patient and the studies that belong to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientEntry {
    pub record: MetaRecord,
    /// Indices into the study table, in insertion order, no duplicates.
    pub studies: Vec<usize>,
}

/// Append-only hierarchical index of everything a scan discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    series: Vec<SeriesEntry>,
    studies: Vec<StudyEntry>,
    patients: Vec<PatientEntry>,
    file_set_id: Option<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn study_count(&self) -> usize {
        self.studies.len()
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn series(&self, index: usize) -> Option<&SeriesEntry> {
        self.series.get(index)
    }

    pub fn study(&self, index: usize) -> Option<&StudyEntry> {
        self.studies.get(index)
    }

    pub fn patient(&self, index: usize) -> Option<&PatientEntry> {
        self.patients.get(index)
    }

    pub fn all_series(&self) -> &[SeriesEntry] {
        &self.series
    }

    pub fn all_studies(&self) -> &[StudyEntry] {
        &self.studies
    }

    pub fn all_patients(&self) -> &[PatientEntry] {
        &self.patients
    }

    /// Identifier of the file set, when the scan decoded an index file
    /// that carried one.
    pub fn file_set_id(&self) -> Option<&str> {
        self.file_set_id.as_deref()
    }

    pub(crate) fn set_file_set_id(&mut self, id: String) {
        self.file_set_id = Some(id);
    }

    pub(crate) fn clear(&mut self) {
        self.series.clear();
        self.studies.clear();
        self.patients.clear();
        self.file_set_id = None;
    }

    /// Appends one series under the given patient and study indices.
    ///
    /// `study` must be the current study count (opening a new study) or
    /// one less (continuing the most recent study); the same rule applies
    /// to `patient`. Violations leave the catalog untouched. Discovery is
    /// a single forward pass, so retroactive insertion is never needed.
    pub fn add_series(
        &mut self,
        patient: usize,
        study: usize,
        patient_record: MetaRecord,
        study_record: MetaRecord,
        series_record: MetaRecord,
        files: Vec<PathBuf>,
    ) -> Result<()> {
        let patient_count = self.patients.len();
        let study_count = self.studies.len();
        let series_index = self.series.len();

        if study != study_count && Some(study) != study_count.checked_sub(1) {
            return Err(DirectoryError::NonMonotonicIndex {
                level: "study",
                index: study,
                count: study_count,
            });
        }
        if patient != patient_count && Some(patient) != patient_count.checked_sub(1) {
            return Err(DirectoryError::NonMonotonicIndex {
                level: "patient",
                index: patient,
                count: patient_count,
            });
        }

        if study == study_count {
            self.studies.push(StudyEntry {
                record: study_record,
                patient_record: patient_record.clone(),
                first_series: series_index,
                last_series: series_index,
            });
        } else {
            self.studies[study].last_series = series_index;
        }

        if patient == patient_count {
            self.patients.push(PatientEntry {
                record: patient_record,
                studies: vec![study],
            });
        } else {
            let entry = &mut self.patients[patient];
            if !entry.studies.contains(&study) {
                entry.studies.push(study);
            }
        }

        self.series.push(SeriesEntry {
            record: series_record,
            files,
        });
        Ok(())
    }
}
