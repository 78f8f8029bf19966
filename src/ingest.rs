//! Ingestion passes.
//!
//! ```text
//! summary_<ds>.csv ─► RecordingSet ─┬─ metadata pass ──► patients + diagnoses
//!                                   └─ time-series pass ─► ecg_samples
//! ```
//!
//! Both passes visit recordings in summary order (or the seeded subsample
//! order) and can be run separately.  Re-running either pass is safe:
//! recordings that already have a patient row are skipped by the metadata
//! pass, and patients that already have samples are skipped by the
//! time-series pass.  The time-series pass needs the metadata pass to have
//! run first.
use anyhow::Result;

use crate::config::DataLayout;
use crate::error::EcgDbError;
use crate::loader::{Portion, RecordingSet};
use crate::store::Store;

/// Which ingestion pass to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Metadata,
    TimeSeries,
    /// Metadata, then time series.
    All,
}

/// Outcome of one pass over one dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    /// Recordings already present.
    pub skipped:  usize,
}

impl Store {
    fn dataset_id_of(&self, dataset: &str) -> Result<i64> {
        self.dataset_id(dataset)?
            .ok_or_else(|| EcgDbError::UnknownDataset(dataset.to_string()).into())
    }

    /// Insert one patient row and its diagnosis links per recording.
    ///
    /// Labels outside the diagnosis dictionary are logged and skipped.
    pub fn populate_metadata(
        &mut self,
        dataset: &str,
        portion: Portion,
        layout: &DataLayout,
    ) -> Result<IngestReport> {
        let dataset_id = self.dataset_id_of(dataset)?;
        let cfg = self.config().clone();
        let set = RecordingSet::open(dataset, &cfg.twelve_leads, portion, layout, &cfg)?;
        let dictionary = self.diagnosis_ids()?;
        let mut report = IngestReport::default();

        for i in 0..set.len() {
            let meta = set.meta(i)?;
            if self.patient_id(dataset_id, &meta.id)?.is_some() {
                tracing::debug!("{dataset}/{}: already ingested", meta.id);
                report.skipped += 1;
                continue;
            }
            let diagnosis_ids: Vec<i64> = meta
                .labels
                .iter()
                .filter_map(|code| {
                    let id = dictionary.get(code).copied();
                    if id.is_none() {
                        tracing::warn!("{dataset}/{}: code {code} not in dictionary", meta.id);
                    }
                    id
                })
                .collect();
            let patient_id = self.insert_patient(dataset_id, &meta, &diagnosis_ids)?;
            tracing::debug!("{dataset}/{} → patient {patient_id}", meta.id);
            report.inserted += 1;
        }

        tracing::info!(
            "{dataset}: metadata pass inserted {}, skipped {}",
            report.inserted,
            report.skipped
        );
        Ok(report)
    }

    /// Load, resample and store the samples of every recording.
    ///
    /// Fails with [`EcgDbError::PatientNotIngested`] for a recording the
    /// metadata pass has not seen.
    pub fn populate_time_series(
        &mut self,
        dataset: &str,
        portion: Portion,
        layout: &DataLayout,
    ) -> Result<IngestReport> {
        let dataset_id = self.dataset_id_of(dataset)?;
        let cfg = self.config().clone();
        let set = RecordingSet::open(dataset, &cfg.twelve_leads, portion, layout, &cfg)?;
        let mut report = IngestReport::default();

        for (i, row) in set.rows().iter().enumerate() {
            let patient_id = self.patient_id(dataset_id, &row.id)?.ok_or_else(|| {
                EcgDbError::PatientNotIngested {
                    dataset:     dataset.to_string(),
                    original_id: row.id.clone(),
                }
            })?;
            if self.has_samples(patient_id)? {
                report.skipped += 1;
                continue;
            }
            let rec = set.get(i)?;
            let n = self.insert_samples(patient_id, &rec.ecg)?;
            tracing::debug!("{dataset}/{}: {n} samples", row.id);
            report.inserted += 1;
        }

        tracing::info!(
            "{dataset}: time-series pass inserted {}, skipped {}",
            report.inserted,
            report.skipped
        );
        Ok(report)
    }

    /// Run `pass` over `dataset`.  Reports are in pass order.
    pub fn ingest(
        &mut self,
        dataset: &str,
        portion: Portion,
        layout: &DataLayout,
        pass: Pass,
    ) -> Result<Vec<IngestReport>> {
        let mut out = Vec::with_capacity(2);
        if matches!(pass, Pass::Metadata | Pass::All) {
            out.push(self.populate_metadata(dataset, portion, layout)?);
        }
        if matches!(pass, Pass::TimeSeries | Pass::All) {
            out.push(self.populate_time_series(dataset, portion, layout)?);
        }
        Ok(out)
    }
}
