//! Typed failure conditions.
//!
//! Everything else in the crate travels as [`anyhow::Error`] with context
//! attached.  The variants below are the conditions a caller is expected to
//! branch on, so they are raised as `EcgDbError` and can be recovered with
//! `err.downcast_ref::<EcgDbError>()`.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EcgDbError {
    /// `summary_<dataset>.csv` has not been built yet.
    #[error("{dataset} csv summary not found at {}; run ecgdb-summarize first", path.display())]
    MissingSummary { dataset: String, path: PathBuf },

    /// Source rate is neither the target rate nor an integer multiple of it,
    /// and the FFT fallback is disabled.
    #[error("unsupported sampling frequency {sfreq} Hz (target {target} Hz)")]
    UnsupportedSampleRate { sfreq: f64, target: f64 },

    #[error("patient {0} not found")]
    PatientNotFound(i64),

    #[error("dataset '{0}' is not in the dataset dictionary")]
    UnknownDataset(String),

    /// Lead numbers are 1-based positions in the canonical 12-lead order.
    #[error("lead {0} out of range 1..=12")]
    InvalidLead(usize),

    /// The time-series pass ran before the metadata pass for this recording.
    #[error("recording '{original_id}' of {dataset} has no patient row; run the metadata pass first")]
    PatientNotIngested { dataset: String, original_id: String },

    #[error("unsupported MAT data type {0}")]
    UnknownDataType(u32),
}
