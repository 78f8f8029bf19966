//! # ecgdb — 12-lead ECG datasets in a single SQLite file
//!
//! `ecgdb` turns PhysioNet-style ECG datasets (WFDB header + MATLAB payload
//! per recording) into one normalised SQLite store and reads cohorts,
//! covariates and sample windows back out of it.
//!
//! ## Pipeline overview
//!
//! ```text
//! datasets/<ds>/*.hea
//!   │
//!   ├─ header::load_header()        id, age, sex, Dx codes, rate, calibration
//!   ├─ labels::normalize_labels()   drop empty → drop unscored → collapse equivalents
//!   └─ summary::prepare_summaries() summary_<ds>.csv + unscored_summary.txt
//!        │
//! datasets/<ds>/*.mat               (one matrix `val`, [leads, samples])
//!   │
//!   ├─ loader::RecordingSet         summary rows, optional seeded subsample
//!   ├─ loader::select_leads()       canonical 12-lead order, zero rows for absent leads
//!   └─ resample::ResamplePlan       decimate to 250 Hz
//!        │
//!        ▼
//! store::Store ── metadata pass ──► patients, diagnoses
//!              └─ time-series pass ► ecg_samples (4-byte LE blobs)
//!        │
//!        ▼
//! query: patients_with_diagnoses · single_patient · covariates · ecg [samples, leads]
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use ecgdb::{prepare_summaries, DataLayout, Pass, Portion, Store, StoreConfig};
//! use std::path::Path;
//!
//! let cfg    = StoreConfig::default();
//! let layout = DataLayout::default();
//!
//! // 1. Header summaries (once per dataset)
//! prepare_summaries(&["WFDB_Ga".to_string()], &layout, &cfg).unwrap();
//!
//! // 2. Store with dictionaries
//! let mut store = Store::create(Path::new("ecg.db"), &cfg).unwrap();
//!
//! // 3. Both ingestion passes on a 10 % subsample
//! store.ingest("WFDB_Ga", Portion::Fraction(0.1), &layout, Pass::All).unwrap();
//!
//! // 4. Read back
//! for entry in store.patients_with_diagnoses(Some(4)).unwrap() {
//!     let ecg = store.ecg(entry.patient_id, Some(&[1, 2]), Some(5.0)).unwrap();
//!     println!("{} {} {:?}", entry.patient_id, entry.diagnoses, ecg.dim()); // (1250, 2)
//! }
//! ```

pub mod config;
pub mod csv;
pub mod error;
pub mod header;
pub mod ingest;
pub mod io;
pub mod labels;
pub mod loader;
pub mod mat;
pub mod query;
pub mod resample;
pub mod store;
pub mod summary;

// ── Crate-root re-exports ─────────────────────────────────────────────────

// config
pub use config::{load_config, parse_config, DataLayout, ResampleFallback, StoreConfig};

// error
pub use error::EcgDbError;

// header + labels
pub use header::{load_header, parse_header, Header, Sex};
pub use labels::{normalize_labels, UnscoredSet};

// summary
pub use summary::{load_summary, prepare_summaries, DatasetSummary, SummaryRow};

// loader + resample
pub use loader::{select_leads, Portion, Recording, RecordingMeta, RecordingSet};
pub use mat::load_val;
pub use resample::{resample_to_target, ResamplePlan};

// store, ingestion, queries
pub use ingest::{IngestReport, Pass};
pub use query::{decode_sample, CohortEntry, Covariates, PatientDiagnoses};
pub use store::{Store, TableInfo};

// io
pub use io::{export_cohort, StFile, StWriter};
