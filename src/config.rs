//! Store configuration.
//!
//! [`StoreConfig`] carries every constant the pipeline depends on: canonical
//! lead order, canonical label list, dataset list, target sampling rate and
//! the same-diagnosis equivalence map.  It is built once and passed by
//! reference into every component; nothing in the crate reads process-wide
//! state.
//!
//! [`DataLayout`] says where the raw datasets, the summary artifacts and the
//! unscored-code list live on disk.
//!
//! Both can be overridden from a TOML file where every key is optional:
//!
//! ```toml
//! target_sfreq = 250.0
//! resample_fallback = "fft"
//!
//! [layout]
//! datasets_dir  = "data/datasets"
//! summaries_dir = "data/csv_summaries"
//! unscored_csv  = "data/unscored.csv"
//! ```
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Canonical 12-lead order.  Column `leadN` of the store holds entry `N-1`.
pub const TWELVE_LEADS: [&str; 12] = [
    "I", "II", "III", "aVR", "aVL", "aVF", "V1", "V2", "V3", "V4", "V5", "V6",
];

/// Scored diagnosis codes.  The diagnosis dictionary id of a code is its
/// index in this list, so the order must never change.
pub const ALL_LABELS: [&str; 26] = [
    "10370003", "111975006", "164889003", "164890007", "164917005", "164934002",
    "164947007", "251146004", "270492004", "284470004", "365413008", "39732003",
    "426177001", "426627000", "426783006", "427084000", "427172004", "427393009",
    "445118002", "47665007", "59931005", "6374002", "698252002", "713426002",
    "713427006", "733534002",
];

/// Datasets in dictionary order.
pub const ALL_DATASETS: [&str; 7] = [
    "WFDB_ChapmanShaoxing",
    "WFDB_CPSC2018",
    "WFDB_CPSC2018_2",
    "WFDB_Ga",
    "WFDB_PTB",
    "WFDB_PTBXL",
    "WFDB_Ningbo",
];

/// Codes that share a diagnosis with a scored code, mapped onto the scored one.
pub const SAME_DIAGNOSIS: [(&str, &str); 4] = [
    ("164909002", "733534002"),
    ("59118001", "713427006"),
    ("63593006", "284470004"),
    ("17338001", "427172004"),
];

/// Ningbo codes missing from both official scored and unscored lists.
pub const EXTRA_UNSCORED: [i64; 3] = [251238007, 251211000, 6180003];

/// What to do with a source rate that is not an integer multiple of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleFallback {
    /// Fail with [`EcgDbError::UnsupportedSampleRate`](crate::EcgDbError).
    #[default]
    Reject,
    /// FFT rational resampling, rounded back to integer samples.
    Fft,
}

/// Configuration shared by every component.
///
/// Construct with struct-update syntax to change a single knob:
///
/// ```
/// use ecgdb::StoreConfig;
///
/// let cfg = StoreConfig {
///     target_sfreq: 500.0,
///     ..StoreConfig::default()
/// };
/// assert_eq!(cfg.samples_per_second(), 500);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Canonical lead names, in storage column order.
    pub twelve_leads: Vec<String>,

    /// Canonical diagnosis codes; dictionary id = position.  Only seeds a
    /// new store, an existing file keeps its stored dictionary.
    pub all_labels: Vec<String>,

    /// Dataset names; dictionary id = position when a store is created.
    pub all_datasets: Vec<String>,

    /// Canonical sampling rate of every stored series, in Hz.
    ///
    /// Default: `250.0`.
    pub target_sfreq: f64,

    /// Equivalence map applied as the last label normalisation step.
    pub same_diagnosis: BTreeMap<String, String>,

    /// Codes appended to the unscored list read from disk.
    pub extra_unscored: Vec<i64>,

    /// SQLite page size, set before the first table is created.
    ///
    /// Default: `16384`.
    pub page_size: u32,

    /// Seed for dataset subsampling.
    ///
    /// Default: `42`.
    pub random_seed: u64,

    /// Behaviour for source rates that cannot be decimated.
    pub resample_fallback: ResampleFallback,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            twelve_leads: TWELVE_LEADS.iter().map(|s| s.to_string()).collect(),
            all_labels: ALL_LABELS.iter().map(|s| s.to_string()).collect(),
            all_datasets: ALL_DATASETS.iter().map(|s| s.to_string()).collect(),
            target_sfreq: 250.0,
            same_diagnosis: SAME_DIAGNOSIS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            extra_unscored: EXTRA_UNSCORED.to_vec(),
            page_size: 16384,
            random_seed: 42,
            resample_fallback: ResampleFallback::Reject,
        }
    }
}

impl StoreConfig {
    /// Rows per second of stored series, i.e. `target_sfreq` as an integer.
    pub fn samples_per_second(&self) -> usize {
        self.target_sfreq.round() as usize
    }

    /// Number of rows covering `seconds` of signal: `floor(seconds × rate)`.
    pub fn window_samples(&self, seconds: f64) -> usize {
        (seconds * self.target_sfreq) as usize
    }

    /// Index of a lead name in the canonical order.
    pub fn lead_index(&self, lead: &str) -> Option<usize> {
        self.twelve_leads.iter().position(|l| l == lead)
    }
}

/// On-disk locations of the inputs.
#[derive(Debug, Clone)]
pub struct DataLayout {
    /// One sub-directory per dataset holding `.hea` headers and `.mat` payloads.
    pub datasets_dir: PathBuf,
    /// `summary_<dataset>.csv` files and `unscored_summary.txt`.
    pub summaries_dir: PathBuf,
    /// Official unscored-code list with a `SNOMEDCTCode` column.
    pub unscored_csv: PathBuf,
}

impl Default for DataLayout {
    fn default() -> Self {
        Self {
            datasets_dir: PathBuf::from("data_access/datasets"),
            summaries_dir: PathBuf::from("csv_summaries"),
            unscored_csv: PathBuf::from("data_access/unscored.csv"),
        }
    }
}

impl DataLayout {
    pub fn dataset_dir(&self, dataset: &str) -> PathBuf {
        self.datasets_dir.join(dataset)
    }

    pub fn summary_path(&self, dataset: &str) -> PathBuf {
        self.summaries_dir.join(format!("summary_{dataset}.csv"))
    }

    pub fn unscored_report_path(&self) -> PathBuf {
        self.summaries_dir.join("unscored_summary.txt")
    }
}

// ── TOML overrides ────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    twelve_leads: Option<Vec<String>>,
    all_labels: Option<Vec<String>>,
    all_datasets: Option<Vec<String>>,
    target_sfreq: Option<f64>,
    same_diagnosis: Option<BTreeMap<String, String>>,
    extra_unscored: Option<Vec<i64>>,
    page_size: Option<u32>,
    random_seed: Option<u64>,
    resample_fallback: Option<ResampleFallback>,
    #[serde(default)]
    layout: LayoutFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayoutFile {
    datasets_dir: Option<PathBuf>,
    summaries_dir: Option<PathBuf>,
    unscored_csv: Option<PathBuf>,
}

/// Parse a TOML document, filling every missing key from the defaults.
pub fn parse_config(text: &str) -> Result<(StoreConfig, DataLayout)> {
    let file: ConfigFile = toml::from_str(text).context("failed to parse config TOML")?;
    let d = StoreConfig::default();
    let cfg = StoreConfig {
        twelve_leads: file.twelve_leads.unwrap_or(d.twelve_leads),
        all_labels: file.all_labels.unwrap_or(d.all_labels),
        all_datasets: file.all_datasets.unwrap_or(d.all_datasets),
        target_sfreq: file.target_sfreq.unwrap_or(d.target_sfreq),
        same_diagnosis: file.same_diagnosis.unwrap_or(d.same_diagnosis),
        extra_unscored: file.extra_unscored.unwrap_or(d.extra_unscored),
        page_size: file.page_size.unwrap_or(d.page_size),
        random_seed: file.random_seed.unwrap_or(d.random_seed),
        resample_fallback: file.resample_fallback.unwrap_or(d.resample_fallback),
    };
    let l = DataLayout::default();
    let layout = DataLayout {
        datasets_dir: file.layout.datasets_dir.unwrap_or(l.datasets_dir),
        summaries_dir: file.layout.summaries_dir.unwrap_or(l.summaries_dir),
        unscored_csv: file.layout.unscored_csv.unwrap_or(l.unscored_csv),
    };
    Ok((cfg, layout))
}

/// Load the configuration from `path`, or the defaults when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<(StoreConfig, DataLayout)> {
    match path {
        None => Ok((StoreConfig::default(), DataLayout::default())),
        Some(p) => {
            tracing::debug!("reading config from {}", p.display());
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("read config {}", p.display()))?;
            let out = parse_config(&text)?;
            tracing::info!("loaded config from {}", p.display());
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_samples_at_250() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.window_samples(1.0), 250);
        assert_eq!(cfg.window_samples(2.5), 625);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let (cfg, layout) = parse_config(
            "resample_fallback = \"fft\"\n[layout]\nsummaries_dir = \"/tmp/s\"\n",
        )
        .unwrap();
        assert_eq!(cfg.resample_fallback, ResampleFallback::Fft);
        assert_eq!(cfg.target_sfreq, 250.0);
        assert_eq!(cfg.all_labels.len(), 26);
        assert_eq!(layout.summaries_dir, PathBuf::from("/tmp/s"));
        assert_eq!(layout.unscored_csv, PathBuf::from("data_access/unscored.csv"));
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(parse_config("target_rate = 250").is_err());
    }
}
