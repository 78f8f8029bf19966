//! Recording loader.
//!
//! ```text
//! summary_<ds>.csv ──► RecordingSet (optional seeded subsample)
//!                          │  for each row, in fixed order
//!                          ├─ mat::load_val(<ds>/<id>.mat)   [n_src_leads, T]
//!                          ├─ select_leads()                  [n_selected, T]
//!                          └─ ResamplePlan::apply()           [n_selected, T']
//! ```
//!
//! Output is **lead-major** `[lead, sample]`.  The query layer returns the
//! transpose, see [`Store::ecg`](crate::store::Store::ecg).
use anyhow::{bail, Context, Result};
use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{DataLayout, StoreConfig};
use crate::header::Sex;
use crate::mat::load_val;
use crate::resample::ResamplePlan;
use crate::summary::{load_summary, SummaryRow};

/// Metadata of one recording, as stored in the patients table.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingMeta {
    pub id:          String,
    pub labels:      Vec<String>,
    pub age:         Option<f64>,
    pub sex:         Option<Sex>,
    /// Canonical 12-lead order.
    pub baselines:   Vec<f64>,
    /// Canonical 12-lead order.
    pub adcs:        Vec<f64>,
    /// Sample count **after** resampling to the target rate.
    pub num_samples: usize,
    /// Lead count declared by the header.
    pub num_leads:   usize,
    /// Seconds, at the source rate.
    pub duration:    f64,
    /// Source sampling frequency.
    pub sfreq:       f64,
}

/// A loaded recording: metadata plus `[n_selected_leads, n_samples]` data.
#[derive(Debug, Clone)]
pub struct Recording {
    pub meta: RecordingMeta,
    pub ecg:  Array2<i32>,
}

/// Copy the rows of `raw` named by `selected` into a new matrix.
///
/// Source rows are taken to be in canonical lead order.  Output row `i`
/// holds the source row of `selected[i]`; names outside the canonical set,
/// or beyond the rows present in `raw`, give an all-zero row.
pub fn select_leads(raw: &Array2<i32>, selected: &[String], cfg: &StoreConfig) -> Array2<i32> {
    let mut out = Array2::<i32>::zeros((selected.len(), raw.ncols()));
    for (i, lead) in selected.iter().enumerate() {
        if let Some(j) = cfg.lead_index(lead).filter(|&j| j < raw.nrows()) {
            out.row_mut(i).assign(&raw.row(j));
        }
    }
    out
}

/// Load `path` and pick `selected` leads, at the source rate.
pub fn get_recording(path: &Path, selected: &[String], cfg: &StoreConfig) -> Result<Array2<i32>> {
    let raw = load_val(path)?;
    Ok(select_leads(&raw, selected, cfg))
}

// ── Subsampling ───────────────────────────────────────────────────────────

/// How much of a dataset to use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Portion {
    All,
    /// Share of the rows, `0 < f < 1`; `round(f · n)` rows are drawn.
    Fraction(f64),
    /// Absolute number of rows, clamped to the dataset size.
    Count(usize),
}

impl Portion {
    /// `1` → all, below `1` → fraction, above `1` → count.
    ///
    /// Counts must be whole numbers.
    pub fn from_value(v: f64) -> Result<Self> {
        if !(v > 0.0) || !v.is_finite() {
            bail!("dataset portion must be positive, got {v}");
        }
        Ok(if v == 1.0 {
            Portion::All
        } else if v < 1.0 {
            Portion::Fraction(v)
        } else if v.fract() == 0.0 {
            Portion::Count(v as usize)
        } else {
            bail!("dataset portion above 1 must be a whole count, got {v}");
        })
    }

    /// Row indices to visit, in visiting order.
    ///
    /// `All` keeps file order.  The other variants draw without replacement
    /// from a `StdRng` seeded with `seed`, so the same seed and input give the
    /// same rows in the same order.
    pub fn indices(self, len: usize, seed: u64) -> Vec<usize> {
        let amount = match self {
            Portion::All => return (0..len).collect(),
            Portion::Fraction(f) => ((f * len as f64).round() as usize).min(len),
            Portion::Count(n) => n.min(len),
        };
        let mut rng = StdRng::seed_from_u64(seed);
        rand::seq::index::sample(&mut rng, len, amount).into_vec()
    }
}

impl FromStr for Portion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let v: f64 = s.trim().parse().with_context(|| format!("bad portion {s:?}"))?;
        Portion::from_value(v)
    }
}

// ── Dataset iterator ──────────────────────────────────────────────────────

/// The recordings of one dataset, read through its summary.
pub struct RecordingSet<'a> {
    pub dataset:     String,
    dataset_dir:     PathBuf,
    selected_leads:  Vec<String>,
    rows:            Vec<SummaryRow>,
    cfg:             &'a StoreConfig,
}

impl<'a> RecordingSet<'a> {
    /// Open the summary of `dataset` and apply `portion`.
    ///
    /// Fails with [`EcgDbError::MissingSummary`](crate::EcgDbError) when the
    /// summary has not been built.
    pub fn open(
        dataset: &str,
        selected_leads: &[String],
        portion: Portion,
        layout: &DataLayout,
        cfg: &'a StoreConfig,
    ) -> Result<Self> {
        let all = load_summary(dataset, layout)?;
        let total = all.len();
        let mut slots: Vec<Option<SummaryRow>> = all.into_iter().map(Some).collect();
        let rows: Vec<SummaryRow> = portion
            .indices(total, cfg.random_seed)
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect();
        tracing::debug!("{dataset}: {} of {total} recordings selected", rows.len());
        Ok(Self {
            dataset: dataset.to_string(),
            dataset_dir: layout.dataset_dir(dataset),
            selected_leads: selected_leads.to_vec(),
            rows,
            cfg,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    pub fn payload_path(&self, id: &str) -> PathBuf {
        self.dataset_dir.join(format!("{id}.mat"))
    }

    /// Metadata of row `i` without touching the payload.
    pub fn meta(&self, i: usize) -> Result<RecordingMeta> {
        let row = self.row(i)?;
        let plan = ResamplePlan::for_rate(row.freq, self.cfg)
            .with_context(|| format!("recording {}", row.id))?;
        Ok(meta_from_row(row, plan.output_len(row.num_samples)))
    }

    /// Load, select and resample row `i`.
    pub fn get(&self, i: usize) -> Result<Recording> {
        let row = self.row(i)?;
        let path = self.payload_path(&row.id);
        let ecg = get_recording(&path, &self.selected_leads, self.cfg)?;
        let ecg = ResamplePlan::for_rate(row.freq, self.cfg)
            .and_then(|plan| plan.apply(&ecg))
            .with_context(|| format!("recording {}", row.id))?;
        let meta = meta_from_row(row, ecg.ncols());
        Ok(Recording { meta, ecg })
    }

    /// Recordings in visiting order.
    pub fn iter(&self) -> impl Iterator<Item = Result<Recording>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    fn row(&self, i: usize) -> Result<&SummaryRow> {
        self.rows
            .get(i)
            .with_context(|| format!("index {i} out of range for {} recordings", self.rows.len()))
    }
}

fn meta_from_row(row: &SummaryRow, num_samples: usize) -> RecordingMeta {
    RecordingMeta {
        id:          row.id.clone(),
        labels:      row.dx.clone(),
        age:         row.age,
        sex:         row.sex,
        baselines:   row.baselines.clone(),
        adcs:        row.adcs.clone(),
        num_samples,
        num_leads:   row.leads,
        duration:    row.duration,
        sfreq:       row.freq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leads(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn selected_rows_follow_request_order() {
        let cfg = StoreConfig::default();
        let raw = Array2::from_shape_fn((12, 4), |(c, t)| (c * 100 + t) as i32);
        let out = select_leads(&raw, &leads(&["V6", "I", "aVR"]), &cfg);
        assert_eq!(out.row(0).to_vec(), raw.row(11).to_vec());
        assert_eq!(out.row(1).to_vec(), raw.row(0).to_vec());
        assert_eq!(out.row(2).to_vec(), raw.row(3).to_vec());
    }

    #[test]
    fn unknown_or_absent_leads_are_zero() {
        let cfg = StoreConfig::default();
        let raw = Array2::from_elem((2, 5), 7);
        let out = select_leads(&raw, &leads(&["II", "X1", "V1"]), &cfg);
        assert!(out.row(0).iter().all(|&v| v == 7));
        assert!(out.row(1).iter().all(|&v| v == 0));
        assert!(out.row(2).iter().all(|&v| v == 0)); // V1 is row 6, raw has 2 rows
    }

    #[test]
    fn portion_from_value() {
        assert_eq!(Portion::from_value(1.0).unwrap(), Portion::All);
        assert_eq!(Portion::from_value(0.25).unwrap(), Portion::Fraction(0.25));
        assert_eq!(Portion::from_value(40.0).unwrap(), Portion::Count(40));
        assert!(Portion::from_value(0.0).is_err());
        assert!("-3".parse::<Portion>().is_err());
    }

    #[test]
    fn fractional_count_rejected() {
        assert!(Portion::from_value(1.5).is_err());
        assert!("40.2".parse::<Portion>().is_err());
        assert_eq!("40.0".parse::<Portion>().unwrap(), Portion::Count(40));
    }

    #[test]
    fn seeded_sampling_is_reproducible_without_replacement() {
        let a = Portion::Count(30).indices(100, 42);
        let b = Portion::Count(30).indices(100, 42);
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 30);
        assert!(sorted.iter().all(|&i| i < 100));
    }

    #[test]
    fn fraction_and_clamped_count() {
        assert_eq!(Portion::Fraction(0.1).indices(95, 42).len(), 10);
        assert_eq!(Portion::Count(500).indices(12, 42).len(), 12);
        assert_eq!(Portion::All.indices(4, 42), vec![0, 1, 2, 3]);
    }
}
