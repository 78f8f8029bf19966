//! Per-dataset summary artifacts.
//!
//! ```text
//! datasets/<ds>/**/*.hea ──parse──► normalise labels ──► summary_<ds>.csv
//!                                        │
//!                                        └─ only unscored? ──► unscored_summary.txt
//! ```
//!
//! The summary is the contract between header parsing and ingestion: the
//! loader and the ingestion pipeline read recordings exclusively through it.
//! Columns, in order:
//!
//! | column        | encoding                                   |
//! |---------------|--------------------------------------------|
//! | `id`          | recording id (payload is `<id>.mat`)       |
//! | `age`         | number, empty when missing                 |
//! | `sex`         | `0` / `1`, empty when missing              |
//! | `dx`          | list literal of normalised codes           |
//! | `freq`        | source sampling frequency, Hz              |
//! | `num_samples` | source sample count                        |
//! | `leads`       | number of leads in the header              |
//! | `duration`    | `num_samples / freq`, seconds              |
//! | `baselines`   | list literal, canonical 12-lead order      |
//! | `adcs`        | list literal, canonical 12-lead order      |
use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::{DataLayout, StoreConfig};
use crate::csv::{format_list, parse_f64_list, parse_list, write_record, CsvTable};
use crate::error::EcgDbError;
use crate::header::{load_header, Header, Sex};
use crate::labels::{normalize_labels, UnscoredSet};

pub const SUMMARY_COLUMNS: [&str; 10] = [
    "id", "age", "sex", "dx", "freq", "num_samples", "leads", "duration", "baselines", "adcs",
];

/// One retained recording.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub id:          String,
    pub age:         Option<f64>,
    pub sex:         Option<Sex>,
    pub dx:          Vec<String>,
    pub freq:        f64,
    pub num_samples: usize,
    pub leads:       usize,
    pub duration:    f64,
    pub baselines:   Vec<f64>,
    pub adcs:        Vec<f64>,
}

impl SummaryRow {
    /// Build a row from a parsed header and its already-normalised labels.
    pub fn from_header(header: &Header, labels: Vec<String>, cfg: &StoreConfig) -> Self {
        Self {
            id:          header.recording_id.clone(),
            age:         header.age,
            sex:         header.sex,
            dx:          labels,
            freq:        header.sfreq,
            num_samples: header.num_samples,
            leads:       header.num_leads(),
            duration:    header.duration_secs(),
            baselines:   header.baselines_for(&cfg.twelve_leads),
            adcs:        header.adc_gains_for(&cfg.twelve_leads),
        }
    }

    fn to_fields(&self) -> [String; 10] {
        let nums = |v: &[f64]| format_list(&v.iter().map(|x| fmt_f64(*x)).collect::<Vec<_>>());
        [
            self.id.clone(),
            self.age.map(fmt_f64).unwrap_or_default(),
            self.sex.map(|s| s.code().to_string()).unwrap_or_default(),
            format_list(&self.dx),
            fmt_f64(self.freq),
            self.num_samples.to_string(),
            self.leads.to_string(),
            fmt_f64(self.duration),
            nums(&self.baselines),
            nums(&self.adcs),
        ]
    }
}

/// `10.0` → `"10.0"`, keeping the decimal point on whole numbers.
fn fmt_f64(v: f64) -> String {
    format!("{v:?}")
}

/// Result of summarising one dataset.
#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub dataset:       String,
    pub rows:          Vec<SummaryRow>,
    /// Header files found under the dataset directory.
    pub total_headers: usize,
    /// Recordings dropped because every label was unscored.
    pub unscored_only: usize,
    /// Header files that could not be parsed.
    pub unreadable:    usize,
}

impl DatasetSummary {
    /// Line appended to `unscored_summary.txt`.
    pub fn report_line(&self) -> String {
        format!(
            "{} - Out of {} entries {} had only unscored labels and were removed.",
            self.dataset, self.total_headers, self.unscored_only
        )
    }
}

// ── Building ──────────────────────────────────────────────────────────────

/// Every `.hea` file below `dir`, sorted by path.
pub fn find_headers(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(d) = pending.pop() {
        for entry in fs::read_dir(&d).with_context(|| format!("list {}", d.display()))? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|e| e == "hea") {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Walk the headers of `dataset` and normalise their labels.
pub fn summarize_dataset(
    dataset: &str,
    layout: &DataLayout,
    unscored: &UnscoredSet,
    cfg: &StoreConfig,
) -> Result<DatasetSummary> {
    let headers = find_headers(&layout.dataset_dir(dataset))?;
    let mut summary = DatasetSummary {
        dataset: dataset.to_string(),
        rows: Vec::with_capacity(headers.len()),
        total_headers: headers.len(),
        unscored_only: 0,
        unreadable: 0,
    };

    for path in &headers {
        let header = match load_header(path) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!("skipping {}: {e:#}", path.display());
                summary.unreadable += 1;
                continue;
            }
        };
        let labels = normalize_labels(&header.dx, unscored, cfg);
        if labels.is_empty() {
            summary.unscored_only += 1;
            continue;
        }
        summary.rows.push(SummaryRow::from_header(&header, labels, cfg));
    }

    tracing::info!(
        "{dataset}: {} of {} recordings kept, {} unscored-only",
        summary.rows.len(),
        summary.total_headers,
        summary.unscored_only
    );
    Ok(summary)
}

/// Write `rows` as a summary CSV.
pub fn write_summary(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    write_record(&mut w, &SUMMARY_COLUMNS)?;
    for row in rows {
        write_record(&mut w, &row.to_fields())?;
    }
    w.flush()?;
    Ok(())
}

/// Append the unscored-only count of `summary` to the running report.
pub fn append_unscored_report(path: &Path, summary: &DatasetSummary) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    writeln!(f, "{}", summary.report_line())?;
    Ok(())
}

/// Build, write and report summaries for every dataset in `datasets`.
pub fn prepare_summaries(
    datasets: &[String],
    layout: &DataLayout,
    cfg: &StoreConfig,
) -> Result<Vec<DatasetSummary>> {
    fs::create_dir_all(&layout.summaries_dir)
        .with_context(|| format!("create {}", layout.summaries_dir.display()))?;
    let unscored = UnscoredSet::load(&layout.unscored_csv, cfg)?;

    let mut out = Vec::with_capacity(datasets.len());
    for ds in datasets {
        let summary = summarize_dataset(ds, layout, &unscored, cfg)?;
        write_summary(&layout.summary_path(ds), &summary.rows)?;
        append_unscored_report(&layout.unscored_report_path(), &summary)?;
        out.push(summary);
    }
    Ok(out)
}

// ── Reading ───────────────────────────────────────────────────────────────

/// Read the summary of `dataset`.
///
/// A missing file is reported as [`EcgDbError::MissingSummary`].
pub fn load_summary(dataset: &str, layout: &DataLayout) -> Result<Vec<SummaryRow>> {
    let path = layout.summary_path(dataset);
    if !path.is_file() {
        return Err(EcgDbError::MissingSummary { dataset: dataset.to_string(), path }.into());
    }
    read_summary(&path)
}

/// Parse a summary CSV.  Columns are located by name, so an extra leading
/// index column is tolerated.
pub fn read_summary(path: &Path) -> Result<Vec<SummaryRow>> {
    let table = CsvTable::read(path)?;
    let mut idx = [0usize; 10];
    for (slot, name) in idx.iter_mut().zip(SUMMARY_COLUMNS) {
        *slot = table
            .column_index(name)
            .with_context(|| format!("{} has no '{name}' column", path.display()))?;
    }

    table
        .rows
        .iter()
        .enumerate()
        .map(|(i, r)| {
            parse_row(r, &idx).with_context(|| format!("{} row {}", path.display(), i + 1))
        })
        .collect()
}

fn parse_row(r: &[String], idx: &[usize; 10]) -> Result<SummaryRow> {
    let field = |i: usize| r.get(idx[i]).map(|s| s.trim()).unwrap_or_default();
    Ok(SummaryRow {
        id:          field(0).to_string(),
        age:         optional_f64(field(1))?,
        sex:         optional_f64(field(2))?.and_then(|v| Sex::from_code(v as i64)),
        dx:          parse_list(field(3))?,
        freq:        field(4).parse().context("freq")?,
        num_samples: parse_count(field(5)).context("num_samples")?,
        leads:       parse_count(field(6)).context("leads")?,
        duration:    field(7).parse().context("duration")?,
        baselines:   parse_f64_list(field(8))?,
        adcs:        parse_f64_list(field(9))?,
    })
}

fn optional_f64(s: &str) -> Result<Option<f64>> {
    if s.is_empty() || s.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let v: f64 = s.parse().with_context(|| format!("bad number {s:?}"))?;
    Ok((!v.is_nan()).then_some(v))
}

/// Integer column that may have been written as `5000.0`.
fn parse_count(s: &str) -> Result<usize> {
    if let Ok(n) = s.parse::<usize>() {
        return Ok(n);
    }
    let v: f64 = s.parse().with_context(|| format!("bad count {s:?}"))?;
    if v < 0.0 || v.fract() != 0.0 {
        bail!("bad count {s:?}");
    }
    Ok(v as usize)
}
