//! WFDB-style recording header parser.
//!
//! A header is line oriented:
//!
//! ```text
//! JS00001 12 500 5000                               ← id, n_leads, sfreq, n_samples
//! JS00001.mat 16+24 1000/mV 16 0 -254 21756 0 I     ← one line per lead
//! …                                                   (gain/units at [2],
//! JS00001.mat 16+24 1000/mV 16 0 -19 -22458 0 V6       baseline at [4],
//! #Age: 85                                             lead name last)
//! #Sex: Male
//! #Dx: 164889003,59118001,164934002
//! ```
//!
//! Signal-line fields that fail to parse are left at `0.0`; tagged lines that
//! fail to parse are skipped.  Only the record line is mandatory.
use anyhow::{bail, Context, Result};
use std::path::Path;

/// Tag of the diagnosis line.
pub const DX_TAG: &str = "#Dx";

/// Encoded sex: `0` female, `1` male.  Anything else is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Female = 0,
    Male = 1,
}

impl Sex {
    /// Map the free-text header value onto the encoding.
    pub fn parse(text: &str) -> Option<Sex> {
        match text.trim() {
            "Female" | "female" | "F" | "f" => Some(Sex::Female),
            "Male" | "male" | "M" | "m" => Some(Sex::Male),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Sex> {
        match code {
            0 => Some(Sex::Female),
            1 => Some(Sex::Male),
            _ => None,
        }
    }
}

/// Everything the pipeline needs from one header.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub recording_id: String,
    pub sfreq:        f64,
    pub num_samples:  usize,
    /// Lead names in file order.
    pub leads:        Vec<String>,
    /// ADC gain per lead, file order.
    pub adc_gains:    Vec<f64>,
    /// ADC zero (baseline) per lead, file order.
    pub baselines:    Vec<f64>,
    pub age:          Option<f64>,
    pub sex:          Option<Sex>,
    /// Raw `#Dx` entries, trimmed, possibly containing empty strings.
    pub dx:           Vec<String>,
}

impl Header {
    pub fn num_leads(&self) -> usize {
        self.leads.len()
    }

    /// Recording length in seconds at the source rate.
    pub fn duration_secs(&self) -> f64 {
        self.num_samples as f64 / self.sfreq
    }

    /// Baselines reordered onto `canonical`; leads absent from the header are `0.0`.
    pub fn baselines_for(&self, canonical: &[String]) -> Vec<f64> {
        self.reorder(&self.baselines, canonical)
    }

    /// ADC gains reordered onto `canonical`; leads absent from the header are `0.0`.
    pub fn adc_gains_for(&self, canonical: &[String]) -> Vec<f64> {
        self.reorder(&self.adc_gains, canonical)
    }

    fn reorder(&self, values: &[f64], canonical: &[String]) -> Vec<f64> {
        canonical
            .iter()
            .map(|lead| {
                self.leads
                    .iter()
                    .position(|l| l == lead)
                    .map_or(0.0, |i| values[i])
            })
            .collect()
    }
}

/// Read and parse a `.hea` file.
pub fn load_header(path: &Path) -> Result<Header> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read header {}", path.display()))?;
    parse_header(&text).with_context(|| format!("parse header {}", path.display()))
}

/// Parse header text.
pub fn parse_header(text: &str) -> Result<Header> {
    let mut lines = text.lines();
    let record = lines.next().context("empty header")?;
    let fields: Vec<&str> = record.split_whitespace().collect();
    if fields.len() < 4 {
        bail!("record line has {} fields, expected at least 4: {record:?}", fields.len());
    }
    let recording_id = fields[0].to_string();
    let n_leads: usize = fields[1]
        .parse()
        .with_context(|| format!("lead count {:?}", fields[1]))?;
    // Frequency may carry a counter frequency suffix: `500/1000`.
    let sfreq: f64 = fields[2]
        .split('/')
        .next()
        .unwrap_or_default()
        .parse()
        .with_context(|| format!("sampling frequency {:?}", fields[2]))?;
    let num_samples: usize = fields[3]
        .parse()
        .with_context(|| format!("sample count {:?}", fields[3]))?;

    let mut leads = Vec::with_capacity(n_leads);
    let mut adc_gains = Vec::with_capacity(n_leads);
    let mut baselines = Vec::with_capacity(n_leads);
    for line in lines.by_ref().take(n_leads) {
        let entries: Vec<&str> = line.split_whitespace().collect();
        leads.push(entries.last().map(|s| s.to_string()).unwrap_or_default());
        adc_gains.push(leading_number(entries.get(2).copied()));
        baselines.push(leading_number(entries.get(4).copied()));
    }

    Ok(Header {
        recording_id,
        sfreq,
        num_samples,
        leads,
        adc_gains,
        baselines,
        age: tagged_value(text, "#Age").and_then(|v| v.parse::<f64>().ok()).filter(|a| !a.is_nan()),
        sex: tagged_value(text, "#Sex").and_then(Sex::parse),
        dx: tagged_values(text, DX_TAG),
    })
}

/// `"1000/mV"` → `1000.0`; `"-254"` → `-254.0`; anything unparsable → `0.0`.
fn leading_number(field: Option<&str>) -> f64 {
    field
        .and_then(|f| f.split('/').next())
        .and_then(|f| f.split('(').next())
        .and_then(|f| f.parse().ok())
        .unwrap_or(0.0)
}

/// Value of the first `#Tag: value` line.
fn tagged_value<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    text.lines()
        .filter(|l| l.starts_with(tag))
        .find_map(|l| l.split_once(": ").map(|(_, v)| v.trim()))
}

/// Comma-separated entries of every `#Tag: a,b,c` line, trimmed.
///
/// A tagged line without the `": "` separator contributes nothing.
pub fn tagged_values(text: &str, tag: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.lines().filter(|l| l.starts_with(tag)) {
        if let Some((_, rest)) = line.split_once(": ") {
            out.extend(rest.split(',').map(|e| e.trim().to_string()));
        }
    }
    out
}
