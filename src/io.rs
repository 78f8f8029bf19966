//! Safetensors export of stored windows.
//!
//! [`export_cohort`] draws a random cohort, reads each patient's window and
//! writes one file:
//!
//! ```text
//! ecg_<i>       I32 [samples, leads]   sample-major, as returned by Store::ecg
//! patient_ids   I64 [n]
//! labels        F32 [n, n_codes]       multi-hot over the diagnosis dictionary
//! n_samples     I32 [1]                number of exported patients
//! ```
use anyhow::{bail, Context, Result};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::store::Store;

// ── Writer ────────────────────────────────────────────────────────────────

/// Safetensors file writer for `F32`, `I32` and `I64` tensors.
///
/// ```rust,no_run
/// use ecgdb::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_i32("ecg_0", &[1, 2, 3, 4], &[2, 2]);
/// w.add_i64("patient_ids", &[17], &[1]);
/// w.write(Path::new("/tmp/out.safetensors")).unwrap();
/// ```
#[derive(Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F32", shape.to_vec()));
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I32", shape.to_vec()));
    }

    pub fn add_i32_arr2(&mut self, name: &str, arr: &Array2<i32>) {
        let data: Vec<i32> = arr.iter().copied().collect();
        self.add_i32(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_i64(&mut self, name: &str, data: &[i64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I64", shape.to_vec()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut header_map = serde_json::Map::new();
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            header_map.insert(name.clone(), serde_json::json!({
                "dtype": dtype,
                "shape": shape,
                "data_offsets": [offset, offset + data.len()],
            }));
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let padded: Vec<u8> = hdr_bytes.into_iter()
            .chain(std::iter::repeat(b' ').take(pad))
            .collect();
        let mut f = std::fs::File::create(path)
            .with_context(|| format!("create {}", path.display()))?;
        f.write_all(&(padded.len() as u64).to_le_bytes())?;
        f.write_all(&padded)?;
        for (_, data, _, _) in &self.entries {
            f.write_all(data)?;
        }
        Ok(())
    }
}

// ── Reader ────────────────────────────────────────────────────────────────

/// Header entry of one tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    pub dtype:   String,
    pub shape:   Vec<usize>,
    /// Byte range relative to the start of the data section.
    pub offsets: (usize, usize),
}

/// A safetensors file held in memory.
pub struct StFile {
    bytes:       Vec<u8>,
    data_start:  usize,
    pub tensors: BTreeMap<String, TensorInfo>,
}

impl StFile {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        Self::parse(bytes)
    }

    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        let len_bytes: [u8; 8] = bytes
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .context("safetensors file too small")?;
        let n = u64::from_le_bytes(len_bytes) as usize;
        let hdr = bytes.get(8..8 + n).context("truncated safetensors header")?;
        let header: BTreeMap<String, serde_json::Value> =
            serde_json::from_slice(hdr).context("failed to parse safetensors header")?;

        let mut tensors = BTreeMap::new();
        for (name, entry) in header {
            if name == "__metadata__" {
                continue;
            }
            tensors.insert(name.clone(), tensor_info(&entry).with_context(|| format!("tensor {name}"))?);
        }
        Ok(Self { bytes, data_start: 8 + n, tensors })
    }

    fn raw(&self, name: &str, dtype: &str) -> Result<(&TensorInfo, &[u8])> {
        let info = self.tensors.get(name).with_context(|| format!("missing '{name}' tensor"))?;
        if info.dtype != dtype {
            bail!("tensor '{name}' is {}, expected {dtype}", info.dtype);
        }
        let (s, e) = info.offsets;
        let raw = self
            .bytes
            .get(self.data_start + s..self.data_start + e)
            .with_context(|| format!("tensor '{name}' out of bounds"))?;
        Ok((info, raw))
    }

    pub fn i32(&self, name: &str) -> Result<(Vec<usize>, Vec<i32>)> {
        let (info, raw) = self.raw(name, "I32")?;
        let v = raw.chunks_exact(4).map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect();
        Ok((info.shape.clone(), v))
    }

    pub fn i64(&self, name: &str) -> Result<(Vec<usize>, Vec<i64>)> {
        let (info, raw) = self.raw(name, "I64")?;
        let v = raw
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect();
        Ok((info.shape.clone(), v))
    }

    pub fn f32(&self, name: &str) -> Result<(Vec<usize>, Vec<f32>)> {
        let (info, raw) = self.raw(name, "F32")?;
        let v = raw.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect();
        Ok((info.shape.clone(), v))
    }
}

fn tensor_info(entry: &serde_json::Value) -> Result<TensorInfo> {
    let dtype = entry["dtype"].as_str().context("dtype")?.to_string();
    let shape = entry["shape"]
        .as_array()
        .context("shape")?
        .iter()
        .map(|v| v.as_u64().map(|x| x as usize).context("shape entry"))
        .collect::<Result<Vec<_>>>()?;
    let offsets = entry["data_offsets"].as_array().context("data_offsets")?;
    let s = offsets.first().and_then(|v| v.as_u64()).context("data_offsets[0]")? as usize;
    let e = offsets.get(1).and_then(|v| v.as_u64()).context("data_offsets[1]")? as usize;
    if e < s {
        bail!("data_offsets reversed");
    }
    Ok(TensorInfo { dtype, shape, offsets: (s, e) })
}

// ── Cohort export ─────────────────────────────────────────────────────────

/// What [`export_cohort`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub patient_ids: Vec<i64>,
    pub tensors:     usize,
}

/// Export `n` random patients (all when `None`) to `path`.
pub fn export_cohort(
    store: &Store,
    n: Option<usize>,
    leads: Option<&[usize]>,
    window: Option<f64>,
    path: &Path,
) -> Result<ExportSummary> {
    let dictionary = store.diagnosis_ids()?;
    let cohort = store.patients_with_diagnoses(n)?;
    let n_codes = dictionary.values().max().map_or(0, |&m| m as usize + 1);

    let mut w = StWriter::new();
    let mut labels = vec![0f32; cohort.len() * n_codes];
    let mut patient_ids = Vec::with_capacity(cohort.len());

    for (i, entry) in cohort.iter().enumerate() {
        let ecg = store.ecg(entry.patient_id, leads, window)?;
        w.add_i32_arr2(&format!("ecg_{i}"), &ecg);
        for code in entry.diagnoses.split(',') {
            if let Some(&j) = dictionary.get(code) {
                labels[i * n_codes + j as usize] = 1.0;
            }
        }
        patient_ids.push(entry.patient_id);
        tracing::debug!("exported patient {} ({} samples)", entry.patient_id, ecg.nrows());
    }

    w.add_i64("patient_ids", &patient_ids, &[patient_ids.len()]);
    w.add_f32("labels", &labels, &[cohort.len(), n_codes]);
    w.add_i32("n_samples", &[cohort.len() as i32], &[1]);
    w.write(path)?;

    tracing::info!("wrote {} patients to {}", patient_ids.len(), path.display());
    Ok(ExportSummary { patient_ids, tensors: w.len() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_offsets_and_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.safetensors");
        let mut w = StWriter::new();
        w.add_i32("a", &[1, -2, 3], &[3]);
        w.add_i64("b", &[i64::MIN], &[1]);
        w.write(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let n = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
        assert_eq!(n % 8, 0);
        let header: serde_json::Value = serde_json::from_slice(&bytes[8..8 + n]).unwrap();
        assert_eq!(header["a"]["data_offsets"], serde_json::json!([0, 12]));
        assert_eq!(header["b"]["dtype"], "I64");
        assert_eq!(bytes.len(), 8 + n + 20);
    }

    #[test]
    fn reader_checks_dtype() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.safetensors");
        let mut w = StWriter::new();
        w.add_i32_arr2("m", &Array2::from_shape_vec((2, 2), vec![1, 2, 3, 4]).unwrap());
        w.write(&path).unwrap();

        let f = StFile::load(&path).unwrap();
        assert_eq!(f.i32("m").unwrap(), (vec![2, 2], vec![1, 2, 3, 4]));
        assert!(f.f32("m").is_err());
        assert!(f.i32("missing").is_err());
    }

    #[test]
    fn truncated_file_rejected() {
        assert!(StFile::parse(vec![1, 2, 3]).is_err());
        assert!(StFile::parse(vec![200, 0, 0, 0, 0, 0, 0, 0, b'{']).is_err());
    }
}
