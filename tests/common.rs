//! Shared fixtures: a temporary data tree with headers, payloads and the
//! unscored-code list.
#![allow(dead_code)]

use ecgdb::{DataLayout, StoreConfig};
use ndarray::Array2;
use std::fmt::Write as _;
use std::path::Path;
use tempfile::TempDir;

/// Codes written to the fixture's unscored list.
pub const UNSCORED: [&str; 2] = ["164884008", "251120003"];

pub struct Fixture {
    pub dir:    TempDir,
    pub layout: DataLayout,
    pub cfg:    StoreConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout {
            datasets_dir:  dir.path().join("datasets"),
            summaries_dir: dir.path().join("summaries"),
            unscored_csv:  dir.path().join("unscored.csv"),
        };
        std::fs::create_dir_all(&layout.datasets_dir).unwrap();
        let mut csv = String::from("Dx,SNOMEDCTCode,Abbreviation\n");
        for code in UNSCORED {
            writeln!(csv, "\"some, finding\",{code},X").unwrap();
        }
        std::fs::write(&layout.unscored_csv, csv).unwrap();
        Self { dir, layout, cfg: StoreConfig::default() }
    }

    /// Write `<ds>/<id>.hea` and `<ds>/<id>.mat`; returns the raw matrix.
    ///
    /// Sample `t` of file lead `c` is `(c + 1) * 1000 + t % 1000`; the
    /// baseline of file lead `c` is `c` and its gain `500 * (c + 1)`.
    pub fn add_recording(&self, rec: &Rec<'_>) -> Array2<i32> {
        let dir = self.layout.dataset_dir(rec.dataset);
        std::fs::create_dir_all(&dir).unwrap();
        let data = Array2::from_shape_fn((rec.leads.len(), rec.n_samples), |(c, t)| {
            ((c + 1) * 1000 + t % 1000) as i32
        });
        std::fs::write(dir.join(format!("{}.hea", rec.id)), header_text(rec)).unwrap();
        write_mat4(&dir.join(format!("{}.mat", rec.id)), "val", &data);
        data
    }

    /// `n` 12-lead 500 Hz recordings `R0..R{n-1}` labelled sinus rhythm.
    pub fn add_sinus_dataset(&self, dataset: &str, n: usize, n_samples: usize) {
        for i in 0..n {
            let id = format!("R{i}");
            self.add_recording(&Rec { id: &id, dataset, n_samples, ..Rec::default() });
        }
    }
}

/// One fixture recording.
pub struct Rec<'a> {
    pub dataset:   &'a str,
    pub id:        &'a str,
    pub sfreq:     f64,
    pub n_samples: usize,
    pub leads:     Vec<&'a str>,
    pub age:       &'a str,
    pub sex:       &'a str,
    pub dx:        &'a str,
}

impl Default for Rec<'_> {
    fn default() -> Self {
        Self {
            dataset:   "WFDB_Ga",
            id:        "E00001",
            sfreq:     500.0,
            n_samples: 1000,
            leads:     ecgdb::config::TWELVE_LEADS.to_vec(),
            age:       "63",
            sex:       "Female",
            dx:        "426783006",
        }
    }
}

pub fn header_text(rec: &Rec<'_>) -> String {
    let mut s = format!("{} {} {} {}\n", rec.id, rec.leads.len(), rec.sfreq, rec.n_samples);
    for (c, lead) in rec.leads.iter().enumerate() {
        writeln!(s, "{}.mat 16+24 {}/mV 16 {c} 0 0 0 {lead}", rec.id, 500 * (c + 1)).unwrap();
    }
    writeln!(s, "#Age: {}", rec.age).unwrap();
    writeln!(s, "#Sex: {}", rec.sex).unwrap();
    writeln!(s, "#Dx: {}", rec.dx).unwrap();
    s.push_str("#Rx: Unknown\n#Hx: Unknown\n");
    s
}

/// Level 4 MAT file holding one little-endian int32 matrix.
pub fn write_mat4(path: &Path, name: &str, data: &Array2<i32>) {
    let mut out = Vec::new();
    let name_z = format!("{name}\0");
    for v in [20u32, data.nrows() as u32, data.ncols() as u32, 0, name_z.len() as u32] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(name_z.as_bytes());
    // column major
    for col in data.columns() {
        for v in col {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    std::fs::write(path, out).unwrap();
}
