//! Read side of the store.
//!
//! ```text
//! patients_with_diagnoses(n) → [(patient_id, "code,code")]   random order per call
//! single_patient(id)         → (original_id, "code,code")
//! covariates(ids)            → [(age, sex)]                  input order
//! ecg(id, leads, window)     → [samples, leads]              sample-major
//! ```
//!
//! `ecg` returns the transpose of the loader's `[leads, samples]` layout.
use anyhow::{bail, Context, Result};
use ndarray::Array2;
use rusqlite::types::ValueRef;
use rusqlite::{params, OptionalExtension};

use crate::error::EcgDbError;
use crate::header::Sex;
use crate::store::{Store, NUM_LEADS};

/// One row of a cohort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortEntry {
    pub patient_id: i64,
    /// Comma-joined diagnosis codes.
    pub diagnoses:  String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientDiagnoses {
    pub original_id: String,
    /// Comma-joined diagnosis codes, empty when the patient has none.
    pub diagnoses:   String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Covariates {
    pub patient_id: i64,
    pub age:        Option<i64>,
    pub sex:        Option<Sex>,
}

impl Store {
    /// Random cohort of patients that have at least one diagnosis.
    ///
    /// `n = None` returns every such patient.  The order is re-randomised on
    /// every call; a limit above the patient count is not an error.
    pub fn patients_with_diagnoses(&self, n: Option<usize>) -> Result<Vec<CohortEntry>> {
        let limit = n.map_or(-1, |n| n as i64);
        let mut stmt = self.connection().prepare_cached(
            "SELECT p.patient_id, GROUP_CONCAT(d.dx_code, ',') \
             FROM patients AS p \
             INNER JOIN diagnoses AS pd ON p.patient_id = pd.patient_id \
             INNER JOIN diagnosis_dictionary AS d ON pd.diagnosis_id = d.diagnosis_id \
             GROUP BY p.patient_id \
             ORDER BY RANDOM() \
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |r| {
                Ok(CohortEntry { patient_id: r.get(0)?, diagnoses: r.get(1)? })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Original id and diagnoses of one patient.
    pub fn single_patient(&self, patient_id: i64) -> Result<PatientDiagnoses> {
        self.connection()
            .prepare_cached(
                "SELECT p.original_id, COALESCE(GROUP_CONCAT(d.dx_code, ','), '') \
                 FROM patients AS p \
                 LEFT JOIN diagnoses AS pd ON p.patient_id = pd.patient_id \
                 LEFT JOIN diagnosis_dictionary AS d ON pd.diagnosis_id = d.diagnosis_id \
                 WHERE p.patient_id = ?1 \
                 GROUP BY p.patient_id",
            )?
            .query_row(params![patient_id], |r| {
                Ok(PatientDiagnoses { original_id: r.get(0)?, diagnoses: r.get(1)? })
            })
            .optional()?
            .ok_or_else(|| EcgDbError::PatientNotFound(patient_id).into())
    }

    /// Age and sex of each id, in the order given.
    pub fn covariates(&self, patient_ids: &[i64]) -> Result<Vec<Covariates>> {
        let mut stmt = self
            .connection()
            .prepare_cached("SELECT age, sex FROM patients WHERE patient_id = ?1")?;
        patient_ids
            .iter()
            .map(|&patient_id| -> Result<Covariates> {
                let (age, sex): (Option<i64>, Option<i64>) = stmt
                    .query_row(params![patient_id], |r| Ok((r.get(0)?, r.get(1)?)))
                    .optional()?
                    .ok_or(EcgDbError::PatientNotFound(patient_id))?;
                Ok(Covariates { patient_id, age, sex: sex.and_then(Sex::from_code) })
            })
            .collect()
    }

    /// Stored samples of one patient as `[samples, leads]`.
    ///
    /// `leads` are 1-based positions in the canonical order, default
    /// `1..=12`.  `window` keeps the first `floor(window × rate)` samples.
    pub fn ecg(&self, patient_id: i64, leads: Option<&[usize]>, window: Option<f64>) -> Result<Array2<i32>> {
        let leads: Vec<usize> = match leads {
            Some(l) => l.to_vec(),
            None => (1..=NUM_LEADS).collect(),
        };
        if leads.is_empty() {
            bail!("no leads requested");
        }
        if let Some(&bad) = leads.iter().find(|&&l| l == 0 || l > NUM_LEADS) {
            return Err(EcgDbError::InvalidLead(bad).into());
        }

        let exists = self
            .connection()
            .prepare_cached("SELECT 1 FROM patients WHERE patient_id = ?1")?
            .exists(params![patient_id])?;
        if !exists {
            return Err(EcgDbError::PatientNotFound(patient_id).into());
        }

        let columns: Vec<String> = leads.iter().map(|l| format!("lead{l}")).collect();
        let sql = format!(
            "SELECT {} FROM ecg_samples WHERE patient_id = ?1 ORDER BY time_id LIMIT ?2",
            columns.join(", ")
        );
        let limit = window.map_or(-1, |w| self.config().window_samples(w) as i64);

        let mut stmt = self.connection().prepare_cached(&sql)?;
        let mut rows = stmt.query(params![patient_id, limit])?;
        let mut data = Vec::new();
        let mut n_rows = 0usize;
        while let Some(row) = rows.next()? {
            for j in 0..leads.len() {
                let v = decode_sample(row.get_ref(j)?)
                    .with_context(|| format!("patient {patient_id} sample {n_rows} lead{}", leads[j]))?;
                data.push(v);
            }
            n_rows += 1;
        }
        Ok(Array2::from_shape_vec((n_rows, leads.len()), data)?)
    }
}

// ── Sample codec ──────────────────────────────────────────────────────────

/// Little-endian two's-complement integer of 1 to 8 bytes.
pub fn decode_le_signed(bytes: &[u8]) -> Option<i64> {
    let last = *bytes.last()?;
    if bytes.len() > 8 {
        return None;
    }
    let mut buf = if last & 0x80 != 0 { [0xff; 8] } else { [0; 8] };
    buf[..bytes.len()].copy_from_slice(bytes);
    Some(i64::from_le_bytes(buf))
}

/// Decode one stored sample.  Native INTEGER values are accepted too.
pub fn decode_sample(value: ValueRef<'_>) -> Result<i32> {
    let wide = match value {
        ValueRef::Blob(b) => {
            decode_le_signed(b).with_context(|| format!("sample blob of {} bytes", b.len()))?
        }
        ValueRef::Integer(i) => i,
        ValueRef::Null => bail!("missing sample"),
        other => bail!("unexpected sample type {:?}", other.data_type()),
    };
    i32::try_from(wide).with_context(|| format!("sample {wide} out of i32 range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::loader::RecordingMeta;

    fn meta(id: &str, age: Option<f64>, sex: Option<Sex>) -> RecordingMeta {
        RecordingMeta {
            id: id.to_string(),
            labels: vec![],
            age,
            sex,
            baselines: vec![0.0; 12],
            adcs: vec![1000.0; 12],
            num_samples: 600,
            num_leads: 12,
            duration: 2.4,
            sfreq: 250.0,
        }
    }

    fn store_with_patients() -> (Store, Vec<i64>) {
        let mut s = Store::open_in_memory(&StoreConfig::default()).unwrap();
        s.setup_schema().unwrap();
        s.populate_dictionaries().unwrap();
        let a = s.insert_patient(0, &meta("A1", Some(54.0), Some(Sex::Male)), &[14, 1]).unwrap();
        let b = s.insert_patient(0, &meta("A2", None, Some(Sex::Female)), &[25]).unwrap();
        let c = s.insert_patient(4, &meta("S0001", Some(70.0), None), &[]).unwrap();
        let ecg = Array2::from_shape_fn((12, 600), |(l, t)| (l as i32 + 1) * 1000 - t as i32);
        s.insert_samples(a, &ecg).unwrap();
        (s, vec![a, b, c])
    }

    fn codes(s: &str) -> Vec<String> {
        let mut v: Vec<String> = s.split(',').filter(|c| !c.is_empty()).map(String::from).collect();
        v.sort();
        v
    }

    #[test]
    fn cohort_limit_and_grouping() {
        let (s, ids) = store_with_patients();
        let all = s.patients_with_diagnoses(None).unwrap();
        assert_eq!(all.len(), 2); // third patient has no diagnoses
        let a = all.iter().find(|e| e.patient_id == ids[0]).unwrap();
        assert_eq!(codes(&a.diagnoses), vec!["111975006", "426783006"]);
        assert_eq!(s.patients_with_diagnoses(Some(5)).unwrap().len(), 2);
        assert_eq!(s.patients_with_diagnoses(Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn single_patient_lookup() {
        let (s, ids) = store_with_patients();
        let p = s.single_patient(ids[1]).unwrap();
        assert_eq!(p, PatientDiagnoses { original_id: "A2".into(), diagnoses: "733534002".into() });
        assert_eq!(s.single_patient(ids[2]).unwrap().diagnoses, "");
        let err = s.single_patient(999).unwrap_err();
        assert!(matches!(err.downcast_ref::<EcgDbError>(), Some(EcgDbError::PatientNotFound(999))));
    }

    #[test]
    fn covariates_in_input_order() {
        let (s, ids) = store_with_patients();
        let c = s.covariates(&[ids[2], ids[0], ids[1]]).unwrap();
        assert_eq!(c[0].age, Some(70));
        assert_eq!(c[0].sex, None);
        assert_eq!(c[1].sex, Some(Sex::Male));
        assert_eq!(c[2].age, None);
        assert!(s.covariates(&[ids[0], 42]).is_err());
    }

    #[test]
    fn ecg_window_and_lead_subset() {
        let (s, ids) = store_with_patients();
        let full = s.ecg(ids[0], None, None).unwrap();
        assert_eq!(full.dim(), (600, 12));
        assert_eq!(full[[0, 0]], 1000);
        assert_eq!(full[[599, 11]], 12_000 - 599);

        let w = s.ecg(ids[0], Some(&[12, 2]), Some(1.0)).unwrap();
        assert_eq!(w.dim(), (250, 2));
        assert_eq!(w[[10, 0]], 12_000 - 10);
        assert_eq!(w[[10, 1]], 2000 - 10);

        // window longer than the recording
        assert_eq!(s.ecg(ids[0], None, Some(60.0)).unwrap().nrows(), 600);
        // patient without samples
        assert_eq!(s.ecg(ids[1], None, None).unwrap().dim(), (0, 12));
    }

    #[test]
    fn negative_and_extreme_samples_survive_storage() {
        let (mut s, ids) = store_with_patients();
        let edge = [i32::MIN, i32::MIN + 1, -70_000, -256, -129, -1, 0, 255, 65_536, i32::MAX];
        let ecg = Array2::from_shape_fn((12, edge.len()), |(l, t)| {
            if l % 2 == 0 { edge[t] } else { edge[edge.len() - 1 - t] }
        });
        s.insert_samples(ids[1], &ecg).unwrap();

        let back = s.ecg(ids[1], None, None).unwrap();
        assert_eq!(back.dim(), (edge.len(), 12));
        assert_eq!(back, ecg.t());
        assert_eq!(back[[0, 0]], i32::MIN);
        assert_eq!(back[[0, 1]], i32::MAX);

        let one = s.ecg(ids[1], Some(&[2]), Some(0.02)).unwrap();
        assert_eq!(one.column(0).to_vec(), vec![i32::MAX, 65_536, 255, 0, -1]);
    }

    #[test]
    fn ecg_rejects_bad_leads_and_ids() {
        let (s, ids) = store_with_patients();
        let err = s.ecg(ids[0], Some(&[0]), None).unwrap_err();
        assert!(matches!(err.downcast_ref::<EcgDbError>(), Some(EcgDbError::InvalidLead(0))));
        assert!(s.ecg(ids[0], Some(&[13]), None).is_err());
        let err = s.ecg(777, None, None).unwrap_err();
        assert!(matches!(err.downcast_ref::<EcgDbError>(), Some(EcgDbError::PatientNotFound(777))));
    }

    #[test]
    fn decode_widths() {
        assert_eq!(decode_le_signed(&[0xfe, 0xff, 0xff, 0xff]), Some(-2));
        assert_eq!(decode_le_signed(&[0x34, 0x12]), Some(0x1234));
        assert_eq!(decode_le_signed(&[0x80]), Some(-128));
        assert_eq!(decode_le_signed(&(-5i64).to_le_bytes()), Some(-5));
        assert_eq!(decode_le_signed(&[]), None);
        assert_eq!(decode_le_signed(&[0; 9]), None);
        assert_eq!(decode_sample(ValueRef::Integer(-17)).unwrap(), -17);
        assert!(decode_sample(ValueRef::Null).is_err());
        assert!(decode_sample(ValueRef::Blob(&i64::MAX.to_le_bytes())).is_err());
    }
}
