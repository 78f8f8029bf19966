//! Single-file SQLite store: connection, schema and write paths.
//!
//! ```text
//! dataset_dictionary   ds_id ── ds_name                    (positional ids)
//! diagnosis_dictionary diagnosis_id ── dx_code             (positional ids)
//! patients             patient_id, original_id, dataset_id ─► dataset_dictionary
//!                      age, sex, num_leads, num_samples, duration,
//!                      bs1..bs12, ad1..ad12
//!                      UNIQUE (dataset_id, original_id)
//! diagnoses            patient_id ─► patients, diagnosis_id ─► diagnosis_dictionary
//! ecg_samples          patient_id ─► patients, time_id, lead1..lead12 (BLOB)
//!                      PRIMARY KEY (patient_id, time_id)
//! ```
//!
//! The file is opened with the journal disabled and a 16 KiB page.  A crash
//! mid-ingestion can leave it corrupt; rebuild from the summaries.
//!
//! Each sample is a 4-byte little-endian two's-complement BLOB, see
//! [`encode_sample`] and [`crate::query::decode_sample`].
use anyhow::{Context, Result};
use ndarray::Array2;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Statement, Transaction};
use std::collections::HashMap;
use std::path::Path;

use crate::config::StoreConfig;
use crate::loader::RecordingMeta;

/// Lead columns in `ecg_samples` and calibration columns in `patients`.
pub const NUM_LEADS: usize = 12;

/// Row counts of one table, as returned by [`Store::inspect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub rows: i64,
}

/// Open store plus the configuration it was opened with.
pub struct Store {
    conn: Connection,
    cfg:  StoreConfig,
}

// ── Opening ───────────────────────────────────────────────────────────────

impl Store {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path, cfg: &StoreConfig) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open database {}", path.display()))?;
        Self::from_connection(conn, cfg)
    }

    pub fn open_in_memory(cfg: &StoreConfig) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, cfg)
    }

    /// Open, create the schema and fill the dictionaries.
    pub fn create(path: &Path, cfg: &StoreConfig) -> Result<Self> {
        let mut store = Self::open(path, cfg)?;
        store.setup_schema()?;
        store.populate_dictionaries()?;
        Ok(store)
    }

    fn from_connection(conn: Connection, cfg: &StoreConfig) -> Result<Self> {
        // page_size only takes effect before the first table is written.
        conn.execute_batch(&format!(
            "PRAGMA page_size = {};
             PRAGMA journal_mode = OFF;
             PRAGMA foreign_keys = ON;",
            cfg.page_size
        ))
        .context("configure pragmas")?;
        Ok(Self { conn, cfg: cfg.clone() })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.cfg
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn page_size(&self) -> Result<u32> {
        Ok(self.conn.query_row("PRAGMA page_size", [], |r| r.get(0))?)
    }
}

// ── Schema ────────────────────────────────────────────────────────────────

fn lead_columns(prefix: &str, ty: &str) -> String {
    (1..=NUM_LEADS).map(|i| format!("{prefix}{i} {ty}")).collect::<Vec<_>>().join(", ")
}

fn schema_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS dataset_dictionary (
             ds_id   INTEGER PRIMARY KEY,
             ds_name TEXT NOT NULL UNIQUE
         );
         CREATE TABLE IF NOT EXISTS diagnosis_dictionary (
             diagnosis_id INTEGER PRIMARY KEY,
             dx_code      TEXT NOT NULL UNIQUE
         );
         CREATE TABLE IF NOT EXISTS patients (
             patient_id  INTEGER PRIMARY KEY AUTOINCREMENT,
             original_id TEXT NOT NULL,
             dataset_id  INTEGER NOT NULL REFERENCES dataset_dictionary(ds_id),
             age         INTEGER,
             sex         INTEGER,
             num_leads   INTEGER,
             num_samples INTEGER,
             duration    REAL,
             {},
             {}
         );
         CREATE UNIQUE INDEX IF NOT EXISTS patients_dataset_original
             ON patients (dataset_id, original_id);
         CREATE TABLE IF NOT EXISTS diagnoses (
             patient_id   INTEGER NOT NULL REFERENCES patients(patient_id),
             diagnosis_id INTEGER NOT NULL REFERENCES diagnosis_dictionary(diagnosis_id),
             PRIMARY KEY (patient_id, diagnosis_id)
         );
         CREATE TABLE IF NOT EXISTS ecg_samples (
             patient_id INTEGER NOT NULL REFERENCES patients(patient_id),
             time_id    INTEGER NOT NULL,
             {},
             PRIMARY KEY (patient_id, time_id)
         ) WITHOUT ROWID;",
        lead_columns("bs", "REAL"),
        lead_columns("ad", "REAL"),
        lead_columns("lead", "BLOB"),
    )
}

impl Store {
    /// Create every table and index that does not exist yet.
    pub fn setup_schema(&self) -> Result<()> {
        self.conn.execute_batch(&schema_sql()).context("create schema")?;
        tracing::debug!("schema ready");
        Ok(())
    }

    /// Fill the dataset and diagnosis dictionaries with positional ids.
    ///
    /// Skipped when the dataset dictionary already has rows.  Returns whether
    /// anything was written.
    pub fn populate_dictionaries(&mut self) -> Result<bool> {
        let max: Option<i64> = self
            .conn
            .query_row("SELECT MAX(ds_id) FROM dataset_dictionary", [], |r| r.get(0))?;
        if max.is_some() {
            tracing::info!("dictionaries already populated");
            return Ok(false);
        }

        let datasets: Vec<DatasetEntry> = self
            .cfg
            .all_datasets
            .iter()
            .enumerate()
            .map(|(i, name)| DatasetEntry { id: i as i64, name: name.clone() })
            .collect();
        let codes: Vec<DiagnosisCodeEntry> = self
            .cfg
            .all_labels
            .iter()
            .enumerate()
            .map(|(i, code)| DiagnosisCodeEntry { id: i as i64, code: code.clone() })
            .collect();

        let tx = self.conn.transaction()?;
        write_batch(&tx, &datasets)?;
        write_batch(&tx, &codes)?;
        tx.commit()?;
        tracing::info!(
            "dictionaries populated: {} datasets, {} diagnosis codes",
            datasets.len(),
            codes.len()
        );
        Ok(true)
    }

    /// Every user table with its row count, by name.
    pub fn inspect(&self) -> Result<Vec<TableInfo>> {
        let names = self.table_names()?;
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let sql = format!("SELECT COUNT(*) FROM \"{}\"", name.replace('"', "\"\""));
            let rows = self.conn.query_row(&sql, [], |r| r.get(0))?;
            out.push(TableInfo { name, rows });
        }
        Ok(out)
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt.query_map([], |r| r.get(0))?.collect::<rusqlite::Result<_>>()?;
        Ok(names)
    }

    /// Stored id of dataset `name`.
    pub fn dataset_id(&self, name: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .prepare_cached("SELECT ds_id FROM dataset_dictionary WHERE ds_name = ?1")?
            .query_row(params![name], |r| r.get(0))
            .optional()?;
        Ok(id)
    }

    /// Stored diagnosis dictionary, code to id.
    ///
    /// Ids are read from the file, never from the configuration, so a store
    /// reopened with a reordered label list keeps its original mapping.
    pub fn diagnosis_ids(&self) -> Result<HashMap<String, i64>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT dx_code, diagnosis_id FROM diagnosis_dictionary")?;
        let ids = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }
}

// ── Batched writes ────────────────────────────────────────────────────────

/// How a batch of records of type `T` is written.
pub trait BatchInsert<T> {
    fn insert_sql() -> &'static str;
    fn bind_and_execute(stmt: &mut Statement<'_>, record: &T) -> rusqlite::Result<()>;
}

#[derive(Debug, Clone)]
pub struct DatasetEntry {
    pub id:   i64,
    pub name: String,
}

impl BatchInsert<DatasetEntry> for DatasetEntry {
    fn insert_sql() -> &'static str {
        "INSERT INTO dataset_dictionary (ds_id, ds_name) VALUES (?1, ?2)"
    }

    fn bind_and_execute(stmt: &mut Statement<'_>, rec: &DatasetEntry) -> rusqlite::Result<()> {
        stmt.execute(params![rec.id, rec.name])?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DiagnosisCodeEntry {
    pub id:   i64,
    pub code: String,
}

impl BatchInsert<DiagnosisCodeEntry> for DiagnosisCodeEntry {
    fn insert_sql() -> &'static str {
        "INSERT INTO diagnosis_dictionary (diagnosis_id, dx_code) VALUES (?1, ?2)"
    }

    fn bind_and_execute(stmt: &mut Statement<'_>, rec: &DiagnosisCodeEntry) -> rusqlite::Result<()> {
        stmt.execute(params![rec.id, rec.code])?;
        Ok(())
    }
}

/// One patient ↔ diagnosis link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosisRow {
    pub patient_id:   i64,
    pub diagnosis_id: i64,
}

impl BatchInsert<DiagnosisRow> for DiagnosisRow {
    fn insert_sql() -> &'static str {
        "INSERT OR IGNORE INTO diagnoses (patient_id, diagnosis_id) VALUES (?1, ?2)"
    }

    fn bind_and_execute(stmt: &mut Statement<'_>, rec: &DiagnosisRow) -> rusqlite::Result<()> {
        stmt.execute(params![rec.patient_id, rec.diagnosis_id])?;
        Ok(())
    }
}

/// One sample instant across all leads, canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRow {
    pub patient_id: i64,
    pub time_id:    i64,
    pub leads:      [i32; NUM_LEADS],
}

impl BatchInsert<SampleRow> for SampleRow {
    fn insert_sql() -> &'static str {
        "INSERT INTO ecg_samples \
           (patient_id, time_id, lead1, lead2, lead3, lead4, lead5, lead6, \
            lead7, lead8, lead9, lead10, lead11, lead12) \
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)"
    }

    fn bind_and_execute(stmt: &mut Statement<'_>, rec: &SampleRow) -> rusqlite::Result<()> {
        let mut values = Vec::with_capacity(NUM_LEADS + 2);
        values.push(Value::Integer(rec.patient_id));
        values.push(Value::Integer(rec.time_id));
        values.extend(rec.leads.iter().map(|&v| Value::Blob(encode_sample(v))));
        stmt.execute(params_from_iter(values.iter()))?;
        Ok(())
    }
}

/// Fixed-width little-endian two's-complement encoding of one sample.
pub fn encode_sample(v: i32) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

/// Rows of a lead-major `[leads, samples]` recording.  Missing leads are `0`.
pub fn sample_rows(patient_id: i64, ecg: &Array2<i32>) -> Vec<SampleRow> {
    ecg.columns()
        .into_iter()
        .enumerate()
        .map(|(t, col)| {
            let mut leads = [0i32; NUM_LEADS];
            for (slot, &v) in leads.iter_mut().zip(col.iter()) {
                *slot = v;
            }
            SampleRow { patient_id, time_id: t as i64, leads }
        })
        .collect()
}

/// Write `records` inside `tx` through one cached statement.
pub fn write_batch<T: BatchInsert<T>>(tx: &Transaction<'_>, records: &[T]) -> Result<usize> {
    let mut stmt = tx.prepare_cached(T::insert_sql())?;
    for rec in records {
        if let Err(e) = T::bind_and_execute(&mut stmt, rec) {
            tracing::error!("statement failed: {e}\n  {}", T::insert_sql());
            return Err(e).context("batch insert");
        }
    }
    Ok(records.len())
}

// ── Patients ──────────────────────────────────────────────────────────────

fn patient_insert_sql() -> String {
    let bs: Vec<String> = (1..=NUM_LEADS).map(|i| format!("bs{i}")).collect();
    let ad: Vec<String> = (1..=NUM_LEADS).map(|i| format!("ad{i}")).collect();
    let n = 7 + 2 * NUM_LEADS;
    let marks: Vec<String> = (1..=n).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO patients \
           (original_id, dataset_id, age, sex, num_leads, num_samples, duration, {}, {}) \
         VALUES ({})",
        bs.join(", "),
        ad.join(", "),
        marks.join(", ")
    )
}

fn patient_values(dataset_id: i64, meta: &RecordingMeta) -> Vec<Value> {
    let opt_f64 = |v: Option<&f64>| v.map_or(Value::Null, |x| Value::Real(*x));
    let mut values = vec![
        Value::Text(meta.id.clone()),
        Value::Integer(dataset_id),
        meta.age.map_or(Value::Null, |a| Value::Integer(a.round() as i64)),
        meta.sex.map_or(Value::Null, |s| Value::Integer(s.code())),
        Value::Integer(meta.num_leads as i64),
        Value::Integer(meta.num_samples as i64),
        Value::Real(meta.duration),
    ];
    values.extend((0..NUM_LEADS).map(|i| opt_f64(meta.baselines.get(i))));
    values.extend((0..NUM_LEADS).map(|i| opt_f64(meta.adcs.get(i))));
    values
}

impl Store {
    /// Patient id of `original_id` within `dataset_id`, if ingested.
    pub fn patient_id(&self, dataset_id: i64, original_id: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .prepare_cached("SELECT patient_id FROM patients WHERE dataset_id = ?1 AND original_id = ?2")?
            .query_row(params![dataset_id, original_id], |r| r.get(0))
            .optional()?;
        Ok(id)
    }

    /// Insert one patient row and its diagnosis links in one transaction.
    /// Returns the new patient id.
    pub fn insert_patient(
        &mut self,
        dataset_id: i64,
        meta: &RecordingMeta,
        diagnosis_ids: &[i64],
    ) -> Result<i64> {
        let sql = patient_insert_sql();
        let tx = self.conn.transaction()?;
        let values = patient_values(dataset_id, meta);
        if let Err(e) = tx.execute(&sql, params_from_iter(values.iter())) {
            tracing::error!("statement failed: {e}\n  {sql}");
            return Err(e).with_context(|| format!("insert patient {}", meta.id));
        }
        let patient_id = tx.last_insert_rowid();
        let links: Vec<DiagnosisRow> = diagnosis_ids
            .iter()
            .map(|&diagnosis_id| DiagnosisRow { patient_id, diagnosis_id })
            .collect();
        write_batch(&tx, &links)?;
        tx.commit()?;
        Ok(patient_id)
    }

    pub fn has_samples(&self, patient_id: i64) -> Result<bool> {
        let found = self
            .conn
            .prepare_cached("SELECT 1 FROM ecg_samples WHERE patient_id = ?1 LIMIT 1")?
            .exists(params![patient_id])?;
        Ok(found)
    }

    /// Store a lead-major recording under `patient_id`, `time_id` = column.
    pub fn insert_samples(&mut self, patient_id: i64, ecg: &Array2<i32>) -> Result<usize> {
        let rows = sample_rows(patient_id, ecg);
        self.insert_batch(&rows)
    }

    /// Write `records` in their own transaction.
    pub fn insert_batch<T: BatchInsert<T>>(&mut self, records: &[T]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let n = write_batch(&tx, records)?;
        tx.commit()?;
        Ok(n)
    }
}
