//! Diagnosis label normalisation.
//!
//! Applied in strict order:
//!
//! 1. drop empty entries,
//! 2. drop codes listed as unscored (compared as integers),
//! 3. map same-diagnosis codes onto their scored equivalent,
//!
//! then drop repeats that step 3 may have produced, keeping first occurrence.
//! An empty result after step 2 means the recording carries only unscored
//! labels and is left out of the summary.
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

use crate::config::StoreConfig;
use crate::csv::CsvTable;

/// Column of the unscored list holding the SNOMED-CT codes.
pub const SNOMED_COLUMN: &str = "SNOMEDCTCode";

/// Set of diagnosis codes excluded from storage.
#[derive(Debug, Clone, Default)]
pub struct UnscoredSet {
    codes: HashSet<i64>,
}

impl UnscoredSet {
    pub fn new<I: IntoIterator<Item = i64>>(codes: I) -> Self {
        Self { codes: codes.into_iter().collect() }
    }

    /// Read the `SNOMEDCTCode` column of `path` and append `cfg.extra_unscored`.
    pub fn load(path: &Path, cfg: &StoreConfig) -> Result<Self> {
        let table = CsvTable::read(path)?;
        let col = table
            .column_index(SNOMED_COLUMN)
            .with_context(|| format!("{} has no {SNOMED_COLUMN} column", path.display()))?;
        let mut codes = HashSet::new();
        for (i, row) in table.rows.iter().enumerate() {
            let raw = row.get(col).map(String::as_str).unwrap_or_default().trim();
            // pandas may have written the integer column as float
            let code = raw
                .parse::<i64>()
                .or_else(|_| raw.parse::<f64>().map(|f| f as i64))
                .with_context(|| format!("{} row {}: bad code {raw:?}", path.display(), i + 1))?;
            codes.insert(code);
        }
        codes.extend(cfg.extra_unscored.iter().copied());
        tracing::debug!("{} unscored codes loaded from {}", codes.len(), path.display());
        Ok(Self { codes })
    }

    pub fn contains(&self, code: i64) -> bool {
        self.codes.contains(&code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Step 1: drop empty entries.
pub fn clean_labels(labels: &[String]) -> Vec<String> {
    labels.iter().filter(|l| !l.is_empty()).cloned().collect()
}

/// Step 2: drop unscored codes.  Codes that are not integers are dropped too.
///
/// Surviving codes are re-rendered from their integer value.
pub fn remove_unscored(labels: &[String], unscored: &UnscoredSet) -> Vec<String> {
    labels
        .iter()
        .filter_map(|l| match l.trim().parse::<i64>() {
            Ok(code) => Some(code),
            Err(_) => {
                tracing::warn!("dropping non-numeric diagnosis code {l:?}");
                None
            }
        })
        .filter(|&code| !unscored.contains(code))
        .map(|code| code.to_string())
        .collect()
}

/// Step 3: map onto the scored equivalent code.
pub fn switch_same_diagnosis(labels: Vec<String>, cfg: &StoreConfig) -> Vec<String> {
    labels
        .into_iter()
        .map(|l| cfg.same_diagnosis.get(&l).cloned().unwrap_or(l))
        .collect()
}

/// Full pipeline.  Returns an empty `Vec` when only unscored codes remain.
pub fn normalize_labels(labels: &[String], unscored: &UnscoredSet, cfg: &StoreConfig) -> Vec<String> {
    let scored = remove_unscored(&clean_labels(labels), unscored);
    let mut seen = HashSet::new();
    switch_same_diagnosis(scored, cfg)
        .into_iter()
        .filter(|l| seen.insert(l.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn empty_dropped_and_equivalence_mapped() {
        let cfg = StoreConfig::default();
        let unscored = UnscoredSet::new([251238007]);
        let out = normalize_labels(&s(&["164909002", "", "111975006"]), &unscored, &cfg);
        assert_eq!(out, s(&["733534002", "111975006"]));
    }

    #[test]
    fn all_unscored_gives_empty() {
        let cfg = StoreConfig::default();
        let unscored = UnscoredSet::new(cfg.extra_unscored.clone());
        assert!(normalize_labels(&s(&["251238007"]), &unscored, &cfg).is_empty());
        assert!(normalize_labels(&s(&["", ""]), &unscored, &cfg).is_empty());
    }

    #[test]
    fn unscored_compared_as_integer() {
        let cfg = StoreConfig::default();
        let unscored = UnscoredSet::new([6180003]);
        let out = normalize_labels(&s(&["06180003", "426783006"]), &unscored, &cfg);
        assert_eq!(out, s(&["426783006"]));
    }

    #[test]
    fn mapping_applies_after_exclusion() {
        let cfg = StoreConfig::default();
        // The source code is excluded before it could be mapped.
        let unscored = UnscoredSet::new([59118001]);
        let out = normalize_labels(&s(&["59118001", "713427006"]), &unscored, &cfg);
        assert_eq!(out, s(&["713427006"]));
    }

    #[test]
    fn repeats_after_mapping_collapse() {
        let cfg = StoreConfig::default();
        let out = normalize_labels(
            &s(&["17338001", "427172004", "426783006"]),
            &UnscoredSet::default(),
            &cfg,
        );
        assert_eq!(out, s(&["427172004", "426783006"]));
    }

    #[test]
    fn non_numeric_code_dropped() {
        let cfg = StoreConfig::default();
        let out = normalize_labels(&s(&["abc", "426783006"]), &UnscoredSet::default(), &cfg);
        assert_eq!(out, s(&["426783006"]));
    }
}
