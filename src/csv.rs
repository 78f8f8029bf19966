//! Minimal CSV reader/writer and list-literal encoding.
//!
//! Only what the summary artifacts and the unscored-code list need:
//! comma separated, `"`-quoted fields with `""` escapes, quoted fields may
//! span lines, first row is the header.
//!
//! List-valued summary columns are stored as list literals:
//!
//! ```text
//! ['426783006', '111975006']
//! ```
use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;

/// A parsed CSV file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    pub header: Vec<String>,
    pub rows:   Vec<Vec<String>>,
}

impl CsvTable {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut records = parse_records(text)?.into_iter();
        let header = records.next().unwrap_or_default();
        let rows = records.filter(|r| !(r.len() == 1 && r[0].is_empty())).collect();
        Ok(Self { header, rows })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.trim() == name)
    }
}

fn parse_records(text: &str) -> Result<Vec<Vec<String>>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        bail!("unterminated quoted field");
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

/// Write one record, quoting fields that contain `,`, `"` or line breaks.
pub fn write_record<W: Write, S: AsRef<str>>(out: &mut W, fields: &[S]) -> std::io::Result<()> {
    let line: Vec<String> = fields.iter().map(|f| quote(f.as_ref())).collect();
    writeln!(out, "{}", line.join(","))
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ── List literals ─────────────────────────────────────────────────────────

/// `["a", "b"]` → `['a', 'b']`.
pub fn format_list<S: AsRef<str>>(items: &[S]) -> String {
    let inner: Vec<String> = items.iter().map(|s| format!("'{}'", s.as_ref())).collect();
    format!("[{}]", inner.join(", "))
}

/// Inverse of [`format_list`].  Unquoted items (`[1.0, 2.0]`) are accepted too.
pub fn parse_list(text: &str) -> Result<Vec<String>> {
    let t = text.trim();
    let inner = t
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .with_context(|| format!("not a list literal: {t:?}"))?;
    if inner.trim().is_empty() {
        return Ok(vec![]);
    }
    Ok(inner
        .split(',')
        .map(|item| {
            let item = item.trim();
            item.strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .or_else(|| item.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
                .unwrap_or(item)
                .to_string()
        })
        .collect())
}

/// [`parse_list`] followed by `f64` parsing of every item.
pub fn parse_f64_list(text: &str) -> Result<Vec<f64>> {
    parse_list(text)?
        .iter()
        .map(|s| s.parse::<f64>().with_context(|| format!("bad number {s:?} in {text:?}")))
        .collect()
}
