//! Dataset loading.
//!
//! Datasets live under a root directory as `<root>/<name>/<version>/*.jsonl`.
//! Every non-blank line is one JSON object and becomes one [`Row`]. Row ids
//! are unique within a dataset; repeated ids get an `_<index>` suffix.

use crate::error::{HarnessError, Result};
use crate::model::{Record, Row, value_text};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// A loaded dataset version.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub version: String,
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keep only the first `n` rows (for quick runs).
    pub fn take(mut self, n: usize) -> Self {
        self.rows.truncate(n);
        self
    }
}

/// Reads datasets from a root directory.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    root: PathBuf,
}

impl DatasetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one dataset version.
    pub fn version_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(name).join(version)
    }

    /// Load every `*.jsonl` file of `name`/`version`, in file name order.
    ///
    /// Row ids come from a non-empty `id` field, else `row_<index>`. When
    /// `expected_field` is set, that field becomes the row's ground truth.
    pub fn load(&self, name: &str, version: &str, expected_field: Option<&str>) -> Result<Dataset> {
        let dir = self.version_dir(name, version);
        if !dir.is_dir() {
            return Err(HarnessError::DatasetNotFound {
                name: name.to_string(),
                version: version.to_string(),
                path: dir,
            });
        }

        let mut rows = Vec::new();
        let mut seen_ids = HashSet::new();
        for file in jsonl_files(&dir)? {
            for (line, record) in read_records(&file)? {
                let index = rows.len();
                let row = record_to_row(record, index, expected_field, name, version);
                if seen_ids.contains(&row.id) {
                    tracing::warn!("Duplicate row id '{}' in {} line {}", row.id, file.display(), line);
                }
                seen_ids.insert(row.id.clone());
                rows.push(row);
            }
        }

        ensure_unique_ids(&mut rows);
        tracing::info!("Loaded dataset {}:{} with {} rows", name, version, rows.len());
        Ok(Dataset {
            name: name.to_string(),
            version: version.to_string(),
            rows,
        })
    }
}

fn jsonl_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| HarnessError::io(dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();
    Ok(files)
}

/// Parse the non-blank lines of a JSONL file, with their 1-based line numbers.
fn read_records(path: &Path) -> Result<Vec<(usize, Record)>> {
    let content = fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |message: String| HarnessError::MalformedRecord {
            path: path.to_path_buf(),
            line: index + 1,
            message,
        };
        match serde_json::from_str::<Value>(line).map_err(|e| malformed(e.to_string()))? {
            Value::Object(record) => records.push((index + 1, record)),
            other => return Err(malformed(format!("expected a JSON object, got {}", other))),
        }
    }
    Ok(records)
}

/// Rename rows whose id was already used by an earlier row to `<id>_<index>`.
/// Evaluator output is keyed by row id, so ids must be unique within a run.
/// Returns the number of renamed rows.
pub fn ensure_unique_ids(rows: &mut [Row]) -> usize {
    let mut seen = HashSet::new();
    let mut renamed = 0;
    for (index, row) in rows.iter_mut().enumerate() {
        if seen.contains(&row.id) {
            let unique = unique_id(&row.id, index, &seen);
            tracing::warn!("Row {} reuses id '{}'; renamed to '{}'", index, row.id, unique);
            row.id = unique;
            renamed += 1;
        }
        seen.insert(row.id.clone());
    }
    renamed
}

/// `<id>_<index>`, with a further counter if even that is taken.
fn unique_id(id: &str, index: usize, seen: &HashSet<String>) -> String {
    let mut candidate = format!("{}_{}", id, index);
    let mut extra = 1;
    while seen.contains(&candidate) {
        candidate = format!("{}_{}_{}", id, index, extra);
        extra += 1;
    }
    candidate
}

fn record_to_row(
    record: Record,
    index: usize,
    expected_field: Option<&str>,
    name: &str,
    version: &str,
) -> Row {
    let id = record
        .get("id")
        .filter(|v| !v.is_null())
        .map(value_text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("row_{}", index));

    let expected = expected_field.and_then(|field| record.get(field).cloned());

    let mut row = Row::new(id, record);
    row.expected_output = expected;
    row.metadata
        .insert("dataset_name".to_string(), Value::String(name.to_string()));
    row.metadata
        .insert("dataset_version".to_string(), Value::String(version.to_string()));
    row
}
