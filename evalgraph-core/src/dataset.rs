// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Tabular datasets flowing between operators
//!
//! A [`Dataset`] is an ordered list of rows over a fixed, ordered set of uniquely
//! named columns. Cells are dynamically typed [`serde_json::Value`]s.
//!
//! Datasets are values: every transformation returns a new dataset and leaves
//! the receiver untouched.

use crate::error::{EvalGraphError, OperatorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A JSON object record, one per row
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    /// Create an empty dataset with no columns and no rows
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset from named columns of equal length
    pub fn from_columns(columns: Vec<(String, Vec<Value>)>) -> Result<Self> {
        let num_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut names = Vec::with_capacity(columns.len());
        let mut seen = HashSet::new();

        for (name, values) in &columns {
            if !seen.insert(name.as_str()) {
                return Err(EvalGraphError::Shape(format!("duplicate column '{}'", name)));
            }
            if values.len() != num_rows {
                return Err(EvalGraphError::Shape(format!(
                    "column '{}' has {} values, expected {}",
                    name,
                    values.len(),
                    num_rows
                )));
            }
            names.push(name.clone());
        }

        let mut rows = vec![Vec::with_capacity(names.len()); num_rows];
        for (_, values) in columns {
            for (row, value) in rows.iter_mut().zip(values) {
                row.push(value);
            }
        }

        Ok(Self {
            columns: names,
            rows,
        })
    }

    /// Build a dataset from JSON object records.
    ///
    /// Columns are the union of record keys in first-seen order; absent cells are null.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for record in &records {
            for key in record.keys() {
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|c| record.remove(c).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    /// Convert every row to a JSON object record
    pub fn to_records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Record>()
            })
            .collect()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Iterate over the values of one column
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value> + '_> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Borrow one row
    pub fn row(&self, index: usize) -> Option<RowView<'_>> {
        (index < self.rows.len()).then_some(RowView {
            dataset: self,
            index,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> + '_ {
        (0..self.rows.len()).map(move |index| RowView {
            dataset: self,
            index,
        })
    }

    /// Return a copy with `name` set to `values`.
    ///
    /// An existing column of the same name is overwritten in place (keeping its
    /// position), otherwise the column is appended. An empty dataset adopts the
    /// row count of `values`.
    pub fn with_column(&self, name: impl Into<String>, values: Vec<Value>) -> Result<Dataset> {
        let name = name.into();
        let mut out = self.clone();

        if out.columns.is_empty() && out.rows.is_empty() {
            out.rows = vec![Vec::new(); values.len()];
        }

        if values.len() != out.rows.len() {
            return Err(EvalGraphError::Shape(format!(
                "column '{}' has {} values, dataset has {} rows",
                name,
                values.len(),
                out.rows.len()
            )));
        }

        match out.column_index(&name) {
            Some(idx) => {
                for (row, value) in out.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                out.columns.push(name);
                for (row, value) in out.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }

        Ok(out)
    }

    /// Return a copy carrying `names` taken from `other` (same row count required)
    pub fn with_columns_from(&self, other: &Dataset, names: &[String]) -> Result<Dataset> {
        let mut out = self.clone();
        for name in names {
            let values: Vec<Value> = other
                .column(name)
                .ok_or_else(|| EvalGraphError::Shape(format!("missing column '{}'", name)))?
                .cloned()
                .collect();
            out = out.with_column(name.clone(), values)?;
        }
        Ok(out)
    }

    /// Project onto a subset of columns, in the given order
    pub fn select(&self, names: &[&str]) -> Result<Dataset> {
        let indices = names
            .iter()
            .map(|n| {
                self.column_index(n)
                    .ok_or_else(|| EvalGraphError::Shape(format!("missing column '{}'", n)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Dataset {
            columns: names.iter().map(|n| n.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    /// Keep only the first `n` rows
    pub fn head(&self, n: usize) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    // --- File formats ---

    /// Load a dataset, choosing the format from the file extension
    /// (`.csv`, `.json` array of objects, anything else JSON lines).
    pub fn load(path: impl AsRef<Path>) -> Result<Dataset> {
        let path = path.as_ref();
        match extension(path).as_deref() {
            Some("csv") => Self::read_csv(path),
            Some("json") => Self::read_json(path),
            _ => Self::read_jsonl(path),
        }
    }

    /// Save a dataset, choosing the format from the file extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match extension(path).as_deref() {
            Some("csv") => self.write_csv(path),
            Some("json") => {
                let file = BufWriter::new(File::create(path)?);
                serde_json::to_writer_pretty(file, &self.to_records())?;
                Ok(())
            }
            _ => self.write_jsonl(path),
        }
    }

    pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Dataset> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str::<Record>(&line)?);
        }
        Ok(Self::from_records(records))
    }

    pub fn write_jsonl(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for record in self.to_records() {
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_json(path: impl AsRef<Path>) -> Result<Dataset> {
        let reader = BufReader::new(File::open(path)?);
        let records: Vec<Record> = serde_json::from_reader(reader)?;
        Ok(Self::from_records(records))
    }

    /// Read a CSV file with a header row. Cells are typed by inspection:
    /// empty → null, integers and floats → numbers, `true`/`false` → booleans.
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Dataset> {
        let mut reader = csv::Reader::from_path(path)?;
        let columns: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

        let mut seen = HashSet::new();
        for c in &columns {
            if !seen.insert(c.as_str()) {
                return Err(EvalGraphError::Shape(format!("duplicate CSV header '{}'", c)));
            }
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(infer_cell).collect());
        }

        Ok(Dataset { columns, rows })
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(cell_to_string))?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn infer_cell(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Borrowed view of one dataset row
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    dataset: &'a Dataset,
    index: usize,
}

impl<'a> RowView<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.dataset.value(self.index, column)
    }

    /// Value of a column that must exist
    pub fn require(&self, column: &str) -> std::result::Result<&'a Value, OperatorError> {
        self.get(column)
            .ok_or_else(|| OperatorError::MissingColumn(column.to_string()))
    }

    /// String value of a column; non-string cells are rejected
    pub fn str(&self, column: &str) -> std::result::Result<&'a str, OperatorError> {
        match self.require(column)? {
            Value::String(s) => Ok(s.as_str()),
            other => Err(OperatorError::InvalidRow {
                row: self.index,
                message: format!("column '{}' is not a string: {}", column, other),
            }),
        }
    }

    /// Text rendering of a column: strings as-is, lists joined by newlines,
    /// other values as JSON. Used for prompt inputs.
    pub fn text(&self, column: &str) -> std::result::Result<String, OperatorError> {
        match self.require(column)? {
            Value::Null => Err(OperatorError::InvalidRow {
                row: self.index,
                message: format!("column '{}' is null", column),
            }),
            Value::String(s) => Ok(s.clone()),
            Value::Array(items) => Ok(items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n")),
            other => Ok(other.to_string()),
        }
    }

    /// Numeric value of a column; numeric strings and booleans are coerced
    pub fn f64(&self, column: &str) -> std::result::Result<f64, OperatorError> {
        let value = self.require(column)?;
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| OperatorError::InvalidRow {
            row: self.index,
            message: format!("column '{}' is not numeric: {}", column, value),
        })
    }

    pub fn to_record(&self) -> Record {
        self.dataset
            .columns
            .iter()
            .cloned()
            .zip(self.dataset.rows[self.index].iter().cloned())
            .collect()
    }
}
