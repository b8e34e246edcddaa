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

//! Dataset readers (sources) and writers (sinks)

use evalgraph_core::{
    async_trait, parse_parameters, Dataset, Operator, OperatorError, OperatorKind, OperatorOutput,
    RunContext, Signal,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Csv,
    JsonLines,
}

impl Format {
    fn read(self, path: PathBuf) -> evalgraph_core::Result<Dataset> {
        match self {
            Format::Csv => Dataset::read_csv(path),
            Format::JsonLines => Dataset::read_jsonl(path),
        }
    }

    fn write(self, dataset: &Dataset, path: PathBuf) -> evalgraph_core::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        match self {
            Format::Csv => dataset.write_csv(path),
            Format::JsonLines => dataset.write_jsonl(path),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderParams {
    pub fpath: PathBuf,
    /// Columns taken from the file, in output order
    pub columns: Vec<String>,
}

/// Loads declared columns from a file into the pipeline
pub struct Reader {
    type_name: &'static str,
    format: Format,
    params: ReaderParams,
}

impl Reader {
    fn build(type_name: &'static str, format: Format, params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
        Ok(Box::new(Self {
            type_name,
            format,
            params: parse_parameters(type_name, params)?,
        }))
    }
}

/// `CsvReader` constructor
pub fn csv_reader(params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
    Reader::build("CsvReader", Format::Csv, params)
}

/// `JsonReader` constructor (JSON lines)
pub fn json_reader(params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
    Reader::build("JsonReader", Format::JsonLines, params)
}

#[async_trait]
impl Operator for Reader {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Source
    }

    fn input_signals(&self) -> Vec<Signal> {
        Vec::new()
    }

    fn output_columns(&self) -> Vec<String> {
        self.params.columns.clone()
    }

    fn parameters(&self) -> Value {
        serde_json::to_value(&self.params).unwrap_or(Value::Null)
    }

    async fn run(&self, dataset: &Dataset, _ctx: &RunContext) -> Result<OperatorOutput, OperatorError> {
        let format = self.format;
        let path = self.params.fpath.clone();
        let loaded = tokio::task::spawn_blocking(move || format.read(path))
            .await
            .map_err(|e| OperatorError::Other(format!("reader task failed: {}", e)))??;

        if let Some(missing) = self.params.columns.iter().find(|c| !loaded.has_column(c)) {
            return Err(OperatorError::MissingColumn(format!(
                "{} (in {})",
                missing,
                self.params.fpath.display()
            )));
        }

        info!(
            "{} loaded {} rows from {}",
            self.type_name,
            loaded.num_rows(),
            self.params.fpath.display()
        );

        let out = dataset.with_columns_from(&loaded, &self.params.columns)?;
        Ok(OperatorOutput::new(out, self.params.columns.clone()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriterParams {
    pub fpath: PathBuf,
}

/// Writes the final dataset to a file
pub struct Writer {
    type_name: &'static str,
    format: Format,
    params: WriterParams,
}

impl Writer {
    fn build(type_name: &'static str, format: Format, params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
        Ok(Box::new(Self {
            type_name,
            format,
            params: parse_parameters(type_name, params)?,
        }))
    }
}

/// `CsvWriter` constructor
pub fn csv_writer(params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
    Writer::build("CsvWriter", Format::Csv, params)
}

/// `JsonWriter` constructor (JSON lines)
pub fn json_writer(params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
    Writer::build("JsonWriter", Format::JsonLines, params)
}

#[async_trait]
impl Operator for Writer {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn kind(&self) -> OperatorKind {
        OperatorKind::Sink
    }

    fn input_signals(&self) -> Vec<Signal> {
        Vec::new()
    }

    fn output_columns(&self) -> Vec<String> {
        Vec::new()
    }

    fn parameters(&self) -> Value {
        serde_json::to_value(&self.params).unwrap_or(Value::Null)
    }

    async fn run(&self, dataset: &Dataset, _ctx: &RunContext) -> Result<OperatorOutput, OperatorError> {
        let format = self.format;
        let path = self.params.fpath.clone();
        let snapshot = dataset.clone();
        tokio::task::spawn_blocking(move || format.write(&snapshot, path))
            .await
            .map_err(|e| OperatorError::Other(format!("writer task failed: {}", e)))??;

        info!(
            "{} wrote {} rows to {}",
            self.type_name,
            dataset.num_rows(),
            self.params.fpath.display()
        );
        Ok(OperatorOutput::new(dataset.clone(), Vec::new()))
    }
}
