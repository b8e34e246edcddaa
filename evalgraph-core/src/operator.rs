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

//! The operator contract
//!
//! Every pipeline stage implements [`Operator`]. Row-wise stages usually implement
//! [`RowOperator`] instead and delegate `run` to [`run_rows`], which evaluates rows
//! concurrently while keeping row order.
//!
//! All concurrent work in a run draws from one permit pool in [`RunContext`], so
//! `Settings::concurrency_limit` bounds in-flight rows across every variant and
//! operator of the run.

use crate::dataset::{Dataset, RowView};
use crate::error::{EvalGraphError, OperatorError, Result};
use crate::settings::Settings;
use crate::signal::Signal;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

/// Serializable `{type_name, parameters}` record that rebuilds an operator
/// through the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorDescriptor {
    pub type_name: String,
    #[serde(default)]
    pub parameters: Value,
}

impl OperatorDescriptor {
    pub fn new(type_name: impl Into<String>, parameters: Value) -> Self {
        Self {
            type_name: type_name.into(),
            parameters,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Decode descriptor parameters into a typed parameter struct.
///
/// `null` decodes as an empty object so parameter structs with serde defaults
/// accept a bare `{"type_name": ...}` descriptor.
pub fn parse_parameters<T: DeserializeOwned>(type_name: &str, parameters: Value) -> Result<T> {
    let parameters = match parameters {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(parameters).map_err(|e| EvalGraphError::InvalidParameters {
        type_name: type_name.to_string(),
        message: e.to_string(),
    })
}

/// Where an operator sits in a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    /// Produces the dataset (readers)
    Source,
    Transform,
    /// Consumes the final dataset (writers); always scheduled last
    Sink,
}

/// A recoverable failure confined to one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub message: String,
}

/// Result of one operator invocation
#[derive(Debug, Clone)]
pub struct OperatorOutput {
    pub dataset: Dataset,
    /// Columns produced by this invocation, in production order
    pub new_columns: Vec<String>,
    pub row_errors: Vec<RowError>,
}

impl OperatorOutput {
    pub fn new(dataset: Dataset, new_columns: Vec<String>) -> Self {
        Self {
            dataset,
            new_columns,
            row_errors: Vec::new(),
        }
    }

    pub fn with_row_errors(mut self, row_errors: Vec<RowError>) -> Self {
        self.row_errors = row_errors;
        self
    }
}

/// Per-run state handed to every operator invocation
#[derive(Debug, Clone)]
pub struct RunContext {
    pub settings: Arc<Settings>,
    pub cancel: CancellationToken,
    /// Shared bound on in-flight work
    pub permits: Arc<Semaphore>,
}

impl RunContext {
    pub fn new(settings: Arc<Settings>) -> Self {
        let permits = Arc::new(Semaphore::new(settings.concurrency_limit.max(1)));
        Self {
            settings,
            cancel: CancellationToken::new(),
            permits,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Share a permit pool with other runs
    pub fn with_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.permits = permits;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for a slot in the run's permit pool.
    ///
    /// Operators that do their own fan-out instead of using [`run_rows`] should
    /// hold a permit around each unit of work.
    pub async fn acquire(&self) -> std::result::Result<SemaphorePermit<'_>, OperatorError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| OperatorError::Other("permit pool closed".to_string()))
    }
}

/// Core trait that all pipeline stages implement
#[async_trait]
pub trait Operator: Send + Sync {
    /// Stable registry key (e.g., "WordCount")
    fn type_name(&self) -> &str;

    fn kind(&self) -> OperatorKind {
        OperatorKind::Transform
    }

    /// Columns this operator reads
    fn input_signals(&self) -> Vec<Signal>;

    /// Columns this operator adds (or overwrites on re-run)
    fn output_columns(&self) -> Vec<String>;

    /// Declared parameters, as accepted by the registered constructor
    fn parameters(&self) -> Value;

    /// Bind runtime configuration before any row is processed
    fn setup(&mut self, _settings: &Settings) -> Result<()> {
        Ok(())
    }

    /// Produce a new dataset from `dataset`; the input is never modified
    async fn run(&self, dataset: &Dataset, ctx: &RunContext)
        -> std::result::Result<OperatorOutput, OperatorError>;

    fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor::new(self.type_name(), self.parameters())
    }

    /// Whether results may be replayed from the result cache
    fn cacheable(&self) -> bool {
        self.kind() == OperatorKind::Transform
    }
}

/// Row-wise operators: one call per row, one value per output column.
#[async_trait]
pub trait RowOperator: Send + Sync {
    async fn evaluate_row(
        &self,
        row: RowView<'_>,
        ctx: &RunContext,
    ) -> std::result::Result<Vec<Value>, OperatorError>;
}

/// Drive a [`RowOperator`] over every row.
///
/// Each row holds a permit from the run's pool while it evaluates, and results
/// come back in row order. A row gets `Settings::timeout_secs` on its own; a row
/// that fails or times out gets null in every output column and a [`RowError`].
/// Fatal errors abort the invocation.
pub async fn run_rows<'a, T>(
    op: &'a T,
    columns: &[String],
    dataset: &'a Dataset,
    ctx: &'a RunContext,
) -> std::result::Result<OperatorOutput, OperatorError>
where
    T: RowOperator + ?Sized,
{
    let limit = ctx.settings.concurrency_limit.max(1);
    let timeout = ctx.settings.timeout();
    let row_futures: Vec<BoxFuture<'a, std::result::Result<Vec<Value>, OperatorError>>> = dataset
        .rows()
        .map(|row: RowView<'a>| -> BoxFuture<'a, std::result::Result<Vec<Value>, OperatorError>> {
            Box::pin(async move {
                let index = row.index();
                let _permit = ctx.acquire().await?;
                match tokio::time::timeout(timeout, op.evaluate_row(row, ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(OperatorError::InvalidRow {
                        row: index,
                        message: format!("timed out after {}s", timeout.as_secs()),
                    }),
                }
            })
        })
        .collect();
    let results: Vec<_> = stream::iter(row_futures)
        .buffered(limit)
        .collect()
        .await;

    let mut values: Vec<Vec<Value>> = vec![Vec::with_capacity(dataset.num_rows()); columns.len()];
    let mut row_errors = Vec::new();

    for (row, result) in results.into_iter().enumerate() {
        let cells = match result {
            Ok(cells) if cells.len() == columns.len() => cells,
            Ok(cells) => {
                row_errors.push(RowError {
                    row,
                    message: format!(
                        "expected {} output values, got {}",
                        columns.len(),
                        cells.len()
                    ),
                });
                vec![Value::Null; columns.len()]
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                row_errors.push(RowError {
                    row,
                    message: e.to_string(),
                });
                vec![Value::Null; columns.len()]
            }
        };
        for (column, cell) in values.iter_mut().zip(cells) {
            column.push(cell);
        }
    }

    let mut out = dataset.clone();
    for (name, column) in columns.iter().zip(values) {
        out = out.with_column(name.clone(), column)?;
    }

    Ok(OperatorOutput::new(out, columns.to_vec()).with_row_errors(row_errors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Doubler;

    #[async_trait]
    impl RowOperator for Doubler {
        async fn evaluate_row(
            &self,
            row: RowView<'_>,
            _ctx: &RunContext,
        ) -> std::result::Result<Vec<Value>, OperatorError> {
            let n = row.f64("n")?;
            Ok(vec![json!(n * 2.0)])
        }
    }

    fn ctx() -> RunContext {
        RunContext::new(Arc::new(Settings::default().with_concurrency_limit(2)))
    }

    #[tokio::test]
    async fn test_run_rows_preserves_order_and_marks_failures() {
        let ds = Dataset::from_columns(vec![(
            "n".to_string(),
            vec![json!(1), json!("oops"), json!(3), json!(4)],
        )])
        .unwrap();

        let out = run_rows(&Doubler, &["doubled".to_string()], &ds, &ctx())
            .await
            .unwrap();

        assert_eq!(out.new_columns, vec!["doubled"]);
        assert_eq!(out.dataset.num_rows(), 4);
        assert_eq!(out.dataset.value(0, "doubled"), Some(&json!(2.0)));
        assert_eq!(out.dataset.value(1, "doubled"), Some(&Value::Null));
        assert_eq!(out.dataset.value(3, "doubled"), Some(&json!(8.0)));
        assert_eq!(out.row_errors.len(), 1);
        assert_eq!(out.row_errors[0].row, 1);

        // input untouched
        assert_eq!(ds.num_columns(), 1);
    }

    #[test]
    fn test_parse_parameters_accepts_null() {
        #[derive(Debug, Deserialize)]
        struct Params {
            #[serde(default)]
            threshold: f64,
        }

        let params: Params = parse_parameters("Test", Value::Null).unwrap();
        assert_eq!(params.threshold, 0.0);

        let err = parse_parameters::<Params>("Test", json!({"threshold": "high"})).unwrap_err();
        assert!(matches!(err, EvalGraphError::InvalidParameters { .. }));
    }

    #[test]
    fn test_descriptor_json() {
        let d = OperatorDescriptor::new("WordCount", json!({"col_in": "text"}));
        let json = d.to_json().unwrap();
        assert_eq!(json, r#"{"type_name":"WordCount","parameters":{"col_in":"text"}}"#);
        assert_eq!(OperatorDescriptor::from_json(&json).unwrap(), d);
    }
}
