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

//! End-to-end tests against the process-wide registry

use evalgraph_core::{
    async_trait, deserialize_operator, is_custom, list_operators, parse_parameters, register_custom_op,
    register_op, run_rows, Check, CheckSet, Dataset, EvalGraphError, ExperimentArgs, FailurePolicy,
    Operator, OperatorDag, OperatorDescriptor, OperatorError, OperatorOutput, OperatorRegistry,
    RowOperator, RowView, RunContext, RunOptions, Settings, Signal, ERRORS_COLUMN,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Serialize, Deserialize)]
struct ParityParams {
    #[serde(default = "default_col_in")]
    col_in: String,
    #[serde(default = "default_col_out")]
    col_out: String,
}

fn default_col_in() -> String {
    "n".to_string()
}

fn default_col_out() -> String {
    "is_even".to_string()
}

/// Flags even integers; non-integers are row failures
struct Parity {
    params: ParityParams,
}

#[async_trait]
impl RowOperator for Parity {
    async fn evaluate_row(
        &self,
        row: RowView<'_>,
        _ctx: &RunContext,
    ) -> Result<Vec<Value>, OperatorError> {
        match row.require(&self.params.col_in)?.as_i64() {
            Some(n) => Ok(vec![json!(n % 2 == 0)]),
            None => Err(OperatorError::InvalidRow {
                row: row.index(),
                message: "not an integer".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Operator for Parity {
    fn type_name(&self) -> &str {
        "Parity"
    }

    fn input_signals(&self) -> Vec<Signal> {
        vec![Signal::new(&self.params.col_in)]
    }

    fn output_columns(&self) -> Vec<String> {
        vec![self.params.col_out.clone()]
    }

    fn parameters(&self) -> Value {
        serde_json::to_value(&self.params).unwrap_or(Value::Null)
    }

    async fn run(&self, dataset: &Dataset, ctx: &RunContext) -> Result<OperatorOutput, OperatorError> {
        run_rows(self, &self.output_columns(), dataset, ctx).await
    }
}

fn make_parity(params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
    Ok(Box::new(Parity {
        params: parse_parameters("Parity", params)?,
    }))
}

fn make_parity_again(params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
    make_parity(params)
}

#[test]
fn global_registry_lifecycle() {
    register_op("Parity", make_parity).unwrap();
    register_op("Parity", make_parity).unwrap();
    assert!(matches!(
        register_op("Parity", make_parity_again),
        Err(EvalGraphError::DuplicateRegistration(_))
    ));

    register_custom_op("ParityCustom", make_parity).unwrap();
    assert!(is_custom("ParityCustom"));
    assert!(!is_custom("Parity"));
    assert!(list_operators()
        .iter()
        .any(|info| info.type_name == "ParityCustom" && info.custom));

    let op = deserialize_operator(&OperatorDescriptor::new("Parity", json!({"col_out": "even"}))).unwrap();
    assert_eq!(op.output_columns(), vec!["even"]);
    assert_eq!(op.parameters(), json!({"col_in": "n", "col_out": "even"}));

    assert!(matches!(
        deserialize_operator(&OperatorDescriptor::new("Nope", Value::Null)),
        Err(EvalGraphError::UnknownOperator(_))
    ));
}

#[tokio::test]
async fn two_scorers_keep_distinct_columns() {
    let mut dag = OperatorDag::new();
    dag.add(make_parity(json!({"col_out": "even_a"})).unwrap())
        .unwrap();
    dag.add(make_parity(json!({"col_out": "even_b"})).unwrap())
        .unwrap();

    let data = Dataset::from_columns(vec![("n".to_string(), vec![json!(1), json!(2)])]).unwrap();
    let run = dag.execute(&data, Arc::new(Settings::default())).await.unwrap();

    assert_eq!(run.dataset.columns(), &["n", "even_a", "even_b"]);
    assert_eq!(run.dataset.value(1, "even_b"), Some(&json!(true)));
}

/// Tracks how many rows are being evaluated at once
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    const fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

static CHECK_SET_GAUGE: Gauge = Gauge::new();

#[derive(Serialize, Deserialize)]
struct SlowParams {
    col_out: String,
}

/// Sleeps for the row's `delay_ms`, then echoes it
struct Slow {
    params: SlowParams,
    gauge: Option<&'static Gauge>,
}

#[async_trait]
impl RowOperator for Slow {
    async fn evaluate_row(
        &self,
        row: RowView<'_>,
        _ctx: &RunContext,
    ) -> Result<Vec<Value>, OperatorError> {
        let delay = row.f64("delay_ms")? as u64;
        if let Some(gauge) = self.gauge {
            let now = gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            gauge.peak.fetch_max(now, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if let Some(gauge) = self.gauge {
            gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(vec![json!(delay)])
    }
}

#[async_trait]
impl Operator for Slow {
    fn type_name(&self) -> &str {
        "Slow"
    }

    fn input_signals(&self) -> Vec<Signal> {
        vec![Signal::new("delay_ms")]
    }

    fn output_columns(&self) -> Vec<String> {
        vec![self.params.col_out.clone()]
    }

    fn parameters(&self) -> Value {
        serde_json::to_value(&self.params).unwrap_or(Value::Null)
    }

    async fn run(&self, dataset: &Dataset, ctx: &RunContext) -> Result<OperatorOutput, OperatorError> {
        run_rows(self, &self.output_columns(), dataset, ctx).await
    }
}

fn make_gauged_slow(params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
    Ok(Box::new(Slow {
        params: parse_parameters("Slow", params)?,
        gauge: Some(&CHECK_SET_GAUGE),
    }))
}

fn delays(values: &[u64]) -> Dataset {
    Dataset::from_columns(vec![(
        "delay_ms".to_string(),
        values.iter().map(|v| json!(v)).collect(),
    )])
    .unwrap()
}

#[tokio::test]
async fn concurrency_limit_bounds_the_whole_check_set() {
    let registry = OperatorRegistry::new();
    registry.register("Slow", make_gauged_slow).unwrap();

    // three variants, each with two independent operators in one layer
    let check = Check::new(
        "slow",
        vec![
            OperatorDescriptor::new("Slow", json!({"col_out": "a"})),
            OperatorDescriptor::new("Slow", json!({"col_out": "b"})),
        ],
    )
    .with_experiment_args(ExperimentArgs::new().with_arg("k", vec![json!(1), json!(2), json!(3)]));

    let settings = Arc::new(Settings::default().with_cache(false).with_concurrency_limit(2));
    let report = CheckSet::new(vec![check])
        .run_all_in(&registry, &delays(&[30, 30, 30, 30]), settings, &RunOptions::default())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.results.len(), 3);
    let peak = CHECK_SET_GAUGE.peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 2, "peak concurrency was {}", peak);
}

#[tokio::test]
async fn slow_row_times_out_alone() {
    let mut dag = OperatorDag::new();
    dag.add(Box::new(Slow {
        params: SlowParams {
            col_out: "waited".to_string(),
        },
        gauge: None,
    }))
    .unwrap();

    // the rows together take longer than the timeout; only the last one alone does
    let settings = Arc::new(
        Settings::default()
            .with_cache(false)
            .with_concurrency_limit(1)
            .with_timeout_secs(1),
    );
    let options = RunOptions::default().with_policy(FailurePolicy::SkipRow);
    let run = dag
        .execute_with(&delays(&[300, 300, 300, 300, 300, 1500]), settings, &options)
        .await
        .unwrap();

    for row in 0..5 {
        assert_eq!(run.dataset.value(row, "waited"), Some(&json!(300)));
        assert_eq!(run.dataset.value(row, ERRORS_COLUMN), Some(&Value::Null));
    }
    assert_eq!(run.dataset.value(5, "waited"), Some(&Value::Null));
    assert_eq!(run.skipped_rows.len(), 1);
    assert_eq!(run.skipped_rows[0].row, 5);
    assert!(run.skipped_rows[0].message.contains("timed out"));
}

fn cells() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,4}".prop_map(|s| json!(s)),
        Just(Value::Null),
    ]
}

proptest! {
    #[test]
    fn skip_row_preserves_row_count(values in proptest::collection::vec(cells(), 0..20)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let data = Dataset::from_columns(vec![("n".to_string(), values.clone())]).unwrap();

        let mut dag = OperatorDag::new();
        dag.add(make_parity(Value::Null).unwrap()).unwrap();

        let options = RunOptions::default().with_policy(FailurePolicy::SkipRow);
        let settings = Arc::new(Settings::default().with_cache(false));
        let run = rt.block_on(dag.execute_with(&data, settings, &options)).unwrap();

        prop_assert_eq!(run.dataset.num_rows(), values.len());
        prop_assert!(run.dataset.has_column(ERRORS_COLUMN));

        let failed = values.iter().filter(|v| v.as_i64().is_none()).count();
        prop_assert_eq!(run.skipped_rows.len(), failed);
    }
}
