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

//! Checks: named, parameterizable evaluations
//!
//! A [`Check`] is a template of operator descriptors plus optional
//! [`ExperimentArgs`]. Expanding it yields one DAG per argument combination.
//! A [`CheckSet`] runs every variant of every check and collects successes and
//! failures side by side.

use crate::cache::ResultCache;
use crate::dag::{DagRun, ExecutionPlan, OperatorDag, RunOptions};
use crate::dataset::Dataset;
use crate::error::{EvalGraphError, Result};
use crate::experiment::{ExperimentArgs, Variant};
use crate::operator::{Operator, OperatorDescriptor};
use crate::registry::{self, OperatorRegistry};
use crate::settings::Settings;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub operators: Vec<OperatorDescriptor>,
    #[serde(default, skip_serializing_if = "ExperimentArgs::is_empty")]
    pub experiment_args: ExperimentArgs,
}

/// A concrete DAG for one argument combination
pub struct ExpandedVariant {
    /// `check` or `check[name=value,...]`
    pub label: String,
    pub variant: Variant,
    pub dag: OperatorDag,
    /// Assignments no operator parameter absorbed; added as constant columns
    pub constants: Vec<(String, Value)>,
}

impl ExpandedVariant {
    /// The input dataset with constant columns attached
    pub fn prepare(&self, dataset: &Dataset) -> Result<Dataset> {
        let mut out = dataset.clone();
        for (name, value) in &self.constants {
            out = out.with_column(name.clone(), vec![value.clone(); dataset.num_rows()])?;
        }
        Ok(out)
    }

    /// Resolve the variant's DAG against `columns` plus its constant columns
    pub fn resolve(&self, columns: &[String]) -> Result<ExecutionPlan> {
        let mut all = columns.to_vec();
        all.extend(self.constants.iter().map(|(n, _)| n.clone()));
        self.dag.resolve(&all)
    }
}

impl Check {
    pub fn new(name: impl Into<String>, operators: Vec<OperatorDescriptor>) -> Self {
        Self {
            name: name.into(),
            operators,
            experiment_args: ExperimentArgs::default(),
        }
    }

    pub fn with_experiment_args(mut self, args: ExperimentArgs) -> Self {
        self.experiment_args = args;
        self
    }

    /// Build the template DAG without applying any experiment arguments
    pub fn build_dag(&self, registry: &OperatorRegistry) -> Result<OperatorDag> {
        let mut dag = OperatorDag::new();
        for descriptor in &self.operators {
            dag.add(registry.deserialize(descriptor)?)?;
        }
        Ok(dag)
    }

    fn label_for(&self, variant: &Variant) -> String {
        if variant.label.is_empty() {
            self.name.clone()
        } else {
            format!("{}[{}]", self.name, variant.label)
        }
    }

    /// Variant labels in expansion order
    pub fn labels(&self) -> Vec<String> {
        self.experiment_args
            .variants()
            .map(|v| self.label_for(&v))
            .collect()
    }

    /// Build the DAG for one assignment.
    ///
    /// An argument overrides every operator parameter of the same name; an
    /// argument no operator declares becomes a constant column.
    pub fn build_variant(&self, registry: &OperatorRegistry, variant: Variant) -> Result<ExpandedVariant> {
        let mut absorbed = vec![false; variant.assignment.len()];
        let mut dag = OperatorDag::new();

        for descriptor in &self.operators {
            let template = registry.deserialize(descriptor)?;
            let mut parameters = template.parameters();
            let mut overridden = false;

            if let Value::Object(map) = &mut parameters {
                for (i, (name, value)) in variant.assignment.iter().enumerate() {
                    if let Some(slot) = map.get_mut(name) {
                        *slot = value.clone();
                        absorbed[i] = true;
                        overridden = true;
                    }
                }
            }

            let op: Box<dyn Operator> = if overridden {
                registry.deserialize(&OperatorDescriptor::new(
                    descriptor.type_name.clone(),
                    parameters,
                ))?
            } else {
                template
            };
            dag.add(op)?;
        }

        let constants = variant
            .assignment
            .iter()
            .zip(absorbed)
            .filter(|(_, used)| !used)
            .map(|((name, value), _)| (name.clone(), value.clone()))
            .collect();

        Ok(ExpandedVariant {
            label: self.label_for(&variant),
            variant,
            dag,
            constants,
        })
    }

    /// Lazily build one DAG per argument combination, in declaration order.
    /// Each call restarts the expansion.
    pub fn expand<'a>(
        &'a self,
        registry: &'a OperatorRegistry,
    ) -> impl Iterator<Item = Result<ExpandedVariant>> + 'a {
        self.experiment_args
            .variants()
            .map(move |variant| self.build_variant(registry, variant))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Successful variant
#[derive(Debug, Clone)]
pub struct VariantResult {
    pub label: String,
    pub check: String,
    pub run: DagRun,
}

/// Failed variant, with the failing operator and row when known
#[derive(Debug, Clone, Serialize)]
pub struct VariantFailure {
    pub label: String,
    pub check: String,
    pub operator: Option<String>,
    pub row: Option<usize>,
    pub message: String,
}

impl VariantFailure {
    fn new(label: String, check: String, error: &EvalGraphError) -> Self {
        let (operator, row) = match error {
            EvalGraphError::OperatorRuntime { operator, row, .. } => (Some(operator.clone()), *row),
            EvalGraphError::UnresolvedSignal { operator, .. } => (Some(operator.clone()), None),
            _ => (None, None),
        };
        Self {
            label,
            check,
            operator,
            row,
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckSetReport {
    pub results: Vec<VariantResult>,
    pub failures: Vec<VariantFailure>,
}

impl CheckSetReport {
    pub fn get(&self, label: &str) -> Option<&VariantResult> {
        self.results.iter().find(|r| r.label == label)
    }

    pub fn failure(&self, label: &str) -> Option<&VariantFailure> {
        self.failures.iter().find(|f| f.label == label)
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// True when every successful variant ran to completion
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(|r| r.run.complete)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckSet {
    pub checks: Vec<Check>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CheckDocument {
    Set(CheckSet),
    Single(Check),
}

impl CheckSet {
    pub fn new(checks: Vec<Check>) -> Self {
        Self { checks }
    }

    pub fn with_check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn labels(&self) -> Vec<String> {
        self.checks.iter().flat_map(|c| c.labels()).collect()
    }

    /// Check names key the report, so each must be unique
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (i, check) in self.checks.iter().enumerate() {
            if let Some(first) = seen.insert(check.name.as_str(), i) {
                return Err(EvalGraphError::NameCollision {
                    name: check.name.clone(),
                    existing: format!("check #{}", first),
                    incoming: format!("check #{}", i),
                });
            }
        }
        Ok(())
    }

    /// Run every variant of every check against the process-wide registry
    pub async fn run_all(&self, dataset: &Dataset, settings: Arc<Settings>) -> Result<CheckSetReport> {
        self.run_all_with(dataset, settings, &RunOptions::default())
            .await
    }

    pub async fn run_all_with(
        &self,
        dataset: &Dataset,
        settings: Arc<Settings>,
        options: &RunOptions,
    ) -> Result<CheckSetReport> {
        self.run_all_in(registry::global(), dataset, settings, options)
            .await
    }

    /// Run every variant; variants execute concurrently and a failing variant
    /// never stops its siblings. Every variant draws from one permit pool, so
    /// the concurrency limit bounds the whole set.
    ///
    /// Only invalid settings or duplicate check names fail the whole call.
    pub async fn run_all_in(
        &self,
        registry: &OperatorRegistry,
        dataset: &Dataset,
        settings: Arc<Settings>,
        options: &RunOptions,
    ) -> Result<CheckSetReport> {
        settings.validate()?;
        self.validate()?;
        let cache = ResultCache::from_settings(&settings)?.map(Arc::new);

        let permits = options
            .permits
            .clone()
            .unwrap_or_else(|| Arc::new(Semaphore::new(settings.concurrency_limit)));
        let shared = options.clone().with_permits(permits);
        let options = &shared;

        let mut planned = Vec::new();
        for check in &self.checks {
            for (variant, built) in check.experiment_args.variants().zip(check.expand(registry)) {
                planned.push((check.name.clone(), check.label_for(&variant), built));
            }
        }

        info!(
            "Running {} checks ({} variants) over {} rows",
            self.checks.len(),
            planned.len(),
            dataset.num_rows()
        );

        let cache_ref = &cache;
        let settings_ref = &settings;
        let outcomes: Vec<(String, String, Result<DagRun>)> = stream::iter(planned)
            .map(|(check, label, built)| async move {
                let outcome = match built {
                    Ok(mut variant) => {
                        variant.dag.set_cache(cache_ref.clone());
                        match variant.prepare(dataset) {
                            Ok(input) => {
                                variant
                                    .dag
                                    .execute_with(&input, Arc::clone(settings_ref), options)
                                    .await
                            }
                            Err(e) => Err(e),
                        }
                    }
                    Err(e) => Err(e),
                };
                (check, label, outcome)
            })
            .buffered(settings.concurrency_limit)
            .collect()
            .await;

        let mut report = CheckSetReport::default();
        for (check, label, outcome) in outcomes {
            match outcome {
                Ok(run) => report.results.push(VariantResult { label, check, run }),
                Err(e) => {
                    warn!("Variant {} failed: {}", label, e);
                    report.failures.push(VariantFailure::new(label, check, &e));
                }
            }
        }

        if let Some(cache) = &cache {
            cache.flush().await;
        }

        info!(
            "Check set finished: {} succeeded, {} failed",
            report.results.len(),
            report.failures.len()
        );
        Ok(report)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse either a check set document or a single check document
    pub fn from_json(json: &str) -> Result<Self> {
        let set = match serde_json::from_str::<CheckDocument>(json) {
            Ok(CheckDocument::Set(set)) => set,
            Ok(CheckDocument::Single(check)) => CheckSet::new(vec![check]),
            // re-parse as a check to surface a precise error
            Err(_) => CheckSet::new(vec![serde_json::from_str::<Check>(json)?]),
        };
        set.validate()?;
        Ok(set)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::RowView;
    use crate::error::OperatorError;
    use crate::operator::{parse_parameters, run_rows, OperatorOutput, RowOperator, RunContext};
    use crate::signal::Signal;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct SuffixParams {
        #[serde(default = "default_col_in")]
        col_in: String,
        #[serde(default = "default_col_out")]
        col_out: String,
        #[serde(default)]
        suffix: String,
    }

    fn default_col_in() -> String {
        "text".to_string()
    }

    fn default_col_out() -> String {
        "suffixed".to_string()
    }

    struct Suffix {
        params: SuffixParams,
    }

    #[async_trait]
    impl RowOperator for Suffix {
        async fn evaluate_row(
            &self,
            row: RowView<'_>,
            _ctx: &RunContext,
        ) -> std::result::Result<Vec<Value>, OperatorError> {
            let text = row.str(&self.params.col_in)?;
            Ok(vec![json!(format!("{}{}", text, self.params.suffix))])
        }
    }

    #[async_trait]
    impl Operator for Suffix {
        fn type_name(&self) -> &str {
            "Suffix"
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
        async fn run(
            &self,
            dataset: &Dataset,
            ctx: &RunContext,
        ) -> std::result::Result<OperatorOutput, OperatorError> {
            run_rows(self, &self.output_columns(), dataset, ctx).await
        }
    }

    fn make_suffix(params: Value) -> Result<Box<dyn Operator>> {
        Ok(Box::new(Suffix {
            params: parse_parameters("Suffix", params)?,
        }))
    }

    fn registry() -> OperatorRegistry {
        let registry = OperatorRegistry::new();
        registry.register("Suffix", make_suffix).unwrap();
        registry
    }

    fn check() -> Check {
        Check::new(
            "suffix",
            vec![OperatorDescriptor::new("Suffix", json!({}))],
        )
        .with_experiment_args(
            ExperimentArgs::new()
                .with_arg("suffix", vec![json!("!"), json!("?")])
                .with_arg("k", vec![json!(1), json!(2)]),
        )
    }

    fn data() -> Dataset {
        Dataset::from_columns(vec![("text".to_string(), vec![json!("hi"), json!("yo")])]).unwrap()
    }

    #[test]
    fn test_expand_overrides_and_constants() {
        let registry = registry();
        let check = check();

        let variants: Vec<ExpandedVariant> = check.expand(&registry).collect::<Result<_>>().unwrap();
        assert_eq!(variants.len(), 4);
        assert_eq!(variants[1].label, "suffix[suffix=!,k=2]");

        let descriptor = &variants[2].dag.descriptors()[0];
        assert_eq!(descriptor.parameters["suffix"], json!("?"));
        assert_eq!(variants[2].constants, vec![("k".to_string(), json!(1))]);

        // restartable
        assert_eq!(check.expand(&registry).count(), 4);
    }

    #[tokio::test]
    async fn test_run_all_collects_results_and_failures() {
        let registry = registry();
        let broken = Check::new(
            "broken",
            vec![OperatorDescriptor::new("Suffix", json!({"col_in": "missing"}))],
        );
        let set = CheckSet::new(vec![check(), broken]);

        let report = set
            .run_all_in(&registry, &data(), Arc::new(Settings::default()), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.results.len(), 4);
        assert_eq!(report.failures.len(), 1);

        let result = report.get("suffix[suffix=?,k=2]").unwrap();
        assert_eq!(result.run.dataset.columns(), &["text", "k", "suffixed"]);
        assert_eq!(result.run.dataset.value(1, "suffixed"), Some(&json!("yo?")));
        assert_eq!(result.run.dataset.value(0, "k"), Some(&json!(2)));

        let failure = report.failure("broken").unwrap();
        assert_eq!(failure.operator.as_deref(), Some("Suffix_0"));
        assert!(!report.is_success());
    }

    #[test]
    fn test_document_forms() {
        let single = check().to_json().unwrap();
        let set = CheckSet::from_json(&single).unwrap();
        assert_eq!(set.checks, vec![check()]);

        let json = set.to_json().unwrap();
        assert_eq!(CheckSet::from_json(&json).unwrap(), set);
        assert_eq!(set.labels().len(), 4);

        assert!(CheckSet::from_json("{\"operators\": []}").is_err());
    }

    #[tokio::test]
    async fn test_duplicate_check_names_rejected() {
        let set = CheckSet::new(vec![check(), check()]);
        assert!(matches!(
            set.validate(),
            Err(EvalGraphError::NameCollision { ref name, .. }) if name == "suffix"
        ));

        let result = set
            .run_all_in(&registry(), &data(), Arc::new(Settings::default()), &RunOptions::default())
            .await;
        assert!(matches!(result, Err(EvalGraphError::NameCollision { .. })));

        assert!(CheckSet::from_json(&set.to_json().unwrap()).is_err());
    }
}
