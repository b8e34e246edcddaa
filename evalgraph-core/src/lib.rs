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

//! # Evalgraph Core
//!
//! Operator DAG engine for evaluating LLM application outputs over tabular data.
//!
//! ## Features
//!
//! - **Trait-based operators**: every pipeline stage implements [`Operator`]
//! - **Registry**: operators are rebuilt from `{type_name, parameters}` descriptors
//! - **Layered execution**: independent operators run concurrently, bounded by settings
//! - **Failure policies**: fail-fast or skip-row with a stable `_errors` column
//! - **Checks**: parameter sweeps expanded into one DAG per combination
//! - **Result caching**: identical operator inputs are replayed, never recomputed
//!
//! ## Example
//!
//! ```rust,ignore
//! use evalgraph_core::{Check, CheckSet, Dataset, OperatorDescriptor, Settings};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let check = Check::new(
//!         "length",
//!         vec![
//!             OperatorDescriptor::new("WordCount", json!({"col_in": "text"})),
//!             OperatorDescriptor::new("Accuracy", json!({"col_in": "word_count", "threshold": 3})),
//!         ],
//!     );
//!
//!     let data = Dataset::load("data.jsonl").unwrap();
//!     let report = CheckSet::new(vec![check])
//!         .run_all(&data, Arc::new(Settings::from_env().unwrap()))
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod cache;
pub mod check;
pub mod dag;
pub mod dataset;
pub mod error;
pub mod experiment;
pub mod operator;
pub mod registry;
pub mod settings;
pub mod signal;

pub use cache::{CacheKey, CacheStats, CachedResult, ResultCache};
pub use check::{Check, CheckSet, CheckSetReport, ExpandedVariant, VariantFailure, VariantResult};
pub use dag::{
    DagDocument, DagRun, ExecutionPlan, FailurePolicy, NodeDescriptor, NodeIndex, OperatorDag,
    RowFailure, RunOptions, ERRORS_COLUMN,
};
pub use dataset::{Dataset, Record, RowView};
pub use error::{EvalGraphError, OperatorError, Result};
pub use experiment::{ExperimentArgs, Variant, Variants};
pub use operator::{
    parse_parameters, run_rows, Operator, OperatorDescriptor, OperatorKind, OperatorOutput,
    RowError, RowOperator, RunContext,
};
pub use registry::{
    deserialize_operator, is_custom, is_registered, list_operators, register_custom_op,
    register_op, OperatorConstructor, OperatorInfo, OperatorRegistry,
};
pub use settings::{LlmProvider, Settings};
pub use signal::Signal;

// Re-exported for operator implementations
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
