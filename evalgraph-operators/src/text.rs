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

//! Local text statistics and threshold scoring

use evalgraph_core::{
    async_trait, parse_parameters, run_rows, Dataset, Operator, OperatorError, OperatorOutput,
    RowOperator, RowView, RunContext, Signal,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn text_column() -> String {
    "text".to_string()
}

fn word_count_column() -> String {
    "word_count".to_string()
}

fn text_length_column() -> String {
    "text_length".to_string()
}

/// Parameters shared by the single-column text statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WordCountParams {
    #[serde(default = "text_column")]
    pub col_in: String,
    #[serde(default = "word_count_column")]
    pub col_out: String,
}

/// Number of whitespace-separated words
pub struct WordCount {
    params: WordCountParams,
}

impl WordCount {
    pub fn new(params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
        Ok(Box::new(Self {
            params: parse_parameters("WordCount", params)?,
        }))
    }
}

#[async_trait]
impl RowOperator for WordCount {
    async fn evaluate_row(&self, row: RowView<'_>, _ctx: &RunContext) -> Result<Vec<Value>, OperatorError> {
        let text = row.str(&self.params.col_in)?;
        Ok(vec![json!(text.split_whitespace().count())])
    }
}

#[async_trait]
impl Operator for WordCount {
    fn type_name(&self) -> &str {
        "WordCount"
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

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextLengthParams {
    #[serde(default = "text_column")]
    pub col_in: String,
    #[serde(default = "text_length_column")]
    pub col_out: String,
}

/// Number of characters (Unicode scalar values)
pub struct TextLength {
    params: TextLengthParams,
}

impl TextLength {
    pub fn new(params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
        Ok(Box::new(Self {
            params: parse_parameters("TextLength", params)?,
        }))
    }
}

#[async_trait]
impl RowOperator for TextLength {
    async fn evaluate_row(&self, row: RowView<'_>, _ctx: &RunContext) -> Result<Vec<Value>, OperatorError> {
        let text = row.str(&self.params.col_in)?;
        Ok(vec![json!(text.chars().count())])
    }
}

#[async_trait]
impl Operator for TextLength {
    fn type_name(&self) -> &str {
        "TextLength"
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

/// Comparison applied by [`Accuracy`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    #[default]
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
}

impl Comparison {
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Gte => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Lte => value <= threshold,
            Comparison::Eq => value == threshold,
            Comparison::Ne => value != threshold,
        }
    }
}

fn is_long_column() -> String {
    "is_long".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccuracyParams {
    #[serde(default = "word_count_column")]
    pub col_in: String,
    pub threshold: f64,
    #[serde(default)]
    pub op: Comparison,
    #[serde(default = "is_long_column")]
    pub col_out: String,
}

/// Boolean flag from comparing a numeric column against a threshold
pub struct Accuracy {
    params: AccuracyParams,
}

impl Accuracy {
    pub fn new(params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
        Ok(Box::new(Self {
            params: parse_parameters("Accuracy", params)?,
        }))
    }
}

#[async_trait]
impl RowOperator for Accuracy {
    async fn evaluate_row(&self, row: RowView<'_>, _ctx: &RunContext) -> Result<Vec<Value>, OperatorError> {
        let value = row.f64(&self.params.col_in)?;
        Ok(vec![json!(self.params.op.apply(value, self.params.threshold))])
    }
}

#[async_trait]
impl Operator for Accuracy {
    fn type_name(&self) -> &str {
        "Accuracy"
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
