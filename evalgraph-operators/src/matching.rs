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

//! Response vs. ground truth matching
//!
//! - `exact`: 1.0 when the trimmed texts are equal
//! - `rouge`: ROUGE-L F1 over lowercased word tokens
//! - `llm`: an LLM judge compares the facts in both answers

use crate::language::{ask_judge, render, score_field};
use crate::llm_client::{client_from_settings, LlmClient};
use evalgraph_core::{
    async_trait, parse_parameters, run_rows, Dataset, EvalGraphError, Operator, OperatorError,
    OperatorOutput, RowOperator, RowView, RunContext, Settings, Signal,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

const METHODS: &[&str] = &["exact", "rouge", "llm"];

const MATCHING_PROMPT: &str = "Compare the response with the ground truth answer to the question.\n\
    The score is the fraction of facts in the ground truth that the response states \
    correctly, penalized for facts in the response that contradict it.\n\n\
    Scenario: {scenario_description}\n\
    Question: {question}\n\
    Ground truth: {ground_truth}\n\
    Response: {response}\n\n\
    Respond with a JSON object: {\"explanation\": \"<reasoning>\", \"score\": <number between 0 and 1>}";

fn question_column() -> String {
    "question".to_string()
}

fn response_column() -> String {
    "response".to_string()
}

fn ground_truth_column() -> String {
    "ground_truth".to_string()
}

fn default_method() -> String {
    "llm".to_string()
}

fn match_column() -> String {
    "score_response_match".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseMatchingParams {
    #[serde(default = "question_column")]
    pub col_question: String,
    #[serde(default = "response_column")]
    pub col_response: String,
    #[serde(default = "ground_truth_column")]
    pub col_ground_truth: String,
    /// One of `exact`, `rouge` or `llm`; checked at setup
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "match_column")]
    pub col_out: String,
    #[serde(default)]
    pub scenario_description: Option<ScenarioDescription>,
}

/// A single scenario line or several
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScenarioDescription {
    Text(String),
    Lines(Vec<String>),
}

impl ScenarioDescription {
    pub fn text(&self) -> String {
        match self {
            ScenarioDescription::Text(text) => text.clone(),
            ScenarioDescription::Lines(lines) => lines.join("\n"),
        }
    }
}

/// Scores how closely each response matches its ground truth
pub struct ResponseMatchingScore {
    params: ResponseMatchingParams,
    client: Option<Arc<dyn LlmClient>>,
}

impl ResponseMatchingScore {
    pub fn new(params: Value) -> evalgraph_core::Result<Box<dyn Operator>> {
        Ok(Box::new(Self::from_params(parse_parameters(
            "ResponseMatchingScore",
            params,
        )?)))
    }

    pub fn from_params(params: ResponseMatchingParams) -> Self {
        Self { params, client: None }
    }

    pub fn with_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.client = Some(client);
        self
    }

    fn uses_llm(&self) -> bool {
        self.params.method == "llm"
    }

    async fn judge(&self, row: RowView<'_>) -> Result<f64, OperatorError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| OperatorError::NotSetUp("ResponseMatchingScore".to_string()))?;

        let question = row.text(&self.params.col_question)?;
        let response = row.text(&self.params.col_response)?;
        let ground_truth = row.text(&self.params.col_ground_truth)?;
        let scenario = self
            .params
            .scenario_description
            .as_ref()
            .map(ScenarioDescription::text)
            .unwrap_or_else(|| "not specified".to_string());

        let prompt = render(MATCHING_PROMPT, |name| match name {
            "question" => Some(question.as_str()),
            "response" => Some(response.as_str()),
            "ground_truth" => Some(ground_truth.as_str()),
            "scenario_description" => Some(scenario.as_str()),
            _ => None,
        });

        let verdict = ask_judge(client.as_ref(), prompt, row.index()).await?;
        score_field(&verdict, "score", row.index())
    }
}

#[async_trait]
impl RowOperator for ResponseMatchingScore {
    async fn evaluate_row(&self, row: RowView<'_>, _ctx: &RunContext) -> Result<Vec<Value>, OperatorError> {
        let score = match self.params.method.as_str() {
            "exact" => {
                let response = row.text(&self.params.col_response)?;
                let ground_truth = row.text(&self.params.col_ground_truth)?;
                if response.trim() == ground_truth.trim() {
                    1.0
                } else {
                    0.0
                }
            }
            "rouge" => {
                let response = row.text(&self.params.col_response)?;
                let ground_truth = row.text(&self.params.col_ground_truth)?;
                rouge_l(&ground_truth, &response)
            }
            _ => self.judge(row).await?,
        };
        Ok(vec![json!(score)])
    }
}

#[async_trait]
impl Operator for ResponseMatchingScore {
    fn type_name(&self) -> &str {
        "ResponseMatchingScore"
    }

    /// The question only feeds the `llm` method
    fn input_signals(&self) -> Vec<Signal> {
        let mut signals = vec![
            Signal::new(&self.params.col_response),
            Signal::new(&self.params.col_ground_truth),
        ];
        if self.uses_llm() {
            signals.insert(0, Signal::new(&self.params.col_question));
        }
        signals
    }

    fn output_columns(&self) -> Vec<String> {
        vec![self.params.col_out.clone()]
    }

    fn parameters(&self) -> Value {
        serde_json::to_value(&self.params).unwrap_or(Value::Null)
    }

    fn setup(&mut self, settings: &Settings) -> evalgraph_core::Result<()> {
        if !METHODS.contains(&self.params.method.as_str()) {
            return Err(EvalGraphError::Configuration(format!(
                "Matching method '{}' is not supported (expected one of: {})",
                self.params.method,
                METHODS.join(", ")
            )));
        }
        if self.uses_llm() && self.client.is_none() {
            self.client = Some(client_from_settings(settings)?);
        }
        Ok(())
    }

    async fn run(&self, dataset: &Dataset, ctx: &RunContext) -> Result<OperatorOutput, OperatorError> {
        run_rows(self, &self.output_columns(), dataset, ctx).await
    }
}

/// Lowercased words with punctuation trimmed from both ends
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|s| s.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn lcs_length(a: &[String], b: &[String]) -> usize {
    let (short, long) = if a.len() < b.len() { (a, b) } else { (b, a) };

    let mut prev = vec![0usize; short.len() + 1];
    let mut curr = vec![0usize; short.len() + 1];

    for i in 1..=long.len() {
        for j in 1..=short.len() {
            curr[j] = if long[i - 1] == short[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[short.len()]
}

/// ROUGE-L F1 of `candidate` against `reference`.
///
/// Two empty texts match perfectly; one empty text scores 0.
pub fn rouge_l(reference: &str, candidate: &str) -> f64 {
    let ref_tokens = tokenize(reference);
    let cand_tokens = tokenize(candidate);

    if ref_tokens.is_empty() && cand_tokens.is_empty() {
        return 1.0;
    }
    if ref_tokens.is_empty() || cand_tokens.is_empty() {
        return 0.0;
    }

    let lcs = lcs_length(&ref_tokens, &cand_tokens) as f64;
    if lcs == 0.0 {
        return 0.0;
    }

    let precision = lcs / cand_tokens.len() as f64;
    let recall = lcs / ref_tokens.len() as f64;
    2.0 * precision * recall / (precision + recall)
}
