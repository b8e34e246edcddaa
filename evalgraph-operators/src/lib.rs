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

//! # Evalgraph Operators
//!
//! Built-in operators for the evalgraph engine.
//!
//! ## Operators
//!
//! - **Text statistics**: `WordCount`, `TextLength`, threshold scoring with `Accuracy`
//! - **Matching**: `ResponseMatchingScore` (exact, ROUGE-L or LLM-judged)
//! - **LLM judges**: factual accuracy, completeness, relevance, conciseness,
//!   consistency, tone, language quality, guideline adherence, jailbreak and
//!   prompt-injection detection, conversation satisfaction, code hallucination
//! - **I/O**: `CsvReader`, `JsonReader`, `CsvWriter`, `JsonWriter`
//!
//! Call [`register_builtins`] (or [`register_all`] for the process-wide registry)
//! before deserializing checks that use these operators.

pub mod checks;
pub mod io;
pub mod language;
pub mod llm_client;
pub mod matching;
pub mod text;

use evalgraph_core::{OperatorConstructor, OperatorRegistry};

pub use language::{LlmJudge, MetricSpec};
pub use llm_client::{
    client_from_settings, AnthropicClient, LlmClient, LlmError, LlmResponse, OpenAiClient, TokenUsage,
};
pub use matching::{rouge_l, ResponseMatchingScore, ScenarioDescription};
pub use text::{Accuracy, Comparison, TextLength, WordCount};

/// Every built-in operator type with its constructor
pub fn builtins() -> Vec<(&'static str, OperatorConstructor)> {
    let mut ops: Vec<(&'static str, OperatorConstructor)> = vec![
        ("WordCount", WordCount::new as OperatorConstructor),
        ("TextLength", TextLength::new as OperatorConstructor),
        ("Accuracy", Accuracy::new as OperatorConstructor),
        ("ResponseMatchingScore", ResponseMatchingScore::new as OperatorConstructor),
        ("CsvReader", io::csv_reader as OperatorConstructor),
        ("JsonReader", io::json_reader as OperatorConstructor),
        ("CsvWriter", io::csv_writer as OperatorConstructor),
        ("JsonWriter", io::json_writer as OperatorConstructor),
    ];
    ops.extend(language::judges());
    ops
}

/// Register the built-in operators; repeated calls are no-ops
pub fn register_builtins(registry: &OperatorRegistry) -> evalgraph_core::Result<()> {
    for (type_name, constructor) in builtins() {
        registry.register(type_name, constructor)?;
    }
    Ok(())
}

/// Register the built-in operators with the process-wide registry
pub fn register_all() -> evalgraph_core::Result<()> {
    register_builtins(evalgraph_core::registry::global())
}
