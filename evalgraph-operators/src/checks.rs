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

//! Pre-configured checks for common evaluations
//!
//! Instead of assembling operator descriptors by hand, use a built-in check:
//!
//! ```rust,ignore
//! use evalgraph_core::CheckSet;
//! use evalgraph_operators::checks;
//!
//! let report = CheckSet::new(vec![
//!     checks::check_context_relevance(),
//!     checks::check_response_facts(),
//!     checks::check_tone_quality("friendly support agent"),
//! ])
//! .run_all(&data, settings)
//! .await?;
//! ```

use evalgraph_core::{Check, OperatorDescriptor};
use serde_json::{json, Value};

fn single(name: &str, type_name: &str, parameters: Value) -> Check {
    Check::new(name, vec![OperatorDescriptor::new(type_name, parameters)])
}

/// Does the retrieved context hold what the question needs?
///
/// Reads: `question`, `context`. Writes: `score_context_relevance`.
pub fn check_context_relevance() -> Check {
    single("score_context_relevance", "ContextRelevance", Value::Null)
}

/// Are the response's claims supported by the context?
///
/// Reads: `question`, `context`, `response`. Writes: `score_factual_accuracy`.
pub fn check_response_facts() -> Check {
    single("score_factual_accuracy", "ResponseFactualScore", Value::Null)
}

/// Does the response address every part of the question?
pub fn check_response_completeness() -> Check {
    single("response_completeness_score", "ResponseCompleteness", Value::Null)
}

/// Does the response use everything relevant from the context?
pub fn check_response_completeness_wrt_context() -> Check {
    single(
        "response_completeness_wrt_context_score",
        "ResponseCompletenessWrtContext",
        Value::Null,
    )
}

pub fn check_response_relevance() -> Check {
    single("response_relevance_score", "ResponseRelevance", Value::Null)
}

pub fn check_response_consistency() -> Check {
    single("response_consistency_score", "ResponseConsistency", Value::Null)
}

/// Flags refusals and empty answers
pub fn check_valid_response() -> Check {
    single("valid_response_score", "ValidResponseScore", Value::Null)
}

pub fn check_response_conciseness() -> Check {
    single("response_conciseness_score", "ResponseConciseness", Value::Null)
}

/// Compare responses against `ground_truth` using `exact`, `rouge` or `llm`
pub fn check_response_matching(method: &str) -> Check {
    single(
        &format!("{}_score", method),
        "ResponseMatchingScore",
        json!({"method": method}),
    )
}

/// Fluency, coherence, grammar and politeness of the response
pub fn check_language_quality() -> Check {
    single("language_critique_score", "LanguageCritique", Value::Null)
}

/// Does the response's tone fit `llm_persona`?
pub fn check_tone_quality(llm_persona: &str) -> Check {
    single(
        "tone_critique_score",
        "ToneCritique",
        json!({"llm_persona": llm_persona}),
    )
}

/// Does the response follow `guideline`?
///
/// The score lands in `score_{guideline_name}_adherence`.
pub fn check_guideline_adherence(
    guideline: &str,
    guideline_name: &str,
    response_schema: Option<&str>,
) -> Check {
    single(
        &format!("{}_adherence_score", guideline_name),
        "GuidelineAdherenceScore",
        json!({
            "guideline": guideline,
            "guideline_name": guideline_name,
            "response_schema": response_schema,
        }),
    )
}

pub fn check_prompt_injection() -> Check {
    single("prompt_injection_score", "PromptInjectionScore", Value::Null)
}

/// How satisfied was the user with the whole conversation?
///
/// Reads: `conversation`. `llm_persona` of `None` leaves the assistant undescribed.
pub fn check_conversation_satisfaction(user_persona: &str, llm_persona: Option<&str>) -> Check {
    single(
        "conversation_satisfaction_score",
        "ConversationSatisfactionScore",
        json!({"user_persona": user_persona, "llm_persona": llm_persona}),
    )
}

pub fn check_code_hallucination() -> Check {
    single("code_hallucination_score", "CodeHallucinationScore", Value::Null)
}

/// Is the user trying to jailbreak the assistant?
pub fn check_jailbreak_detection() -> Check {
    single("jailbreak_detection_score", "JailbreakDetectionScore", Value::Null)
}

/// Built-in checks usable without arguments, by name
pub const BUILTIN_NAMES: &[&str] = &[
    "context_relevance",
    "response_facts",
    "response_completeness",
    "response_completeness_wrt_context",
    "response_relevance",
    "response_consistency",
    "valid_response",
    "response_conciseness",
    "response_matching",
    "language_quality",
    "tone_quality",
    "prompt_injection",
    "conversation_satisfaction",
    "code_hallucination",
    "jailbreak_detection",
];

/// Look up a built-in check, using default arguments where it takes any.
///
/// Guideline adherence needs a guideline and is not available by name.
pub fn by_name(name: &str) -> Option<Check> {
    let check = match name {
        "context_relevance" => check_context_relevance(),
        "response_facts" => check_response_facts(),
        "response_completeness" => check_response_completeness(),
        "response_completeness_wrt_context" => check_response_completeness_wrt_context(),
        "response_relevance" => check_response_relevance(),
        "response_consistency" => check_response_consistency(),
        "valid_response" => check_valid_response(),
        "response_conciseness" => check_response_conciseness(),
        "response_matching" => check_response_matching("llm"),
        "language_quality" => check_language_quality(),
        "tone_quality" => check_tone_quality("helpful-chatbot"),
        "prompt_injection" => check_prompt_injection(),
        "conversation_satisfaction" => check_conversation_satisfaction("user", None),
        "code_hallucination" => check_code_hallucination(),
        "jailbreak_detection" => check_jailbreak_detection(),
        _ => return None,
    };
    Some(check)
}
