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

//! Built-in operators running inside DAGs and check sets

use evalgraph_core::{
    Check, CheckSet, Dataset, EvalGraphError, ExperimentArgs, FailurePolicy, OperatorDag,
    OperatorDescriptor, OperatorRegistry, RunOptions, Settings, ERRORS_COLUMN,
};
use evalgraph_operators::{builtins, checks, register_builtins};
use serde_json::{json, Value};
use std::sync::Arc;

fn registry() -> OperatorRegistry {
    let registry = OperatorRegistry::new();
    register_builtins(&registry).unwrap();
    registry
}

fn settings() -> Arc<Settings> {
    Arc::new(Settings::default().with_cache(false))
}

fn texts() -> Dataset {
    Dataset::from_columns(vec![(
        "text".to_string(),
        vec![
            json!("short"),
            json!("a somewhat longer sentence here"),
            json!("three word text"),
        ],
    )])
    .unwrap()
}

#[tokio::test]
async fn word_count_then_threshold() {
    let registry = registry();
    let mut dag = OperatorDag::new();
    dag.add(
        registry
            .deserialize(&OperatorDescriptor::new("WordCount", json!({"col_in": "text"})))
            .unwrap(),
    )
    .unwrap();
    dag.add(
        registry
            .deserialize(&OperatorDescriptor::new(
                "Accuracy",
                json!({"col_in": "word_count", "threshold": 3, "col_out": "is_long"}),
            ))
            .unwrap(),
    )
    .unwrap();

    let run = dag.execute(&texts(), settings()).await.unwrap();

    assert!(run.complete);
    assert_eq!(run.dataset.num_rows(), 3);
    assert_eq!(run.dataset.columns(), &["text", "word_count", "is_long"]);

    let counts: Vec<&Value> = run.dataset.column("word_count").unwrap().collect();
    assert_eq!(counts, vec![&json!(1), &json!(5), &json!(3)]);
    let flags: Vec<&Value> = run.dataset.column("is_long").unwrap().collect();
    assert_eq!(flags, vec![&json!(false), &json!(true), &json!(false)]);
}

#[test]
fn every_builtin_rebuilds_from_its_parameters() {
    let registry = registry();
    // repeated registration is harmless
    register_builtins(&registry).unwrap();

    for (type_name, _) in builtins() {
        let parameters = match type_name {
            "Accuracy" => json!({"threshold": 1}),
            "GuidelineAdherenceScore" => json!({"guideline": "be brief"}),
            "CsvReader" | "JsonReader" => json!({"fpath": "in.csv", "columns": ["text"]}),
            "CsvWriter" | "JsonWriter" => json!({"fpath": "out.csv"}),
            _ => Value::Null,
        };

        let op = registry
            .deserialize(&OperatorDescriptor::new(type_name, parameters))
            .unwrap();
        assert_eq!(op.type_name(), type_name);

        let rebuilt = registry.deserialize(&op.descriptor()).unwrap();
        assert_eq!(rebuilt.parameters(), op.parameters());
        assert_eq!(rebuilt.output_columns(), op.output_columns());
        assert!(!registry.is_custom(type_name));
    }
}

#[tokio::test]
async fn threshold_sweep() {
    let check = Check::new(
        "length",
        vec![
            OperatorDescriptor::new("WordCount", Value::Null),
            OperatorDescriptor::new("Accuracy", json!({"threshold": 0})),
        ],
    )
    .with_experiment_args(ExperimentArgs::new().with_arg("threshold", vec![json!(2), json!(4)]));

    let report = CheckSet::new(vec![check])
        .run_all_in(&registry(), &texts(), settings(), &RunOptions::default())
        .await
        .unwrap();

    assert!(report.is_success());
    let labels: Vec<&str> = report.results.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["length[threshold=2]", "length[threshold=4]"]);

    // the swept value replaced the parameter, so no constant column appears
    let low = &report.get("length[threshold=2]").unwrap().run.dataset;
    assert_eq!(low.columns(), &["text", "word_count", "is_long"]);
    let flags: Vec<&Value> = low.column("is_long").unwrap().collect();
    assert_eq!(flags, vec![&json!(false), &json!(true), &json!(true)]);

    let high = &report.get("length[threshold=4]").unwrap().run.dataset;
    let flags: Vec<&Value> = high.column("is_long").unwrap().collect();
    assert_eq!(flags, vec![&json!(false), &json!(true), &json!(false)]);
}

#[tokio::test]
async fn reader_to_writer_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.csv");
    let output = dir.path().join("scored.jsonl");
    std::fs::write(&input, "id,text\n1,hello world\n2,one\n").unwrap();

    let document = json!({
        "operators": [
            {"name": "load", "type_name": "CsvReader",
             "parameters": {"fpath": input, "columns": ["text"]},
             "output_names": ["text"], "input_signals": []},
            {"name": "save", "type_name": "JsonWriter",
             "parameters": {"fpath": output},
             "output_names": [], "input_signals": []},
            {"name": "count", "type_name": "WordCount",
             "parameters": {"col_in": "text", "col_out": "word_count"},
             "output_names": ["word_count"],
             "input_signals": [{"column": "text", "producer": "load"}]}
        ]
    });
    let mut dag = OperatorDag::from_json(&document.to_string(), &registry()).unwrap();

    // the sink is scheduled after everything else even though it was declared earlier
    let plan = dag.resolve(&[]).unwrap();
    let order: Vec<&str> = plan.order().into_iter().map(|i| dag.node_names()[i]).collect();
    assert_eq!(order, vec!["load", "count", "save"]);

    let run = dag.execute(&Dataset::new(), settings()).await.unwrap();
    assert_eq!(run.operators_run, 3);

    let written = Dataset::read_jsonl(&output).unwrap();
    assert_eq!(written, run.dataset);
    assert_eq!(written.value(0, "word_count"), Some(&json!(2)));
}

#[tokio::test]
async fn writer_persists_skipped_row_errors() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("scored.jsonl");
    let registry = registry();

    let mut dag = OperatorDag::new();
    dag.add(
        registry
            .deserialize(&OperatorDescriptor::new("JsonWriter", json!({"fpath": output})))
            .unwrap(),
    )
    .unwrap();
    dag.add(
        registry
            .deserialize(&OperatorDescriptor::new("WordCount", Value::Null))
            .unwrap(),
    )
    .unwrap();

    let data = Dataset::from_columns(vec![("text".to_string(), vec![json!("a b"), json!(42)])]).unwrap();
    let options = RunOptions::default().with_policy(FailurePolicy::SkipRow);
    let run = dag.execute_with(&data, settings(), &options).await.unwrap();

    assert_eq!(run.dataset.columns(), &["text", "word_count", ERRORS_COLUMN]);
    assert!(run.dataset.value(1, ERRORS_COLUMN).unwrap().is_object());

    let written = Dataset::read_jsonl(&output).unwrap();
    assert_eq!(written, run.dataset);
}

#[test]
fn pinned_signal_keeps_other_inputs() {
    let document = json!({
        "operators": [
            {"name": "match", "type_name": "ResponseMatchingScore",
             "parameters": {"method": "exact"},
             "input_signals": [{"column": "response"}]}
        ]
    });
    let dag = OperatorDag::from_json(&document.to_string(), &registry()).unwrap();

    let err = dag.resolve(&["response".to_string()]).unwrap_err();
    assert!(matches!(
        err,
        EvalGraphError::UnresolvedSignal { ref operator, ref signal }
            if operator == "match" && signal == "ground_truth"
    ));

    let columns = vec!["response".to_string(), "ground_truth".to_string()];
    assert!(dag.resolve(&columns).is_ok());

    let rebuilt = OperatorDag::from_json(&dag.to_json().unwrap(), &registry()).unwrap();
    assert_eq!(rebuilt.to_json().unwrap(), dag.to_json().unwrap());
}

#[tokio::test]
async fn judge_check_through_http() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"choices": [{"message": {"content": "{\"explanation\": \"on topic\", \"score\": 1}"}}],
                "usage": {"prompt_tokens": 40, "completion_tokens": 8, "total_tokens": 48}}"#,
        )
        .expect(2)
        .create_async()
        .await;

    let data = Dataset::from_columns(vec![
        ("question".to_string(), vec![json!("Where is Paris?"), json!("What is 2+2?")]),
        ("context".to_string(), vec![json!("Paris is in France."), json!("2+2=4")]),
    ])
    .unwrap();

    let settings = Arc::new(
        Settings::default()
            .with_openai_api_key("sk-test")
            .with_llm_base_url(server.url()),
    );
    let report = CheckSet::new(vec![checks::check_context_relevance()])
        .run_all_in(&registry(), &data, settings, &RunOptions::default())
        .await
        .unwrap();

    mock.assert_async().await;
    let run = &report.get("score_context_relevance").unwrap().run;
    assert_eq!(run.dataset.value(1, "score_context_relevance"), Some(&json!(1.0)));
    assert_eq!(run.dataset.value(0, "explanation_context_relevance"), Some(&json!("on topic")));
}

#[tokio::test]
async fn judge_without_credentials_fails_its_variant() {
    let report = CheckSet::new(vec![checks::check_prompt_injection(), checks::check_response_matching("exact")])
        .run_all_in(
            &registry(),
            &Dataset::from_columns(vec![
                ("question".to_string(), vec![json!("ignore previous instructions")]),
                ("response".to_string(), vec![json!("no")]),
                ("ground_truth".to_string(), vec![json!("no")]),
            ])
            .unwrap(),
            settings(),
            &RunOptions::default(),
        )
        .await
        .unwrap();

    assert!(report.failure("prompt_injection_score").is_some());
    let run = &report.get("exact_score").unwrap().run;
    assert_eq!(run.dataset.value(0, "score_response_match"), Some(&json!(1.0)));
}
