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

//! Evalgraph CLI
//!
//! Runs checks over a dataset file from the command line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use evalgraph_core::{
    list_operators, CancellationToken, CheckSet, CheckSetReport, Dataset, FailurePolicy,
    OperatorRegistry, RunOptions, Settings,
};
use evalgraph_operators::checks;
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evalgraph")]
#[command(about = "Evalgraph - operator DAGs for evaluating LLM outputs", long_about = None)]
struct Cli {
    /// Settings file (TOML); environment variables override it
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every variant of a check document over a dataset
    Run {
        /// Check or check set JSON file, or `builtin:<name>`
        #[arg(short, long)]
        check: String,

        /// Input dataset (.csv, .json or .jsonl)
        #[arg(short, long)]
        data: PathBuf,

        /// Output file; with several variants the label is added to the file name
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Failure policy: fail-fast or skip-row
        #[arg(long, default_value = "fail-fast")]
        policy: FailurePolicy,
    },

    /// Build and resolve every variant without running anything
    Validate {
        #[arg(short, long)]
        check: String,

        #[arg(short, long)]
        data: PathBuf,
    },

    /// List the variant labels a check document expands to
    Expand {
        #[arg(short, long)]
        check: String,
    },

    /// List registered operator types
    Operators,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(cli.settings.as_deref())?;

    // Setup logging; RUST_LOG wins over settings
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        settings.log_level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    evalgraph_operators::register_all().context("Failed to register built-in operators")?;

    match cli.command {
        Commands::Run {
            check,
            data,
            out,
            policy,
        } => {
            let set = load_checks(&check)?;
            let dataset = load_dataset(&data)?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing the current layer");
                    on_interrupt.cancel();
                }
            });

            let options = RunOptions::default()
                .with_policy(policy)
                .with_cancel(cancel);
            let report = set
                .run_all_with(&dataset, Arc::new(settings), &options)
                .await?;

            if let Some(out) = &out {
                write_outputs(&report, out)?;
            }
            print_report(&report, cli.json)?;

            if !report.is_success() {
                bail!("{} variant(s) failed", report.failures.len());
            }
        }

        Commands::Validate { check, data } => {
            let set = load_checks(&check)?;
            let dataset = load_dataset(&data)?;
            let problems = validate(&set, evalgraph_core::registry::global(), dataset.columns(), cli.json)?;
            if problems > 0 {
                bail!("{} variant(s) are invalid", problems);
            }
        }

        Commands::Expand { check } => {
            let labels = load_checks(&check)?.labels();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&labels)?);
            } else {
                for label in &labels {
                    println!("{}", label);
                }
                println!("{} variant(s)", labels.len());
            }
        }

        Commands::Operators => {
            let operators = list_operators();
            if cli.json {
                let listing: Vec<_> = operators
                    .iter()
                    .map(|op| json!({"type_name": op.type_name, "custom": op.custom}))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                println!("Registered operators ({}):", operators.len());
                for op in &operators {
                    let origin = if op.custom { "custom" } else { "built-in" };
                    println!("  {:<34} {}", op.type_name, origin);
                }
            }
        }
    }

    Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::from_toml_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::from_env().context("Invalid settings in environment")?,
    };
    Ok(settings)
}

/// A check document path, or `builtin:<name>` for a built-in check
fn load_checks(source: &str) -> Result<CheckSet> {
    if let Some(name) = source.strip_prefix("builtin:") {
        let check = checks::by_name(name).with_context(|| {
            format!(
                "Unknown built-in check '{}' (available: {})",
                name,
                checks::BUILTIN_NAMES.join(", ")
            )
        })?;
        return Ok(CheckSet::new(vec![check]));
    }
    CheckSet::load(source).with_context(|| format!("Failed to load checks from {}", source))
}

fn load_dataset(path: &Path) -> Result<Dataset> {
    let dataset =
        Dataset::load(path).with_context(|| format!("Failed to load dataset from {}", path.display()))?;
    info!(
        "Loaded {} rows x {} columns from {}",
        dataset.num_rows(),
        dataset.num_columns(),
        path.display()
    );
    Ok(dataset)
}

/// Resolve every variant; returns how many failed
fn validate(set: &CheckSet, registry: &OperatorRegistry, columns: &[String], as_json: bool) -> Result<usize> {
    let mut entries = Vec::new();
    let mut problems = 0;

    for check in &set.checks {
        for (label, built) in check.labels().into_iter().zip(check.expand(registry)) {
            let outcome = built.and_then(|variant| {
                let plan = variant.resolve(columns)?;
                let names = variant.dag.node_names();
                Ok(plan
                    .layers
                    .iter()
                    .map(|layer| layer.iter().map(|&i| names[i].to_string()).collect::<Vec<_>>())
                    .collect::<Vec<_>>())
            });

            match outcome {
                Ok(layers) => {
                    if !as_json {
                        println!("✓ {}", label);
                        for (depth, layer) in layers.iter().enumerate() {
                            println!("    layer {}: {}", depth, layer.join(", "));
                        }
                    }
                    entries.push(json!({"label": label, "valid": true, "layers": layers}));
                }
                Err(e) => {
                    problems += 1;
                    if !as_json {
                        println!("✗ {}: {}", label, e);
                    }
                    entries.push(json!({"label": label, "valid": false, "error": e.to_string()}));
                }
            }
        }
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    }
    Ok(problems)
}

/// `out.jsonl` for a single variant, `out.<label>.jsonl` otherwise.
///
/// Labels that sanitize to the same tag get the variant index appended, so no
/// variant overwrites another.
fn output_paths(out: &Path, labels: &[&str]) -> Vec<PathBuf> {
    if labels.len() == 1 {
        return vec![out.to_path_buf()];
    }

    let stem = out
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    let mut used = HashSet::new();

    labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let tag: String = label
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect();
            let base = tag.trim_matches('_').to_string();
            let mut tag = base.clone();
            let mut suffix = i;
            while !used.insert(tag.clone()) {
                tag = format!("{}_{}", base, suffix);
                suffix += 1;
            }

            let name = match out.extension() {
                Some(ext) => format!("{}.{}.{}", stem, tag, ext.to_string_lossy()),
                None => format!("{}.{}", stem, tag),
            };
            out.with_file_name(name)
        })
        .collect()
}

fn write_outputs(report: &CheckSetReport, out: &Path) -> Result<()> {
    let labels: Vec<&str> = report.results.iter().map(|r| r.label.as_str()).collect();
    for (result, path) in report.results.iter().zip(output_paths(out, &labels)) {
        result
            .run
            .dataset
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {} to {}", result.label, path.display());
    }
    Ok(())
}

fn print_report(report: &CheckSetReport, as_json: bool) -> Result<()> {
    if as_json {
        let results: Vec<_> = report
            .results
            .iter()
            .map(|r| {
                json!({
                    "label": r.label,
                    "check": r.check,
                    "complete": r.run.complete,
                    "rows": r.run.dataset.num_rows(),
                    "columns": r.run.dataset.columns(),
                    "operators_run": r.run.operators_run,
                    "skipped_rows": r.run.skipped_rows,
                })
            })
            .collect();
        let summary = json!({"results": results, "failures": report.failures});
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for r in &report.results {
        let status = if r.run.complete { "✓" } else { "…" };
        println!(
            "{} {}: {} rows, {} columns, {} operators",
            status,
            r.label,
            r.run.dataset.num_rows(),
            r.run.dataset.num_columns(),
            r.run.operators_run
        );
        if !r.run.complete {
            println!("    incomplete: run was cancelled");
        }
        for skipped in &r.run.skipped_rows {
            println!("    row {} skipped by {}: {}", skipped.row, skipped.operator, skipped.message);
        }
    }
    for f in &report.failures {
        println!("✗ {}: {}", f.label, f.message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_paths() {
        let out = Path::new("results/scores.jsonl");
        assert_eq!(
            output_paths(out, &["length"]),
            vec![PathBuf::from("results/scores.jsonl")]
        );
        assert_eq!(
            output_paths(out, &["length[threshold=2]", "length[threshold=4]"]),
            vec![
                PathBuf::from("results/scores.length_threshold_2.jsonl"),
                PathBuf::from("results/scores.length_threshold_4.jsonl"),
            ]
        );
        assert_eq!(
            output_paths(Path::new("scores"), &["a[k=1]", "b"]),
            vec![PathBuf::from("scores.a_k_1"), PathBuf::from("scores.b")]
        );
    }

    #[test]
    fn test_output_paths_never_collide() {
        let out = Path::new("scores.csv");
        let paths = output_paths(out, &["c[k=a b]", "c[k=a/b]", "c[k=a_b]"]);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("scores.c_k_a_b.csv"),
                PathBuf::from("scores.c_k_a_b_1.csv"),
                PathBuf::from("scores.c_k_a_b_2.csv"),
            ]
        );
    }

    #[test]
    fn test_load_checks() {
        let set = load_checks("builtin:context_relevance").unwrap();
        assert_eq!(set.labels(), vec!["score_context_relevance"]);
        assert!(load_checks("builtin:nope").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check.json");
        std::fs::write(
            &path,
            r#"{"name": "length", "operators": [{"type_name": "WordCount"}],
                "experiment_args": {"col_out": ["a", "b"]}}"#,
        )
        .unwrap();
        let set = load_checks(path.to_str().unwrap()).unwrap();
        assert_eq!(set.labels(), vec!["length[col_out=a]", "length[col_out=b]"]);
    }

    #[test]
    fn test_validate_reports_unresolved_columns() {
        let registry = OperatorRegistry::new();
        evalgraph_operators::register_builtins(&registry).unwrap();

        let set = load_checks("builtin:context_relevance").unwrap();
        let problems = validate(&set, &registry, &["question".to_string()], true).unwrap();
        assert_eq!(problems, 1);

        let columns = vec!["question".to_string(), "context".to_string()];
        assert_eq!(validate(&set, &registry, &columns, true).unwrap(), 0);
    }
}
