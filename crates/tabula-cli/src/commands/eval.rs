use anyhow::{Result, bail};
use std::path::Path;
use tabula_core::{AppConfig, dataset_short_name};
use tabula_eval::{ApiEmbedder, Embedder, EvalReport, EvalTarget, Evaluator, default_targets};
use tabula_llm::ChatClient;

use super::resolve_dir;
use crate::EvalArgs;
use crate::output::{format_score, print_json};

pub(crate) fn run_eval(cwd: &Path, args: EvalArgs, json_mode: bool) -> Result<()> {
    let cfg = AppConfig::load(cwd)?;
    let split = args.split_name.unwrap_or_else(|| cfg.run.split_name.clone());
    let targets = if args.files.is_empty() {
        let model = args.model.unwrap_or_else(|| cfg.llm.model.clone());
        let output_dir = args
            .output_path
            .unwrap_or_else(|| resolve_dir(cwd, &cfg.run.output_dir));
        default_targets(&output_dir, &split, &model)
    } else {
        explicit_targets(args.files, args.dataset_names, &split)?
    };

    let embedder = match cfg.eval.embedding_model.as_deref() {
        Some(model) if !model.trim().is_empty() => Some(ApiEmbedder::new(
            ChatClient::new(cfg.llm.clone())?,
            cfg.eval.embedding_endpoint.clone(),
            model,
        )),
        _ => None,
    };
    let evaluator = Evaluator::new(
        &cfg.eval,
        embedder.as_ref().map(|e| e as &dyn Embedder),
    );
    let report = evaluator.evaluate_all(&targets)?;

    if json_mode {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Pairs `--file` with `--dataset-name` by position.
fn explicit_targets(
    files: Vec<std::path::PathBuf>,
    dataset_names: Vec<String>,
    split: &str,
) -> Result<Vec<EvalTarget>> {
    if files.len() != dataset_names.len() {
        bail!(
            "got {} --file value(s) but {} --dataset-name value(s); pass one dataset per file",
            files.len(),
            dataset_names.len()
        );
    }
    Ok(files
        .into_iter()
        .zip(dataset_names)
        .map(|(file, dataset_name)| EvalTarget {
            dataset_name,
            split: split.to_string(),
            file,
        })
        .collect())
}

fn print_report(report: &EvalReport) {
    for dataset in &report.datasets {
        println!(
            "{} ({} samples, {})",
            dataset_short_name(&dataset.dataset),
            dataset.samples,
            dataset.file.display()
        );
        for metric in &dataset.metrics {
            println!(
                "  {:<18} {}",
                metric.metric,
                format_score(metric.score, metric.unavailable.as_deref())
            );
        }
    }
    for path in &report.skipped {
        println!("skipped (not found): {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn files_pair_with_dataset_names() {
        let targets = explicit_targets(
            vec![PathBuf::from("a.jsonl"), PathBuf::from("b.jsonl")],
            vec!["DongfuJiang/FeTaQA".to_string(), "yale-nlp/QTSumm".to_string()],
            "test",
        )
        .expect("targets");
        assert_eq!(targets[1].file, PathBuf::from("b.jsonl"));
        assert_eq!(targets[1].label(), "QTSumm");

        assert!(explicit_targets(vec![PathBuf::from("a.jsonl")], vec![], "test").is_err());
    }
}
