use anyhow::Result;
use serde_json::json;
use std::path::Path;
use tabula_agent::{Gateway, RunRequest, run_dataset};
use tabula_core::AppConfig;
use tabula_llm::ChatClient;
use tabula_observe::Observer;
use tabula_store::DatasetSource;

use super::resolve_dir;
use crate::RunArgs;
use crate::output::print_json;

pub(crate) fn run_run(cwd: &Path, args: RunArgs, json_mode: bool) -> Result<()> {
    let mut cfg = AppConfig::load(cwd)?;
    if let Some(model) = args.model {
        cfg.llm.model = model;
    }
    let dataset_name = args.dataset_name.unwrap_or(cfg.run.dataset_name);
    let split = args.split_name.unwrap_or(cfg.run.split_name);
    let output_dir = args
        .output_path
        .unwrap_or_else(|| resolve_dir(cwd, &cfg.run.output_dir));
    let source = match args.dataset_file {
        Some(path) => DatasetSource::File(path),
        None => DatasetSource::Hub {
            endpoint: cfg.run.hub_endpoint.clone(),
            dataset: dataset_name.clone(),
            split: split.clone(),
            page_size: cfg.run.hub_page_size,
        },
    };
    let request = RunRequest {
        dataset_name,
        split,
        output_dir,
        n_samples: args.n_samples.unwrap_or(cfg.run.n_samples),
    };

    let client = ChatClient::new(cfg.llm.clone())?;
    let gateway = Gateway::new(&client, cfg.llm.model.clone(), &cfg.llm);
    let observer = Observer::new(cwd, &cfg.telemetry)?;
    tracing::debug!(run_id = %observer.run_id(), model = gateway.model(), "run configured");

    let summary = run_dataset(&gateway, &observer, &cfg.pipeline, &request, &source)?;
    if json_mode {
        print_json(&json!({
            "run_id": observer.run_id(),
            "output_path": summary.output_path,
            "removed_errors": summary.cleaned.removed,
            "already_done": summary.cleaned.done.len(),
            "skipped": summary.skipped,
            "processed": summary.processed,
            "failed": summary.failed,
            "started_at": summary.started_at,
            "finished_at": summary.finished_at,
        }))?;
    } else {
        println!("results: {}", summary.output_path.display());
        println!(
            "processed {} item(s), {} failed, {} already done",
            summary.processed, summary.failed, summary.skipped
        );
        if summary.cleaned.removed > 0 {
            println!(
                "removed {} error record(s) from a previous run",
                summary.cleaned.removed
            );
        }
        let elapsed = summary.finished_at - summary.started_at;
        println!("elapsed: {}s", elapsed.num_seconds());
    }
    Ok(())
}
