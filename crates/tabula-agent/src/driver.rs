//! Dataset-level driver: resume, run each pending item, persist as we go.

use crate::gateway::Gateway;
use crate::pipeline::Pipeline;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use tabula_core::{DatasetKind, PipelineConfig, QueryItem, RunEvent};
use tabula_observe::Observer;
use tabula_store::{CleanReport, DatasetSource, ResultStore, load_items, output_path};

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub dataset_name: String,
    pub split: String,
    pub output_dir: PathBuf,
    /// Items to process this run; any negative value means all of them.
    pub n_samples: i64,
}

impl RunRequest {
    fn limit(&self) -> Option<usize> {
        usize::try_from(self.n_samples).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub output_path: PathBuf,
    pub cleaned: CleanReport,
    pub skipped: usize,
    pub processed: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Final-synthesis style for a dataset name.
pub fn dataset_kind(dataset_name: &str) -> Result<DatasetKind> {
    DatasetKind::from_name(dataset_name).ok_or_else(|| {
        anyhow!("unknown dataset `{dataset_name}`; expected a FeTaQA or QTSumm dataset")
    })
}

pub fn run_dataset(
    gateway: &Gateway<'_>,
    observer: &Observer,
    pipeline: &PipelineConfig,
    request: &RunRequest,
    source: &DatasetSource,
) -> Result<RunSummary> {
    let kind = dataset_kind(&request.dataset_name)?;
    let started_at = Utc::now();
    let path = output_path(
        &request.output_dir,
        &request.dataset_name,
        &request.split,
        gateway.model(),
    );
    let store = ResultStore::open(&path)?;
    let cleaned = store
        .clean_error_entries()
        .with_context(|| format!("cleaning {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        kept = cleaned.kept,
        removed = cleaned.removed,
        "cleaned previous results"
    );

    let items = load_items(source).with_context(|| format!("loading dataset {source}"))?;
    observer.emit(RunEvent::RunStartedV1 {
        dataset: request.dataset_name.clone(),
        split: request.split.clone(),
        model: gateway.model().to_string(),
        already_done: cleaned.done.len(),
    });
    tracing::info!(
        items = items.len(),
        completed = cleaned.done.len(),
        "starting run, processing remaining items"
    );

    let pipeline = Pipeline::new(
        gateway,
        observer,
        pipeline.clone(),
        kind,
    );
    let progress = run_items(&pipeline, &store, &cleaned.done, &items, request.limit())?;
    observer.emit(RunEvent::RunFinishedV1 {
        processed: progress.processed,
        failed: progress.failed,
    });
    tracing::info!(
        processed = progress.processed,
        failed = progress.failed,
        skipped = progress.skipped,
        "run finished"
    );

    Ok(RunSummary {
        output_path: path,
        cleaned,
        skipped: progress.skipped,
        processed: progress.processed,
        failed: progress.failed,
        started_at,
        finished_at: Utc::now(),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub skipped: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Answers items in order, skipping `done` ids, until `limit` items have
/// been processed. Each record is on disk before the next item starts.
pub fn run_items(
    pipeline: &Pipeline<'_>,
    store: &ResultStore,
    done: &HashSet<String>,
    items: &[QueryItem],
    limit: Option<usize>,
) -> Result<Progress> {
    let mut progress = Progress::default();
    for item in items {
        if limit.is_some_and(|limit| progress.processed >= limit) {
            break;
        }
        if done.contains(&item.example_id) {
            progress.skipped += 1;
            continue;
        }
        tracing::info!(
            at = %Utc::now().format("%Y-%m-%d %H:%M:%S"),
            index = progress.processed,
            example_id = %item.example_id,
            "processing item"
        );
        let record = pipeline.answer_item(item);
        if record.is_error() {
            progress.failed += 1;
        }
        store
            .append(&record)
            .with_context(|| format!("writing result for {}", item.example_id))?;
        progress.processed += 1;
        tracing::info!(example_id = %item.example_id, "result written");
    }
    Ok(progress)
}
