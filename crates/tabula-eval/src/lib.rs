//! Scoring result files against their ground truth.

pub mod bleu;
pub mod external;
pub mod meteor;
pub mod rouge;
pub mod similarity;
pub mod tokenize;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tabula_core::EvalConfig;
use tabula_store::output_path;

pub use similarity::{ApiEmbedder, Embedder};

pub const SACREBLEU: &str = "sacreBLEU";
pub const ROUGE_L: &str = "Rouge-L";
pub const METEOR: &str = "METEOR";
pub const BERTSCORE: &str = "BERTScore";
pub const TAPAS_ACC: &str = "TAPAS-Acc";
pub const AUTOACU: &str = "AutoACU";
pub const PREDICTION_LENGTH: &str = "Prediction Length";

/// Predictions and references read from a result file, index-aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalPairs {
    pub predictions: Vec<String>,
    pub references: Vec<String>,
}

impl EvalPairs {
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

/// Reads `prediction` and `ground_truth` from every non-blank line; a missing
/// field reads as an empty string.
pub fn load_pairs(path: &Path) -> Result<EvalPairs> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut pairs = EvalPairs::default();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let item: Value = serde_json::from_str(line)
            .with_context(|| format!("{} line {}", path.display(), idx + 1))?;
        pairs.predictions.push(field_text(&item, "prediction"));
        pairs.references.push(field_text(&item, "ground_truth"));
    }
    Ok(pairs)
}

fn field_text(item: &Value, key: &str) -> String {
    match item.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Mean word-token count of the predictions.
pub fn mean_length(predictions: &[String]) -> Result<f64> {
    if predictions.is_empty() {
        return Err(anyhow!("no predictions"));
    }
    let total: usize = predictions.iter().map(|p| tokenize::words(p).len()).sum();
    Ok(total as f64 / predictions.len() as f64)
}

/// One metric's value, or why it could not be computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricResult {
    pub metric: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<String>,
}

impl MetricResult {
    fn from_result(metric: &'static str, result: Result<f64>) -> Self {
        match result {
            Ok(score) => Self {
                metric,
                score: Some(score),
                unavailable: None,
            },
            Err(err) => {
                tracing::warn!(metric, error = %err, "metric unavailable");
                Self {
                    metric,
                    score: None,
                    unavailable: Some(format!("{err:#}")),
                }
            }
        }
    }
}

/// What to evaluate: a result file and the dataset it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvalTarget {
    pub dataset_name: String,
    pub split: String,
    pub file: PathBuf,
}

impl EvalTarget {
    pub fn label(&self) -> &str {
        tabula_core::dataset_short_name(&self.dataset_name)
    }
}

/// The FeTaQA and QTSumm result files a run with `model` would write.
pub fn default_targets(output_dir: &Path, split: &str, model: &str) -> Vec<EvalTarget> {
    ["DongfuJiang/FeTaQA", "yale-nlp/QTSumm"]
        .into_iter()
        .map(|dataset_name| EvalTarget {
            dataset_name: dataset_name.to_string(),
            split: split.to_string(),
            file: output_path(output_dir, dataset_name, split, model),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetReport {
    pub dataset: String,
    pub file: PathBuf,
    pub samples: usize,
    pub metrics: Vec<MetricResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvalReport {
    pub datasets: Vec<DatasetReport>,
    /// Targets whose result file does not exist.
    pub skipped: Vec<PathBuf>,
}

pub struct Evaluator<'a> {
    config: &'a EvalConfig,
    embedder: Option<&'a dyn Embedder>,
}

impl<'a> Evaluator<'a> {
    pub fn new(config: &'a EvalConfig, embedder: Option<&'a dyn Embedder>) -> Self {
        Self { config, embedder }
    }

    pub fn evaluate_all(&self, targets: &[EvalTarget]) -> Result<EvalReport> {
        let mut report = EvalReport::default();
        for target in targets {
            if !target.file.exists() {
                tracing::warn!(file = %target.file.display(), "result file not found, skipping dataset");
                report.skipped.push(target.file.clone());
                continue;
            }
            report.datasets.push(self.evaluate(target)?);
        }
        Ok(report)
    }

    /// Computes every metric for one target. A metric that fails is reported
    /// as unavailable; the others are still computed.
    pub fn evaluate(&self, target: &EvalTarget) -> Result<DatasetReport> {
        let pairs = load_pairs(&target.file)?;
        tracing::info!(dataset = target.label(), samples = pairs.len(), "evaluating");
        let (preds, refs) = (&pairs.predictions, &pairs.references);
        let require_pairs = || -> Result<()> {
            if pairs.is_empty() {
                return Err(anyhow!("result file has no records"));
            }
            Ok(())
        };

        let metrics = vec![
            MetricResult::from_result(
                SACREBLEU,
                require_pairs().map(|()| bleu::corpus_bleu(preds, refs)),
            ),
            MetricResult::from_result(
                ROUGE_L,
                require_pairs().map(|()| rouge::mean_rouge_l(preds, refs)),
            ),
            MetricResult::from_result(
                METEOR,
                require_pairs().map(|()| meteor::mean_meteor(preds, refs)),
            ),
            MetricResult::from_result(BERTSCORE, self.similarity(preds, refs)),
            MetricResult::from_result(
                TAPAS_ACC,
                self.external(self.config.tapas_command.as_deref(), target),
            ),
            MetricResult::from_result(
                AUTOACU,
                self.external(self.config.autoacu_command.as_deref(), target),
            ),
            MetricResult::from_result(PREDICTION_LENGTH, mean_length(preds)),
        ];

        Ok(DatasetReport {
            dataset: target.label().to_string(),
            file: target.file.clone(),
            samples: pairs.len(),
            metrics,
        })
    }

    fn similarity(&self, preds: &[String], refs: &[String]) -> Result<f64> {
        let embedder = self
            .embedder
            .ok_or_else(|| anyhow!("no embedding model configured (eval.embedding_model)"))?;
        similarity::mean_similarity(embedder, preds, refs)
    }

    fn external(&self, command: Option<&str>, target: &EvalTarget) -> Result<f64> {
        let command = command
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow!("no scorer command configured"))?;
        external::run_scorer(
            command,
            &target.file,
            &target.dataset_name,
            &target.split,
            external::SCORER_TIMEOUT,
        )
    }
}
