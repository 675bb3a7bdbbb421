//! Embedding similarity between predictions and references.

use anyhow::{Result, bail};
use tabula_llm::ChatClient;

const BATCH: usize = 64;

pub trait Embedder {
    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embeddings from an OpenAI-compatible endpoint.
pub struct ApiEmbedder {
    client: ChatClient,
    endpoint: String,
    model: String,
}

impl ApiEmbedder {
    pub fn new(client: ChatClient, endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }
}

impl Embedder for ApiEmbedder {
    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(BATCH) {
            // The endpoint rejects empty strings.
            let chunk: Vec<String> = chunk
                .iter()
                .map(|text| if text.trim().is_empty() { " ".to_string() } else { text.clone() })
                .collect();
            out.extend(self.client.embeddings(&self.endpoint, &self.model, &chunk)?);
        }
        Ok(out)
    }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Mean pairwise cosine similarity, scaled to `[0, 100]`.
pub fn mean_similarity(
    embedder: &dyn Embedder,
    predictions: &[String],
    references: &[String],
) -> Result<f64> {
    let n = predictions.len().min(references.len());
    if n == 0 {
        bail!("no prediction/reference pairs");
    }
    let preds = embedder.embed(&predictions[..n])?;
    let refs = embedder.embed(&references[..n])?;
    if preds.len() != n || refs.len() != n {
        bail!(
            "expected {n} embeddings per side, got {} and {}",
            preds.len(),
            refs.len()
        );
    }
    let total: f64 = preds.iter().zip(&refs).map(|(p, r)| cosine(p, r)).sum();
    Ok(100.0 * total / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Embeds text as letter-frequency vectors.
    struct LetterCounts;

    impl Embedder for LetterCounts {
        fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(inputs
                .iter()
                .map(|text| {
                    let mut v = vec![0.0f32; 26];
                    for c in text.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                        v[usize::from(c - b'a')] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    #[test]
    fn cosine_of_parallel_and_orthogonal_vectors() {
        assert!((cosine(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn identical_texts_are_fully_similar() {
        let texts = vec!["Paris".to_string(), "Bill Davis Racing".to_string()];
        let score = mean_similarity(&LetterCounts, &texts, &texts).expect("score");
        assert!((score - 100.0).abs() < 1e-6);
        assert!(mean_similarity(&LetterCounts, &[], &[]).is_err());
    }
}
