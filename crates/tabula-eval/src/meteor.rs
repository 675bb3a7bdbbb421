//! METEOR restricted to exact (lowercased) word matches.

use crate::tokenize;

const ALPHA: f64 = 0.9;
const BETA: f64 = 3.0;
const GAMMA: f64 = 0.5;

/// Aligns each hypothesis word, last first, with the last unused equal
/// reference word. Returned pairs are sorted by hypothesis position.
fn align(hyp: &[String], reference: &[String]) -> Vec<(usize, usize)> {
    let mut used = vec![false; reference.len()];
    let mut pairs = Vec::new();
    for (i, word) in hyp.iter().enumerate().rev() {
        let found = reference
            .iter()
            .enumerate()
            .rev()
            .find(|(j, candidate)| !used[*j] && *candidate == word);
        if let Some((j, _)) = found {
            used[j] = true;
            pairs.push((i, j));
        }
    }
    pairs.sort_unstable();
    pairs
}

fn chunks(pairs: &[(usize, usize)]) -> usize {
    if pairs.is_empty() {
        return 0;
    }
    1 + pairs
        .windows(2)
        .filter(|w| !(w[1].0 == w[0].0 + 1 && w[1].1 == w[0].1 + 1))
        .count()
}

/// Single-reference METEOR in `[0, 1]`.
pub fn meteor(prediction: &str, reference: &str) -> f64 {
    let lower = |text: &str| -> Vec<String> {
        tokenize::words(text)
            .into_iter()
            .map(|w| w.to_lowercase())
            .collect()
    };
    let hyp = lower(prediction);
    let reference = lower(reference);
    let pairs = align(&hyp, &reference);
    if pairs.is_empty() {
        return 0.0;
    }
    let matched = pairs.len() as f64;
    let precision = matched / hyp.len() as f64;
    let recall = matched / reference.len() as f64;
    let fmean = precision * recall / (ALPHA * precision + (1.0 - ALPHA) * recall);
    let fragmentation = chunks(&pairs) as f64 / matched;
    (1.0 - GAMMA * fragmentation.powf(BETA)) * fmean
}

/// Mean METEOR over pairs, scaled to `[0, 100]`.
pub fn mean_meteor(predictions: &[String], references: &[String]) -> f64 {
    let scores: Vec<f64> = predictions
        .iter()
        .zip(references)
        .map(|(p, r)| meteor(p, r))
        .collect();
    if scores.is_empty() {
        return 0.0;
    }
    100.0 * scores.iter().sum::<f64>() / scores.len() as f64
}
