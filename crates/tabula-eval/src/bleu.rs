//! Corpus BLEU with sacreBLEU defaults: `13a` tokens, 4-gram precision,
//! exponential smoothing and effective order.

use crate::tokenize;
use std::collections::HashMap;

const MAX_ORDER: usize = 4;

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    hyp_len: usize,
    ref_len: usize,
    correct: [usize; MAX_ORDER],
    total: [usize; MAX_ORDER],
}

fn sentence_stats(hyp: &[String], reference: &[String]) -> Stats {
    let mut stats = Stats {
        hyp_len: hyp.len(),
        ref_len: reference.len(),
        ..Stats::default()
    };
    for n in 1..=MAX_ORDER {
        let hyp_counts = ngram_counts(hyp, n);
        let ref_counts = ngram_counts(reference, n);
        for (gram, count) in &hyp_counts {
            let clip = ref_counts.get(gram).copied().unwrap_or(0);
            stats.correct[n - 1] += (*count).min(clip);
        }
        stats.total[n - 1] += hyp.len().saturating_sub(n - 1);
    }
    stats
}

/// Corpus-level BLEU in `[0, 100]`. Pairs are zipped; an empty corpus scores 0.
pub fn corpus_bleu(predictions: &[String], references: &[String]) -> f64 {
    let mut stats = Stats::default();
    for (hyp, reference) in predictions.iter().zip(references) {
        let s = sentence_stats(&tokenize::mt13a(hyp), &tokenize::mt13a(reference));
        stats.hyp_len += s.hyp_len;
        stats.ref_len += s.ref_len;
        for n in 0..MAX_ORDER {
            stats.correct[n] += s.correct[n];
            stats.total[n] += s.total[n];
        }
    }
    score(&stats)
}

fn score(stats: &Stats) -> f64 {
    if stats.hyp_len == 0 {
        return 0.0;
    }
    let mut precisions = [0.0f64; MAX_ORDER];
    let mut smooth = 1.0f64;
    let mut effective_order = 0;
    for n in 0..MAX_ORDER {
        if stats.total[n] == 0 {
            break;
        }
        effective_order = n + 1;
        precisions[n] = if stats.correct[n] == 0 {
            smooth *= 2.0;
            100.0 / (smooth * stats.total[n] as f64)
        } else {
            100.0 * stats.correct[n] as f64 / stats.total[n] as f64
        };
    }
    if effective_order == 0 {
        return 0.0;
    }

    let brevity = if stats.hyp_len < stats.ref_len {
        (1.0 - stats.ref_len as f64 / stats.hyp_len as f64).exp()
    } else {
        1.0
    };
    let log_sum: f64 = precisions[..effective_order].iter().map(|p| p.ln()).sum();
    brevity * (log_sum / effective_order as f64).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(items: &[&str]) -> Vec<String> {
        items.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn identical_single_word_scores_full_marks() {
        let score = corpus_bleu(&s(&["Paris"]), &s(&["Paris"]));
        assert!((score - 100.0).abs() < 1e-9, "{score}");
    }

    #[test]
    fn identical_sentences_score_full_marks() {
        let text = s(&["Johnny Benson won the race for Bill Davis Racing."]);
        assert!((corpus_bleu(&text, &text) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_text_scores_low_and_short_output_is_penalized() {
        let disjoint = corpus_bleu(&s(&["alpha beta gamma delta"]), &s(&["one two three four"]));
        assert!(disjoint < 10.0, "{disjoint}");

        let full = corpus_bleu(&s(&["the cat sat on the mat"]), &s(&["the cat sat on the mat"]));
        let short = corpus_bleu(&s(&["the cat sat"]), &s(&["the cat sat on the mat"]));
        assert!(short < full);
    }

    #[test]
    fn empty_corpus_is_zero() {
        assert_eq!(corpus_bleu(&[], &[]), 0.0);
        assert_eq!(corpus_bleu(&s(&[""]), &s(&["Paris"])), 0.0);
    }
}
