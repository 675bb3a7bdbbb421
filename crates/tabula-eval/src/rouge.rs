use crate::tokenize;

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            cur[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Rouge-L F-measure of one pair, in `[0, 1]`.
pub fn rouge_l(prediction: &str, reference: &str) -> f64 {
    let hyp = tokenize::rouge(prediction);
    let reference = tokenize::rouge(reference);
    if hyp.is_empty() || reference.is_empty() {
        return 0.0;
    }
    let lcs = lcs_len(&reference, &hyp) as f64;
    if lcs == 0.0 {
        return 0.0;
    }
    let precision = lcs / hyp.len() as f64;
    let recall = lcs / reference.len() as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Mean Rouge-L over pairs, scaled to `[0, 100]`.
pub fn mean_rouge_l(predictions: &[String], references: &[String]) -> f64 {
    let scores: Vec<f64> = predictions
        .iter()
        .zip(references)
        .map(|(p, r)| rouge_l(p, r))
        .collect();
    if scores.is_empty() {
        return 0.0;
    }
    100.0 * scores.iter().sum::<f64>() / scores.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcs_counts_in_order_matches() {
        let a: Vec<String> = "a b c d e".split(' ').map(str::to_string).collect();
        let b: Vec<String> = "a c e x".split(' ').map(str::to_string).collect();
        assert_eq!(lcs_len(&a, &b), 3);
    }

    #[test]
    fn identical_text_is_perfect_and_case_insensitive() {
        assert_eq!(rouge_l("Paris", "paris"), 1.0);
        assert_eq!(mean_rouge_l(&["Paris".to_string()], &["Paris".to_string()]), 100.0);
    }

    #[test]
    fn partial_overlap_is_the_lcs_f_measure() {
        // lcs = 2 ("benson won"), p = 2/3, r = 2/4
        let score = rouge_l("Benson won easily", "Johnny Benson won it");
        let expected = 2.0 * (2.0 / 3.0) * 0.5 / (2.0 / 3.0 + 0.5);
        assert!((score - expected).abs() < 1e-12);
        assert_eq!(rouge_l("", "anything"), 0.0);
    }
}
