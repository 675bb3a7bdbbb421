use proptest::prelude::*;
use tabula_eval::{bleu, meteor, rouge};

fn sentence() -> impl Strategy<Value = String> {
    prop::collection::vec("[A-Za-z]{1,8}|[0-9]{1,4}|[,.]", 0..12).prop_map(|words| words.join(" "))
}

proptest! {
    #[test]
    fn scores_stay_within_bounds(
        pairs in prop::collection::vec((sentence(), sentence()), 1..6)
    ) {
        let (preds, refs): (Vec<String>, Vec<String>) = pairs.into_iter().unzip();
        for score in [
            bleu::corpus_bleu(&preds, &refs),
            rouge::mean_rouge_l(&preds, &refs),
            meteor::mean_meteor(&preds, &refs),
        ] {
            prop_assert!((0.0..=100.0 + 1e-9).contains(&score), "score {score}");
        }
    }

    #[test]
    fn identical_text_maximizes_rouge(text in "[a-z]{1,6}( [a-z]{1,6}){0,8}") {
        let texts = vec![text];
        prop_assert!((rouge::mean_rouge_l(&texts, &texts) - 100.0).abs() < 1e-9);
        prop_assert!((bleu::corpus_bleu(&texts, &texts) - 100.0).abs() < 1e-9);
    }
}
