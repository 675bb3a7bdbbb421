//! Tokenizers matching the conventions of the reference metric packages.

use regex::Regex;
use std::sync::LazyLock;

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

fn rule(pattern: &str, replacement: &'static str) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("valid tokenizer regex"),
        replacement,
    }
}

static MT13A_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"([\{-~\[-` -&\(-\+:-@/])", " ${1} "),
        rule(r"([^0-9])([\.,])", "${1} ${2} "),
        rule(r"([\.,])([^0-9])", " ${1} ${2}"),
        rule(r"([0-9])(-)", "${1} ${2} "),
    ]
});

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+(?:[-'.]\w+)*|[^\w\s]").expect("valid word regex"));

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid rouge regex"));

/// The `13a` tokenizer used by sacreBLEU by default.
pub fn mt13a(text: &str) -> Vec<String> {
    let mut line = text
        .replace("<skipped>", "")
        .replace("-\n", "")
        .replace('\n', " ");
    if line.contains('&') {
        line = line
            .replace("&quot;", "\"")
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">");
    }
    let mut padded = format!(" {line} ");
    for rule in MT13A_RULES.iter() {
        padded = rule
            .pattern
            .replace_all(&padded, rule.replacement)
            .into_owned();
    }
    padded.split_whitespace().map(str::to_string).collect()
}

/// Lowercased alphanumeric runs, as Rouge scoring tokenizes.
pub fn rouge(text: &str) -> Vec<String> {
    NON_ALNUM
        .replace_all(&text.to_lowercase(), " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Words and standalone punctuation marks.
pub fn words(text: &str) -> Vec<String> {
    WORD.find_iter(text).map(|m| m.as_str().to_string()).collect()
}
