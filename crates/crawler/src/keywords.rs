//! Keyword extraction
//!
//! Scores contiguous n-grams (n = 1..=3) of non-stopword tokens from a paper's
//! title and abstract. A term's score is its frequency times its length in
//! words, so recurring multi-word phrases outrank their parts.

use crate::metadata::PaperMetadata;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Longest n-gram considered
const MAX_NGRAM: usize = 3;

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "about", "above", "across", "after", "again", "against", "all", "almost", "also",
        "although", "always", "among", "an", "and", "another", "any", "are", "as", "at", "be",
        "because", "been", "before", "being", "between", "both", "but", "by", "can", "could",
        "did", "do", "does", "doing", "done", "due", "during", "each", "either", "else", "etc",
        "even", "ever", "every", "few", "for", "from", "further", "had", "has", "have", "having",
        "he", "her", "here", "hers", "him", "his", "how", "however", "i", "if", "in", "into", "is",
        "it", "its", "itself", "just", "may", "might", "more", "most", "much", "must", "my",
        "neither", "no", "nor", "not", "now", "of", "off", "often", "on", "once", "one", "only",
        "or", "other", "our", "ours", "out", "over", "own", "per", "rather", "same", "several",
        "she", "should", "show", "shows", "shown", "since", "so", "some", "such", "than", "that",
        "the", "their", "them", "then", "there", "these", "they", "this", "those", "through",
        "thus", "to", "too", "two", "under", "until", "up", "upon", "us", "use", "used", "uses",
        "using", "very", "via", "was", "we", "well", "were", "what", "when", "where", "whether",
        "which", "while", "who", "whom", "whose", "why", "will", "with", "within", "without",
        "would", "yet", "you", "your", "paper", "propose", "proposed", "present", "presents",
        "new", "based", "approach", "results", "result", "demonstrate", "introduce", "work",
    ]
    .into_iter()
    .collect()
});

/// A scored term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub term: String,
    pub score: f64,
}

/// Top keywords of a paper's title and abstract
pub fn extract_keywords(metadata: &PaperMetadata, max: usize) -> Vec<Keyword> {
    let text = format!("{}.\n{}", metadata.title, metadata.abstract_text);
    extract_keywords_from_text(&text, max)
}

/// Top keywords of free text, highest score first; ties break alphabetically
pub fn extract_keywords_from_text(text: &str, max: usize) -> Vec<Keyword> {
    let mut counts: HashMap<String, usize> = HashMap::new();

    for run in candidate_runs(text) {
        for n in 1..=MAX_NGRAM.min(run.len()) {
            for window in run.windows(n) {
                *counts.entry(window.join(" ")).or_default() += 1;
            }
        }
    }

    let mut keywords: Vec<Keyword> = counts
        .into_iter()
        .map(|(term, count)| {
            let words = term.split(' ').count();
            Keyword {
                score: (count * words) as f64,
                term,
            }
        })
        .collect();

    keywords.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.term.cmp(&b.term))
    });
    keywords.truncate(max);
    keywords
}

/// Split text into runs of consecutive content words.
///
/// Runs break at punctuation, stopwords, numbers and TeX math.
fn candidate_runs(text: &str) -> Vec<Vec<String>> {
    let mut runs = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut token = String::new();
    let mut in_math = false;

    for c in text.chars() {
        if c == '$' {
            in_math = !in_math;
            flush_token(&mut token, &mut current, &mut runs);
            if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
            continue;
        }
        if in_math {
            continue;
        }

        if c.is_alphanumeric() || (c == '-' && !token.is_empty()) {
            token.push(c);
        } else if c.is_whitespace() {
            flush_token(&mut token, &mut current, &mut runs);
        } else {
            flush_token(&mut token, &mut current, &mut runs);
            if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
        }
    }

    flush_token(&mut token, &mut current, &mut runs);
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// End the current token, extending or closing the current run
fn flush_token(token: &mut String, current: &mut Vec<String>, runs: &mut Vec<Vec<String>>) {
    let word = token.trim_matches('-').to_lowercase();
    token.clear();
    if word.is_empty() {
        return;
    }
    let usable = word.chars().count() > 1
        && word.chars().any(|c| c.is_alphabetic())
        && !STOPWORDS.contains(word.as_str());
    if usable {
        current.push(word);
    } else if !current.is_empty() {
        runs.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrases_outrank_parts() {
        let text = "Graph neural networks learn node features. \
                    We train graph neural networks on citation data.";
        let keywords = extract_keywords_from_text(text, 3);

        assert_eq!(keywords[0].term, "graph neural networks");
        assert_eq!(keywords[0].score, 6.0);
        assert_eq!(keywords[1].term, "graph neural");
        assert_eq!(keywords[2].term, "neural networks");
    }

    #[test]
    fn test_stopwords_and_numbers_break_runs() {
        let keywords = extract_keywords_from_text("the model of 2021 and the model", 10);
        let terms: Vec<_> = keywords.iter().map(|k| k.term.as_str()).collect();
        assert_eq!(terms, vec!["model"]);
        assert_eq!(keywords[0].score, 2.0);
    }

    #[test]
    fn test_math_and_hyphens() {
        let keywords = extract_keywords_from_text("Self-attention over $O(n^2)$ tokens.", 10);
        let terms: Vec<_> = keywords.iter().map(|k| k.term.as_str()).collect();
        assert!(terms.contains(&"self-attention"));
        assert!(terms.contains(&"tokens"));
        assert!(!terms.iter().any(|t| t.contains("self-attention tokens")));
    }

    #[test]
    fn test_limit_and_empty_input() {
        assert!(extract_keywords_from_text("", 5).is_empty());
        assert!(extract_keywords_from_text("the of and", 5).is_empty());
        assert_eq!(
            extract_keywords_from_text("alpha beta gamma delta epsilon", 2).len(),
            2
        );
    }
}
