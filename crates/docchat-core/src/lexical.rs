//! Keyword retrieval over stored chunk text.
//!
//! TF-IDF with sublinear term frequency (`1 + ln tf`) and smoothed inverse
//! document frequency (`ln((N + 1) / (df + 1)) + 1`), where each chunk is a
//! document. Chunks are scored by cosine similarity against the query's
//! weights; chunks sharing no term with the query are left out.
//!
//! Used when the question cannot be embedded, so a namespace stays
//! searchable while the embedding endpoint is down.

use std::collections::{HashMap, HashSet};

use crate::models::{IndexedChunk, RetrievalResult};

/// Lowercased runs of alphanumeric characters and `_`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Up to `k` chunks ranked by TF-IDF cosine against `query`, best first.
/// Equal scores keep insertion order.
pub fn keyword_rank(chunks: &[IndexedChunk], query: &str, k: usize) -> Vec<RetrievalResult> {
    let query_tokens = tokenize(query);
    if chunks.is_empty() || query_tokens.is_empty() || k == 0 {
        return Vec::new();
    }

    let docs: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(&c.metadata.text)).collect();
    let mut df: HashMap<&str, usize> = HashMap::new();
    for tokens in &docs {
        let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        for term in unique {
            *df.entry(term).or_default() += 1;
        }
    }
    let n = docs.len() as f32;
    let idf = |term: &str| {
        let df = df.get(term).copied().unwrap_or(0) as f32;
        ((n + 1.0) / (df + 1.0)).ln() + 1.0
    };

    let query_weights = term_weights(&query_tokens, &idf);
    let query_norm = norm(&query_weights);

    let mut scored: Vec<(usize, f32)> = docs
        .iter()
        .enumerate()
        .filter_map(|(i, tokens)| {
            let weights = term_weights(tokens, &idf);
            let dot: f32 = query_weights
                .iter()
                .filter_map(|(term, qw)| weights.get(term).map(|w| qw * w))
                .sum();
            (dot > 0.0).then(|| (i, dot / (query_norm * norm(&weights))))
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(i, score)| RetrievalResult {
            chunk: chunks[i].clone(),
            score,
        })
        .collect()
}

fn term_weights<'a>(tokens: &'a [String], idf: &impl Fn(&str) -> f32) -> HashMap<&'a str, f32> {
    let mut tf: HashMap<&str, usize> = HashMap::new();
    for token in tokens {
        *tf.entry(token.as_str()).or_default() += 1;
    }
    tf.into_iter()
        .map(|(term, count)| (term, (1.0 + (count as f32).ln()) * idf(term)))
        .collect()
}

fn norm(weights: &HashMap<&str, f32>) -> f32 {
    let n = weights.values().map(|w| w * w).sum::<f32>().sqrt();
    if n > 0.0 {
        n
    } else {
        1.0
    }
}
