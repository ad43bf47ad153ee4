//! Detector: phonetic correction followed by whole-word matching.
//!
//! 1. Normalize the sentence (case-fold, collapse stretched characters).
//! 2. Replace every alias token with its canonical term in a working copy.
//! 3. Match canonical terms on word boundaries over the corrected copy, so a
//!    canonical embedded inside a longer word never matches.

use crate::wordlist::{normalize, WordlistStore, WordlistTable};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("token pattern is valid"));

/// Outcome of evaluating one sentence. Binary per sentence; no scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub is_toxic: bool,
    /// Left-most matched canonical term.
    pub matched_canonical: Option<String>,
    /// Byte span of the left-most match inside `corrected_sentence`.
    pub span: Option<(usize, usize)>,
    pub corrected_sentence: String,
    /// Every distinct canonical matched, in order of first appearance.
    pub matches: Vec<String>,
}

impl MatchResult {
    fn clean(corrected_sentence: String) -> Self {
        Self {
            corrected_sentence,
            ..Default::default()
        }
    }
}

/// Evaluates sentences against the active wordlist snapshot.
#[derive(Debug, Clone)]
pub struct Detector {
    store: Arc<WordlistStore>,
}

impl Detector {
    pub fn new(store: Arc<WordlistStore>) -> Self {
        Self { store }
    }

    /// Evaluate against whichever table is active when the call starts. A reload
    /// landing mid-evaluation only affects later calls.
    pub fn evaluate(&self, sentence: &str) -> MatchResult {
        let table = self.store.snapshot();
        evaluate_with(&table, sentence)
    }
}

/// Replace alias tokens with their canonical term, preserving everything between tokens.
pub fn correct(table: &WordlistTable, normalized: &str) -> String {
    let mut out = String::with_capacity(normalized.len());
    let mut last = 0;
    for token in TOKEN.find_iter(normalized) {
        out.push_str(&normalized[last..token.start()]);
        match table.alias_target(token.as_str()) {
            Some(canonical) => out.push_str(canonical),
            None => out.push_str(token.as_str()),
        }
        last = token.end();
    }
    out.push_str(&normalized[last..]);
    out
}

pub fn evaluate_with(table: &WordlistTable, sentence: &str) -> MatchResult {
    let normalized = normalize(sentence);
    if normalized.is_empty() {
        return MatchResult::default();
    }

    let corrected = correct(table, &normalized);
    let Some(pattern) = table.pattern() else {
        return MatchResult::clean(corrected);
    };

    let mut matches: Vec<String> = Vec::new();
    let mut first: Option<(usize, usize)> = None;
    for hit in pattern.find_iter(&corrected) {
        if first.is_none() {
            first = Some((hit.start(), hit.end()));
        }
        let term = hit.as_str().to_lowercase();
        if !matches.contains(&term) {
            matches.push(term);
        }
    }

    match first {
        Some(span) => MatchResult {
            is_toxic: true,
            matched_canonical: matches.first().cloned(),
            span: Some(span),
            corrected_sentence: corrected,
            matches,
        },
        None => MatchResult::clean(corrected),
    }
}
