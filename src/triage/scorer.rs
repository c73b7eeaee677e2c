use std::collections::HashMap;

use super::lexicon::{normalize_text, Lexicon};
use super::types::{DiseaseId, DiseasePattern, ScoredCandidate};

/// Words that raise every contribution when present anywhere in the text.
const INTENSIFIERS: &[&str] = &["severe", "intense", "excruciating", "worst"];
/// Words that lower every contribution.
const MITIGATORS: &[&str] = &["mild", "slight", "minimal"];
const SUDDEN_ONSET: &[&str] = &["sudden", "acute"];
const CHRONIC: &str = "chronic";

const CRITICAL_FACTOR: f64 = 2.0;
const INTENSITY_FACTOR: f64 = 1.5;
const MITIGATION_FACTOR: f64 = 0.7;
const SUDDEN_FACTOR: f64 = 1.2;
const CHRONIC_FACTOR: f64 = 0.8;

pub type Candidates = HashMap<DiseaseId, ScoredCandidate>;

/// Outcome of scoring one input.
#[derive(Debug, Clone, PartialEq)]
pub enum Scoring {
    /// Blank input; nothing was scored.
    Undetermined,
    /// Only diseases with at least one matched phrase are present.
    Scored(Candidates),
}

impl Scoring {
    pub fn candidates(&self) -> Option<&Candidates> {
        match self {
            Self::Undetermined => None,
            Self::Scored(candidates) => Some(candidates),
        }
    }
}

/// Whole-text modifiers, detected once per input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextModifiers {
    pub intensified: bool,
    pub mitigated: bool,
    pub sudden: bool,
    pub chronic: bool,
}

impl TextModifiers {
    /// `text` must already be normalized.
    pub fn detect(text: &str) -> Self {
        Self {
            intensified: INTENSIFIERS.iter().any(|w| text.contains(w)),
            mitigated: MITIGATORS.iter().any(|w| text.contains(w)),
            sudden: SUDDEN_ONSET.iter().any(|w| text.contains(w)),
            chronic: text.contains(CHRONIC),
        }
    }

    /// Multiplier for a pattern. Within each group one word wins:
    /// intensity over mitigation, chronic (when the pattern allows it) over
    /// sudden onset.
    pub fn factor(&self, chronic_possible: bool) -> f64 {
        let severity = if self.intensified {
            INTENSITY_FACTOR
        } else if self.mitigated {
            MITIGATION_FACTOR
        } else {
            1.0
        };
        let duration = if self.chronic && chronic_possible {
            CHRONIC_FACTOR
        } else if self.sudden {
            SUDDEN_FACTOR
        } else {
            1.0
        };
        severity * duration
    }
}

/// Score free text against every pattern in the lexicon.
pub fn score(text: &str, lexicon: &Lexicon) -> Scoring {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return Scoring::Undetermined;
    }

    let present = settle_overlaps(&normalized, lexicon);
    let modifiers = TextModifiers::detect(&normalized);

    let candidates = lexicon
        .patterns()
        .iter()
        .filter_map(|pattern| score_pattern(pattern, &present, modifiers))
        .map(|candidate| (candidate.disease.clone(), candidate))
        .collect();

    Scoring::Scored(candidates)
}

/// Phrases that count for this input, across all patterns.
///
/// Walks the lexicon longest phrase first; a phrase contained in, or
/// containing, one already kept is dropped. "mild headache" therefore
/// suppresses "headache" for every disease, not only its own.
fn settle_overlaps<'a>(normalized: &str, lexicon: &'a Lexicon) -> Vec<&'a str> {
    let mut kept: Vec<&'a str> = Vec::new();
    for entry in lexicon.lookup() {
        let phrase = entry.phrase.as_str();
        if !normalized.contains(phrase) {
            continue;
        }
        if kept.iter().any(|k| k.contains(phrase) || phrase.contains(*k)) {
            continue;
        }
        kept.push(phrase);
    }
    kept
}

fn score_pattern(
    pattern: &DiseasePattern,
    present: &[&str],
    modifiers: TextModifiers,
) -> Option<ScoredCandidate> {
    let factor = modifiers.factor(pattern.chronic_possible);
    let mut candidate = ScoredCandidate::new(pattern.id.clone());

    // `present` is longest first, so matched phrases come out in that order.
    for &phrase in present {
        if !pattern.triggers.iter().any(|t| t == phrase) {
            continue;
        }
        let mut contribution = 1.0;
        if pattern.is_critical(phrase) {
            contribution *= CRITICAL_FACTOR;
        }
        candidate.raw_score += contribution * factor;
        candidate.matched_phrases.push(phrase.to_string());
    }

    if candidate.matched_phrases.is_empty() {
        None
    } else {
        Some(candidate)
    }
}
