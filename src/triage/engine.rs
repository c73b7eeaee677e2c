use std::sync::Arc;

use super::lexicon::Lexicon;
use super::ranker::{rank, Ranking};
use super::scorer::{score, Scoring};
use super::types::{round3, Demographics, RiskLevel, ScoredCandidate, TriageResult};
use crate::config::UNDETERMINED_CONFIDENCE;

pub const UNDETERMINED_LABEL: &str = "Undifferentiated Illness";
pub const UNDETERMINED_SUGGESTION: &str = "Monitor symptoms and seek care if they persist";

/// Rule-based triage over an immutable lexicon.
///
/// Total: every input yields a result, the worst case being the
/// undetermined sentinel. Holds no mutable state, so one engine can serve
/// any number of concurrent callers.
#[derive(Debug, Clone)]
pub struct RuleBasedEngine {
    lexicon: Arc<Lexicon>,
}

impl RuleBasedEngine {
    pub fn new(lexicon: Arc<Lexicon>) -> Self {
        Self { lexicon }
    }

    /// Engine over the built-in lexicon.
    pub fn builtin() -> Self {
        Self::new(Lexicon::builtin())
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    /// Classify without patient context.
    pub fn triage(&self, text: &str) -> TriageResult {
        self.classify(text, None)
    }

    /// Classify with optional demographics weighting the ranking.
    pub fn classify(&self, text: &str, demographics: Option<&Demographics>) -> TriageResult {
        let candidates = match score(text, &self.lexicon) {
            Scoring::Undetermined => {
                tracing::debug!("Blank symptom text, returning undetermined result");
                return undetermined();
            }
            Scoring::Scored(candidates) => candidates,
        };

        let ranking = rank(candidates, &self.lexicon, demographics);
        match ranking.primary() {
            Some(primary) => self.build_result(primary, &ranking),
            None => {
                tracing::debug!(text_len = text.len(), "No trigger matched");
                undetermined()
            }
        }
    }

    fn build_result(&self, primary: &ScoredCandidate, ranking: &Ranking) -> TriageResult {
        let Some(pattern) = self.lexicon.pattern(&primary.disease) else {
            return undetermined();
        };

        let differential = ranking
            .differential()
            .iter()
            .filter_map(|candidate| {
                let p = self.lexicon.pattern(&candidate.disease)?;
                Some(format!(
                    "{} ({}, {:.1}% confidence)",
                    p.name,
                    p.urgency.label(),
                    candidate.normalized_score * 100.0
                ))
            })
            .collect();

        let confidence = primary.reported_score();
        tracing::debug!(
            primary = %primary.disease,
            confidence,
            candidates = ranking.all().len(),
            "Rule-based triage complete"
        );

        TriageResult {
            primary_label: pattern.name.clone(),
            suggestion: pattern.urgency.suggestion().to_string(),
            differential,
            confidence,
            matched_triggers: self.matched_triggers(ranking),
            used_fallback: true,
            risk: pattern.urgency.risk(),
            urgency: Some(pattern.urgency),
            treatment: Some(pattern.treatment.clone()),
        }
    }

    /// Phrases matched by any ranked candidate, deduplicated, most severe first.
    fn matched_triggers(&self, ranking: &Ranking) -> Vec<String> {
        let mut triggers: Vec<String> = Vec::new();
        for phrase in ranking.all().iter().flat_map(|c| &c.matched_phrases) {
            if !triggers.contains(phrase) {
                triggers.push(phrase.clone());
            }
        }

        let weight = |phrase: &str| {
            self.lexicon
                .trigger(phrase)
                .map(|t| t.severity_weight)
                .unwrap_or(0.0)
        };
        triggers.sort_by(|a, b| weight(b.as_str()).total_cmp(&weight(a.as_str())));
        triggers
    }
}

/// The "could not determine" result: a normal outcome, not an error.
pub fn undetermined() -> TriageResult {
    TriageResult {
        primary_label: UNDETERMINED_LABEL.to_string(),
        suggestion: UNDETERMINED_SUGGESTION.to_string(),
        differential: Vec::new(),
        confidence: round3(UNDETERMINED_CONFIDENCE),
        matched_triggers: Vec::new(),
        used_fallback: true,
        risk: RiskLevel::Low,
        urgency: None,
        treatment: None,
    }
}
