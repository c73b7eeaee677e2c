//! Trigger lexicon: the static disease-pattern table plus a phrase index.
//!
//! The lexicon is data, loaded once at startup (built-in JSON, or a file
//! named by configuration) and never written afterwards, so it is shared
//! across request tasks as `Arc<Lexicon>` without locking. Load failures are
//! configuration errors surfaced at startup, never per request.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use super::types::{DiseaseId, DiseasePattern, TriggerEntry};
use crate::config::TriageConfig;

const BUILTIN_LEXICON_JSON: &str = include_str!("../../resources/default_lexicon.json");

static BUILTIN: LazyLock<Arc<Lexicon>> = LazyLock::new(|| {
    Arc::new(Lexicon::from_json_str(BUILTIN_LEXICON_JSON).expect("Invalid built-in lexicon"))
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

/// Lower-case and collapse whitespace runs. Shared by phrases and input text
/// so that containment compares like with like.
pub fn normalize_text(text: &str) -> String {
    WHITESPACE
        .replace_all(text.trim(), " ")
        .to_lowercase()
}

#[derive(Error, Debug)]
pub enum LexiconError {
    #[error("Lexicon file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lexicon JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Lexicon contains no disease patterns")]
    Empty,

    #[error("Duplicate disease pattern id: {0}")]
    DuplicatePattern(String),

    #[error("Pattern {0} has no trigger phrases")]
    NoTriggers(String),

    #[error("Pattern {0} has an empty trigger phrase")]
    EmptyPhrase(String),

    #[error("Pattern {pattern} repeats trigger phrase '{phrase}'")]
    DuplicateTrigger { pattern: String, phrase: String },

    #[error("Pattern {pattern} marks '{phrase}' critical but does not list it as a trigger")]
    UnknownCritical { pattern: String, phrase: String },

    #[error("Pattern {pattern} has base confidence {value}, expected (0, 1]")]
    InvalidConfidence { pattern: String, value: f64 },
}

#[derive(Deserialize)]
struct LexiconFile {
    patterns: Vec<DiseasePattern>,
}

/// Immutable disease-pattern table with a derived trigger index.
#[derive(Debug)]
pub struct Lexicon {
    patterns: Vec<DiseasePattern>,
    /// Longest phrase first, then alphabetical.
    triggers: Vec<TriggerEntry>,
    trigger_index: HashMap<String, usize>,
    pattern_index: HashMap<DiseaseId, usize>,
}

impl Lexicon {
    /// Validate and index a pattern table. Phrases are normalized in place.
    pub fn new(mut patterns: Vec<DiseasePattern>) -> Result<Self, LexiconError> {
        if patterns.is_empty() {
            return Err(LexiconError::Empty);
        }

        let mut pattern_index = HashMap::with_capacity(patterns.len());
        for (position, pattern) in patterns.iter_mut().enumerate() {
            normalize_pattern(pattern)?;
            if pattern_index.insert(pattern.id.clone(), position).is_some() {
                return Err(LexiconError::DuplicatePattern(pattern.id.to_string()));
            }
        }

        let triggers = build_trigger_index(&patterns);
        let trigger_index = triggers
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.phrase.clone(), i))
            .collect();

        Ok(Self {
            patterns,
            triggers,
            trigger_index,
            pattern_index,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, LexiconError> {
        let file: LexiconFile = serde_json::from_str(json)?;
        Self::new(file.patterns)
    }

    pub fn load(path: &Path) -> Result<Self, LexiconError> {
        let json = std::fs::read_to_string(path)?;
        let lexicon = Self::from_json_str(&json)?;
        tracing::info!(
            path = %path.display(),
            patterns = lexicon.patterns.len(),
            triggers = lexicon.triggers.len(),
            "Loaded lexicon"
        );
        Ok(lexicon)
    }

    /// The lexicon compiled into the crate.
    pub fn builtin() -> Arc<Lexicon> {
        Arc::clone(&BUILTIN)
    }

    /// Resolve the lexicon for a configuration: an explicit path wins, then
    /// the per-user override file if it exists, then the built-in table.
    pub fn from_config(config: &TriageConfig) -> Result<Arc<Lexicon>, LexiconError> {
        if let Some(path) = &config.lexicon_path {
            return Self::load(path).map(Arc::new);
        }
        let user_path = crate::config::user_lexicon_path();
        if user_path.is_file() {
            return Self::load(&user_path).map(Arc::new);
        }
        Ok(Self::builtin())
    }

    /// Every trigger phrase, longest first.
    pub fn lookup(&self) -> &[TriggerEntry] {
        &self.triggers
    }

    /// Patterns in declaration order.
    pub fn patterns(&self) -> &[DiseasePattern] {
        &self.patterns
    }

    pub fn pattern(&self, id: &DiseaseId) -> Option<&DiseasePattern> {
        self.position(id).map(|i| &self.patterns[i])
    }

    /// Declaration position of a pattern, used for tie-breaking.
    pub fn position(&self, id: &DiseaseId) -> Option<usize> {
        self.pattern_index.get(id).copied()
    }

    pub fn trigger(&self, phrase: &str) -> Option<&TriggerEntry> {
        self.trigger_index.get(phrase).map(|&i| &self.triggers[i])
    }
}

fn normalize_pattern(pattern: &mut DiseasePattern) -> Result<(), LexiconError> {
    let id = pattern.id.to_string();

    if !(pattern.base_confidence > 0.0 && pattern.base_confidence <= 1.0) {
        return Err(LexiconError::InvalidConfidence {
            pattern: id,
            value: pattern.base_confidence,
        });
    }
    if pattern.triggers.is_empty() {
        return Err(LexiconError::NoTriggers(id));
    }

    let mut seen = HashSet::new();
    for phrase in pattern.triggers.iter_mut() {
        *phrase = normalize_text(phrase);
        if phrase.is_empty() {
            return Err(LexiconError::EmptyPhrase(id));
        }
        if !seen.insert(phrase.clone()) {
            return Err(LexiconError::DuplicateTrigger {
                pattern: id,
                phrase: phrase.clone(),
            });
        }
    }

    for phrase in pattern.critical.iter_mut() {
        *phrase = normalize_text(phrase);
        if !seen.contains(phrase.as_str()) {
            return Err(LexiconError::UnknownCritical {
                pattern: id,
                phrase: phrase.clone(),
            });
        }
    }

    Ok(())
}

fn build_trigger_index(patterns: &[DiseasePattern]) -> Vec<TriggerEntry> {
    let mut by_phrase: BTreeMap<&str, TriggerEntry> = BTreeMap::new();

    for pattern in patterns {
        let weight = pattern.urgency.severity_weight();
        for phrase in &pattern.triggers {
            let entry = by_phrase
                .entry(phrase.as_str())
                .or_insert_with(|| TriggerEntry {
                    phrase: phrase.clone(),
                    severity_weight: weight,
                    disease_refs: Vec::new(),
                });
            entry.severity_weight = entry.severity_weight.max(weight);
            entry.disease_refs.push(pattern.id.clone());
        }
    }

    let mut triggers: Vec<TriggerEntry> = by_phrase.into_values().collect();
    // BTreeMap gave alphabetical order; the stable sort keeps it within a length.
    triggers.sort_by_key(|t| std::cmp::Reverse(t.phrase.len()));
    triggers
}
