use std::cmp::Ordering;

use super::lexicon::Lexicon;
use super::scorer::Candidates;
use super::types::{Demographics, ScoredCandidate};
use crate::config::{DIFFERENTIAL_SIZE, MIN_MATCHED_CONFIDENCE};

/// Candidates ordered best first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    ranked: Vec<ScoredCandidate>,
}

impl Ranking {
    /// The head of the ranking, `None` when nothing matched.
    pub fn primary(&self) -> Option<&ScoredCandidate> {
        self.ranked.first()
    }

    /// Top candidates for the differential list, primary included.
    pub fn differential(&self) -> &[ScoredCandidate] {
        &self.ranked[..self.ranked.len().min(DIFFERENTIAL_SIZE)]
    }

    pub fn all(&self) -> &[ScoredCandidate] {
        &self.ranked
    }
}

/// Normalize and order scored candidates.
///
/// `normalized = min(raw / trigger_count, 1) * base_confidence * demographics`,
/// capped at 1. Ordering uses the full-precision value and falls back to
/// pattern declaration order on ties. Only after ordering is the reported
/// score lifted to `MIN_MATCHED_CONFIDENCE`, so a matched disease always
/// outranks the undetermined sentinel without disturbing the order.
pub fn rank(
    candidates: Candidates,
    lexicon: &Lexicon,
    demographics: Option<&Demographics>,
) -> Ranking {
    let mut scored: Vec<(usize, f64, ScoredCandidate)> = candidates
        .into_values()
        .filter_map(|candidate| {
            let position = lexicon.position(&candidate.disease)?;
            let pattern = &lexicon.patterns()[position];

            let coverage = (candidate.raw_score / pattern.trigger_count() as f64).min(1.0);
            let demographic = demographics
                .map(|d| d.multiplier(&pattern.demographics))
                .unwrap_or(1.0);
            let exact = (coverage * pattern.base_confidence * demographic).clamp(0.0, 1.0);

            Some((position, exact, candidate))
        })
        .collect();

    scored.sort_by(|(pos_a, score_a, _), (pos_b, score_b, _)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(Ordering::Equal)
            .then(pos_a.cmp(pos_b))
    });

    let ranked = scored
        .into_iter()
        .map(|(_, exact, mut candidate)| {
            candidate.normalized_score = exact.max(MIN_MATCHED_CONFIDENCE).min(1.0);
            candidate
        })
        .collect();

    Ranking { ranked }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::scorer::{score, Scoring};
    use crate::triage::types::{
        AgeRisk, DemographicRisk, DiseaseId, DiseasePattern, Sex, UrgencyTier,
    };

    fn pattern(id: &str, triggers: &[&str], base: f64) -> DiseasePattern {
        DiseasePattern {
            id: DiseaseId::new(id),
            name: id.to_string(),
            triggers: triggers.iter().map(|s| s.to_string()).collect(),
            critical: vec![],
            base_confidence: base,
            urgency: UrgencyTier::PrimaryCare,
            treatment: "Rest".into(),
            demographics: DemographicRisk::default(),
            chronic_possible: true,
        }
    }

    fn candidates(text: &str, lexicon: &Lexicon) -> Candidates {
        match score(text, lexicon) {
            Scoring::Scored(c) => c,
            Scoring::Undetermined => panic!("expected scored input"),
        }
    }

    #[test]
    fn normalizes_by_trigger_count_and_base_confidence() {
        let lexicon = Lexicon::new(vec![pattern("a", &["cough", "fever"], 0.8)]).unwrap();
        let ranking = rank(candidates("cough", &lexicon), &lexicon, None);
        let primary = ranking.primary().unwrap();
        assert!((primary.normalized_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn coverage_capped_at_one() {
        let mut p = pattern("a", &["cough"], 0.9);
        p.critical = vec!["cough".into()];
        let lexicon = Lexicon::new(vec![p]).unwrap();
        let ranking = rank(candidates("severe cough", &lexicon), &lexicon, None);
        assert!((ranking.primary().unwrap().normalized_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn ties_go_to_first_declared() {
        let lexicon = Lexicon::new(vec![
            pattern("first", &["cough", "x1"], 0.5),
            pattern("second", &["cough", "x2"], 0.5),
            pattern("third", &["cough", "x3"], 0.5),
        ])
        .unwrap();
        for _ in 0..20 {
            let ranking = rank(candidates("cough", &lexicon), &lexicon, None);
            let order: Vec<&str> = ranking.all().iter().map(|c| c.disease.as_str()).collect();
            assert_eq!(order, vec!["first", "second", "third"]);
        }
    }

    #[test]
    fn differential_limited_to_three() {
        let lexicon = Lexicon::new(vec![
            pattern("a", &["cough"], 0.9),
            pattern("b", &["cough"], 0.8),
            pattern("c", &["cough"], 0.7),
            pattern("d", &["cough"], 0.6),
        ])
        .unwrap();
        let ranking = rank(candidates("cough", &lexicon), &lexicon, None);
        assert_eq!(ranking.all().len(), 4);
        assert_eq!(ranking.differential().len(), 3);
        assert_eq!(ranking.primary().unwrap().disease.as_str(), "a");
    }

    #[test]
    fn floor_applies_after_ordering() {
        // Both exact scores fall below the floor; the larger one still leads.
        let lexicon = Lexicon::new(vec![
            pattern(
                "wide",
                &["cough", "w1", "w2", "w3", "w4", "w5", "w6", "w7", "w8", "w9"],
                0.5,
            ),
            pattern("narrow", &["cough", "n1", "n2", "n3", "n4", "n5"], 0.5),
        ])
        .unwrap();
        let ranking = rank(candidates("cough", &lexicon), &lexicon, None);
        assert_eq!(ranking.primary().unwrap().disease.as_str(), "narrow");
        for candidate in ranking.all() {
            assert_eq!(candidate.normalized_score, MIN_MATCHED_CONFIDENCE);
        }
    }

    #[test]
    fn demographics_boost_and_cap() {
        let mut elderly = pattern("elderly", &["cough", "fever"], 0.9);
        elderly.demographics = DemographicRisk {
            age_risk: Some(AgeRisk::Elderly),
            sex_prevalence: Some(Sex::Male),
        };
        let plain = pattern("plain", &["cough", "fever"], 0.9);
        let lexicon = Lexicon::new(vec![plain, elderly]).unwrap();

        let patient = Demographics::new(Some(80), Some(Sex::Male));
        let ranking = rank(candidates("cough", &lexicon), &lexicon, Some(&patient));
        let primary = ranking.primary().unwrap();
        assert_eq!(primary.disease.as_str(), "elderly");
        assert!((primary.normalized_score - 0.45 * 1.32).abs() < 1e-9);

        let full = rank(candidates("cough and fever", &lexicon), &lexicon, Some(&patient));
        assert_eq!(full.primary().unwrap().normalized_score, 1.0);
    }

    #[test]
    fn empty_candidates_give_no_primary() {
        let lexicon = Lexicon::builtin();
        let ranking = rank(Candidates::new(), &lexicon, None);
        assert!(ranking.primary().is_none());
        assert!(ranking.differential().is_empty());
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let lexicon = Lexicon::builtin();
        let text = "sudden severe chest pain shortness of breath diaphoresis jaw pain left arm pain cold sweat";
        let ranking = rank(candidates(text, &lexicon), &lexicon, None);
        for candidate in ranking.all() {
            assert!((0.0..=1.0).contains(&candidate.normalized_score));
        }
    }
}
