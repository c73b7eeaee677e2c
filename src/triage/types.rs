use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Identifiers & tiers
// ═══════════════════════════════════════════════════════════

/// Stable identifier of a disease pattern (e.g. `"acute_myocardial_infarction"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiseaseId(String);

impl DiseaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DiseaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How soon the patient should be seen. Drives the suggested next action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyTier {
    Immediate,
    Urgent,
    PrimaryCare,
    SelfCare,
}

impl UrgencyTier {
    pub const ALL: [UrgencyTier; 4] = [
        Self::Immediate,
        Self::Urgent,
        Self::PrimaryCare,
        Self::SelfCare,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Urgent => "urgent",
            Self::PrimaryCare => "primary_care",
            Self::SelfCare => "self_care",
        }
    }

    /// Short label used inside differential entries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Immediate => "Emergency",
            Self::Urgent => "Urgent",
            Self::PrimaryCare => "Primary Care",
            Self::SelfCare => "Self-Care",
        }
    }

    /// Next-action text. Total over all tiers.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Immediate => "Call emergency services immediately",
            Self::Urgent => "See a doctor immediately or go to the ER",
            Self::PrimaryCare => "Book a telehealth or primary-care visit",
            Self::SelfCare => "Self-care at home",
        }
    }

    /// Weight a trigger phrase inherits from the most urgent pattern using it.
    pub fn severity_weight(&self) -> f64 {
        match self {
            Self::Immediate => 2.0,
            Self::Urgent => 1.5,
            Self::PrimaryCare => 1.0,
            Self::SelfCare => 0.5,
        }
    }

    pub fn risk(&self) -> RiskLevel {
        match self {
            Self::Immediate | Self::Urgent => RiskLevel::High,
            Self::PrimaryCare => RiskLevel::Medium,
            Self::SelfCare => RiskLevel::Low,
        }
    }
}

/// Coarse risk bucket shared by the rule-based and ML paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Demographics
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

/// Age band in which a pattern is more prevalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeRisk {
    /// Over 65.
    Elderly,
    /// Under 30.
    Young,
    /// 18 to 40 inclusive.
    YoungAdult,
}

impl AgeRisk {
    /// Multiplier for a patient of `age`, 1.0 when outside the band.
    pub fn multiplier(&self, age: u32) -> f64 {
        match self {
            Self::Elderly if age > 65 => 1.2,
            Self::Young if age < 30 => 1.2,
            Self::YoungAdult if (18..=40).contains(&age) => 1.1,
            _ => 1.0,
        }
    }
}

/// Pattern-side risk metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemographicRisk {
    #[serde(default)]
    pub age_risk: Option<AgeRisk>,
    #[serde(default)]
    pub sex_prevalence: Option<Sex>,
}

/// Caller-supplied patient context. Every field is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    pub age: Option<u32>,
    pub sex: Option<Sex>,
}

impl Demographics {
    pub fn new(age: Option<u32>, sex: Option<Sex>) -> Self {
        Self { age, sex }
    }

    /// Combined multiplier against a pattern's risk metadata.
    pub fn multiplier(&self, risk: &DemographicRisk) -> f64 {
        let mut factor = 1.0;
        if let (Some(age), Some(band)) = (self.age, risk.age_risk) {
            factor *= band.multiplier(age);
        }
        if let (Some(sex), Some(prevalent)) = (self.sex, risk.sex_prevalence) {
            if sex == prevalent {
                factor *= 1.1;
            }
        }
        factor
    }
}

// ═══════════════════════════════════════════════════════════
// Lexicon records
// ═══════════════════════════════════════════════════════════

/// One trigger phrase as indexed by the lexicon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEntry {
    /// Lower-cased, whitespace-collapsed, non-empty.
    pub phrase: String,
    /// Always > 0.
    pub severity_weight: f64,
    /// Patterns referencing this phrase, in declaration order.
    pub disease_refs: Vec<DiseaseId>,
}

/// A disease and the phrases that point to it. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseasePattern {
    pub id: DiseaseId,
    pub name: String,
    /// Ordered, unique.
    pub triggers: Vec<String>,
    /// Subset of `triggers` whose match counts double.
    #[serde(default)]
    pub critical: Vec<String>,
    /// In (0, 1].
    pub base_confidence: f64,
    pub urgency: UrgencyTier,
    pub treatment: String,
    #[serde(default)]
    pub demographics: DemographicRisk,
    #[serde(default = "default_chronic_possible")]
    pub chronic_possible: bool,
}

fn default_chronic_possible() -> bool {
    true
}

impl DiseasePattern {
    pub fn is_critical(&self, phrase: &str) -> bool {
        self.critical.iter().any(|c| c == phrase)
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }
}

// ═══════════════════════════════════════════════════════════
// Per-call results
// ═══════════════════════════════════════════════════════════

/// Scoring state for one disease within one classification call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub disease: DiseaseId,
    pub raw_score: f64,
    /// Phrases in the order they were accepted (longest first).
    pub matched_phrases: Vec<String>,
    /// In [0, 1]. Zero until the ranker fills it.
    pub normalized_score: f64,
}

impl ScoredCandidate {
    pub fn new(disease: DiseaseId) -> Self {
        Self {
            disease,
            raw_score: 0.0,
            matched_phrases: Vec::new(),
            normalized_score: 0.0,
        }
    }

    /// Normalized score rounded for external reporting.
    pub fn reported_score(&self) -> f64 {
        round3(self.normalized_score)
    }
}

/// What the caller gets back, from either path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageResult {
    pub primary_label: String,
    pub suggestion: String,
    /// At most three entries, primary first.
    pub differential: Vec<String>,
    /// In [0, 1], rounded to three decimals.
    pub confidence: f64,
    /// Deduplicated.
    pub matched_triggers: Vec<String>,
    pub used_fallback: bool,
    pub risk: RiskLevel,
    pub urgency: Option<UrgencyTier>,
    pub treatment: Option<String>,
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
