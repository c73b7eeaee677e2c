//! Entry points for the request-handling layer.
//!
//! ML is tried first when it is ready; any ML failure falls through to the
//! rule-based engine, so every call yields a result.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::{TriageConfig, DEFAULT_MIN_CONFIDENCE, DEFAULT_ML_TIMEOUT};
use crate::ml::{MlError, MlInvocation, MlState, MlTriageAdapter, OllamaLoader};
use crate::triage::{Demographics, Lexicon, LexiconError, RuleBasedEngine, TriageResult};

/// Deadline and confidence gate for the ML path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MlSettings {
    pub timeout: Duration,
    pub min_confidence: f64,
}

impl Default for MlSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ML_TIMEOUT,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

impl From<&TriageConfig> for MlSettings {
    fn from(config: &TriageConfig) -> Self {
        Self {
            timeout: config.ml_timeout,
            min_confidence: config.min_confidence,
        }
    }
}

/// A result plus what the persistence layer needs to audit it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageOutcome {
    pub result: TriageResult,
    /// The adapter was Ready and a classification was launched.
    pub ml_attempted: bool,
    pub invocation: Option<MlInvocation>,
    /// Why the rule engine answered instead of the ML path.
    #[serde(serialize_with = "serialize_reason")]
    pub fallback_reason: Option<MlError>,
}

fn serialize_reason<S: serde::Serializer>(
    reason: &Option<MlError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match reason {
        Some(e) => serializer.serialize_some(e.kind()),
        None => serializer.serialize_none(),
    }
}

pub struct TriageService {
    engine: RuleBasedEngine,
    ml: Arc<MlTriageAdapter>,
    settings: MlSettings,
}

impl TriageService {
    pub fn new(engine: RuleBasedEngine, ml: Arc<MlTriageAdapter>, settings: MlSettings) -> Self {
        Self { engine, ml, settings }
    }

    /// Lexicon and Ollama backend as configured. The ML path stays
    /// uninitialized until [`preload_ml`](Self::preload_ml) runs.
    pub fn from_config(config: &TriageConfig) -> Result<Self, LexiconError> {
        let lexicon = Lexicon::from_config(config)?;
        let loader = Arc::new(OllamaLoader::new(&config.ollama_url, &config.ml_model));
        tracing::info!(
            patterns = lexicon.patterns().len(),
            ollama_url = %config.ollama_url,
            model = %config.ml_model,
            "Triage service configured"
        );
        Ok(Self::new(
            RuleBasedEngine::new(lexicon),
            Arc::new(MlTriageAdapter::new(loader)),
            MlSettings::from(config),
        ))
    }

    pub fn engine(&self) -> &RuleBasedEngine {
        &self.engine
    }

    pub fn settings(&self) -> MlSettings {
        self.settings
    }

    pub fn ml_state(&self) -> MlState {
        self.ml.state()
    }

    /// Rule-based classification only.
    pub fn classify(&self, text: &str, demographics: Option<&Demographics>) -> TriageResult {
        self.engine.classify(text, demographics)
    }

    /// Once at startup. Failure leaves the service on the rule-based path.
    pub async fn preload_ml(&self) -> Result<(), MlError> {
        self.ml.preload().await
    }

    pub async fn classify_with_ml_fallback(
        &self,
        text: &str,
        timeout: Duration,
        min_confidence: f64,
    ) -> TriageResult {
        self.triage_with_audit(text, timeout, min_confidence)
            .await
            .result
    }

    /// ML first, rule engine on any ML failure.
    pub async fn triage_with_audit(
        &self,
        text: &str,
        timeout: Duration,
        min_confidence: f64,
    ) -> TriageOutcome {
        let (attempt, invocation) = self.ml.invoke(text, timeout, min_confidence).await;
        let ml_attempted = invocation.initialized;

        match attempt {
            Ok(result) => TriageOutcome {
                result,
                ml_attempted,
                invocation: Some(invocation),
                fallback_reason: None,
            },
            Err(reason) => {
                if ml_attempted {
                    tracing::info!(reason = reason.kind(), "Falling back to rule-based triage");
                }
                TriageOutcome {
                    result: self.engine.triage(text),
                    ml_attempted,
                    invocation: ml_attempted.then_some(invocation),
                    fallback_reason: Some(reason),
                }
            }
        }
    }

    /// [`classify_with_ml_fallback`](Self::classify_with_ml_fallback) with the configured settings.
    pub async fn triage(&self, text: &str) -> TriageResult {
        self.classify_with_ml_fallback(text, self.settings.timeout, self.settings.min_confidence)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{ClassifierError, MockClassifier, MockLoader};
    use crate::triage::RiskLevel;

    fn service_with(loader: MockLoader) -> TriageService {
        TriageService::new(
            RuleBasedEngine::builtin(),
            Arc::new(MlTriageAdapter::new(Arc::new(loader))),
            MlSettings::default(),
        )
    }

    fn loader_for(predictions: &[(&str, f64)]) -> MockLoader {
        MockLoader::new(Arc::new(MockClassifier::new(predictions)))
    }

    #[tokio::test]
    async fn without_preload_rule_engine_answers() {
        let service = service_with(loader_for(&[("High", 0.99)]));
        let outcome = service
            .triage_with_audit("Severe chest pain, shortness of breath", Duration::from_secs(2), 0.6)
            .await;

        assert!(!outcome.ml_attempted);
        assert!(outcome.invocation.is_none());
        assert_eq!(outcome.fallback_reason, Some(MlError::NotInitialized));
        assert!(outcome.result.used_fallback);
        assert_eq!(outcome.result.primary_label, "Acute Myocardial Infarction");
    }

    #[tokio::test]
    async fn confident_ml_result_is_used() {
        let service = service_with(loader_for(&[("High", 0.9), ("Low", 0.1)]));
        service.preload_ml().await.unwrap();
        assert_eq!(service.ml_state(), MlState::Ready);

        let outcome = service
            .triage_with_audit("chest pain", Duration::from_secs(2), 0.6)
            .await;
        assert!(outcome.ml_attempted);
        assert!(outcome.fallback_reason.is_none());
        assert!(!outcome.result.used_fallback);
        assert_eq!(outcome.result.risk, RiskLevel::High);
    }

    #[tokio::test]
    async fn unconfident_ml_result_falls_back() {
        let service = service_with(loader_for(&[("Low", 0.3)]));
        service.preload_ml().await.unwrap();

        let result = service
            .classify_with_ml_fallback("runny nose and cough", Duration::from_secs(2), 0.6)
            .await;
        assert!(result.used_fallback);
        assert_eq!(result.primary_label, "Common Cold");
        assert_eq!(result, service.classify("runny nose and cough", None));
    }

    #[tokio::test]
    async fn slow_ml_falls_back_within_deadline() {
        let (mock, release) = MockClassifier::hanging(&[("High", 0.99)]);
        let service = service_with(MockLoader::new(Arc::new(mock)));
        service.preload_ml().await.unwrap();

        let start = std::time::Instant::now();
        let outcome = service
            .triage_with_audit("runny nose and cough", Duration::from_millis(50), 0.6)
            .await;
        assert!(start.elapsed() < Duration::from_millis(200));
        assert!(outcome.ml_attempted);
        assert!(matches!(outcome.fallback_reason, Some(MlError::TimedOut(_))));
        assert_eq!(outcome.result.primary_label, "Common Cold");

        drop(release);
    }

    #[tokio::test]
    async fn failed_preload_keeps_rule_path() {
        let service = service_with(MockLoader::failing(ClassifierError::Connection(
            "http://localhost:11434".into(),
        )));
        assert!(service.preload_ml().await.is_err());
        assert_eq!(service.ml_state(), MlState::Unavailable);

        let result = service.triage("").await;
        assert!(result.used_fallback);
        assert!(result.differential.is_empty());
    }

    #[tokio::test]
    async fn outcome_serializes_reason_kind() {
        let service = service_with(loader_for(&[]));
        let outcome = service
            .triage_with_audit("cough", Duration::from_secs(1), 0.6)
            .await;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["fallback_reason"], "not_initialized");
        assert_eq!(json["ml_attempted"], false);
        assert!(json["result"]["used_fallback"].as_bool().unwrap());
    }

    #[test]
    fn settings_follow_config() {
        let config = TriageConfig {
            ml_timeout: Duration::from_millis(750),
            min_confidence: 0.45,
            ..TriageConfig::default()
        };
        let settings = MlSettings::from(&config);
        assert_eq!(settings.timeout, Duration::from_millis(750));
        assert_eq!(settings.min_confidence, 0.45);
        assert_eq!(MlSettings::default().timeout, DEFAULT_ML_TIMEOUT);
    }

    #[test]
    fn from_config_starts_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexicon.json");
        std::fs::write(
            &path,
            r#"{"patterns":[{"id":"cold","name":"Cold","triggers":["runny nose"],
                "base_confidence":0.5,"urgency":"self_care","treatment":"Rest"}]}"#,
        )
        .unwrap();

        let config = TriageConfig {
            lexicon_path: Some(path),
            ..TriageConfig::default()
        };
        let service = TriageService::from_config(&config).unwrap();
        assert_eq!(service.ml_state(), MlState::Uninitialized);
        assert_eq!(service.settings(), MlSettings::default());
        assert_eq!(service.engine().lexicon().patterns().len(), 1);
        assert_eq!(service.classify("runny nose", None).primary_label, "Cold");
    }
}
