//! Time-bounded, opportunistic ML triage.
//!
//! The adapter owns a one-way lifecycle:
//!
//! ```text
//! Uninitialized --preload()--> Initializing --ok--> Ready
//!                                           \--err--> Unavailable (terminal)
//! ```
//!
//! Classification never triggers a load. Each attempt runs on a blocking
//! worker raced against a deadline; a late worker is detached and its result
//! dropped with the private join handle, so it cannot reach any later call.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::classifier::{ClassifierLoader, Prediction, SymptomClassifier, RISK_LABELS};
use super::MlError;
use crate::triage::{round3, RiskLevel, TriageResult};

// ═══════════════════════════════════════════════════════════
// Lifecycle state
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MlState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Unavailable = 3,
}

impl MlState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Ready,
            _ => Self::Unavailable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for MlState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Invocation record
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Pending,
    Success { label: String, score: f64 },
    Failure { reason: String },
    TimedOut,
}

/// What happened during one ML attempt, for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MlInvocation {
    /// Whether the adapter was Ready when the attempt started.
    pub initialized: bool,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub outcome: InvocationOutcome,
}

impl MlInvocation {
    fn start(initialized: bool, timeout: Duration) -> Self {
        let started_at = Utc::now();
        let deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| started_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            initialized,
            started_at,
            deadline,
            outcome: InvocationOutcome::Pending,
        }
    }

    fn finish(&mut self, result: &Result<TriageResult, MlError>) {
        self.outcome = match result {
            Ok(r) => InvocationOutcome::Success {
                label: r.primary_label.clone(),
                score: r.confidence,
            },
            Err(MlError::TimedOut(_)) => InvocationOutcome::TimedOut,
            Err(e) => InvocationOutcome::Failure {
                reason: e.kind().to_string(),
            },
        };
    }
}

// ═══════════════════════════════════════════════════════════
// Adapter
// ═══════════════════════════════════════════════════════════

/// Wraps an external classifier behind an initialization gate, a deadline
/// and a confidence threshold.
///
/// Independent instances share nothing; construct one per process (or per
/// test) and share it via `Arc`.
pub struct MlTriageAdapter {
    state: AtomicU8,
    classifier: OnceLock<Arc<dyn SymptomClassifier>>,
    loader: Arc<dyn ClassifierLoader>,
}

impl MlTriageAdapter {
    pub fn new(loader: Arc<dyn ClassifierLoader>) -> Self {
        Self {
            state: AtomicU8::new(MlState::Uninitialized as u8),
            classifier: OnceLock::new(),
            loader,
        }
    }

    pub fn state(&self) -> MlState {
        MlState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == MlState::Ready
    }

    /// Acquire the classifier. Only the first caller loads; later callers
    /// observe the outcome without retrying.
    pub async fn preload(&self) -> Result<(), MlError> {
        if let Err(current) = self.state.compare_exchange(
            MlState::Uninitialized as u8,
            MlState::Initializing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return match MlState::from_u8(current) {
                MlState::Ready => Ok(()),
                MlState::Unavailable => Err(MlError::Unavailable),
                _ => Err(MlError::PreloadInProgress),
            };
        }

        tracing::info!("Preloading ML classifier");
        let mut guard = InitGuard { state: &self.state, settled: false };

        let loader = Arc::clone(&self.loader);
        let loaded = tokio::task::spawn_blocking(move || loader.load()).await;

        let outcome = match loaded {
            Ok(Ok(classifier)) => {
                // Only the preload winner reaches here, so the cell is empty.
                let _ = self.classifier.set(classifier);
                self.state.store(MlState::Ready as u8, Ordering::Release);
                tracing::info!("ML classifier ready");
                Ok(())
            }
            Ok(Err(e)) => {
                self.state.store(MlState::Unavailable as u8, Ordering::Release);
                tracing::warn!(error = %e, "ML classifier unavailable");
                Err(MlError::LoadFailed(e.to_string()))
            }
            Err(join_err) => {
                self.state.store(MlState::Unavailable as u8, Ordering::Release);
                tracing::warn!(error = %join_err, "ML classifier load task failed");
                Err(MlError::LoadFailed(join_err.to_string()))
            }
        };
        guard.settled = true;
        outcome
    }

    /// Classify `text`, or say why not.
    pub async fn try_classify(
        &self,
        text: &str,
        timeout: Duration,
        min_confidence: f64,
    ) -> Result<TriageResult, MlError> {
        self.invoke(text, timeout, min_confidence).await.0
    }

    /// Like [`try_classify`](Self::try_classify), also returning the audit record.
    pub async fn invoke(
        &self,
        text: &str,
        timeout: Duration,
        min_confidence: f64,
    ) -> (Result<TriageResult, MlError>, MlInvocation) {
        let classifier = match (self.state(), self.classifier.get()) {
            (MlState::Ready, Some(classifier)) => Arc::clone(classifier),
            (state, _) => {
                tracing::debug!(state = %state, "ML classifier not ready, skipping");
                let mut invocation = MlInvocation::start(false, Duration::ZERO);
                let result = Err(MlError::NotInitialized);
                invocation.finish(&result);
                return (result, invocation);
            }
        };

        let mut invocation = MlInvocation::start(true, timeout);
        let owned_text = text.to_owned();
        let task =
            tokio::task::spawn_blocking(move || classifier.classify(&owned_text, RISK_LABELS));

        // On timeout the handle is dropped, which detaches the worker.
        let result = match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    text_len = text.len(),
                    "ML classification timed out"
                );
                Err(MlError::TimedOut(timeout))
            }
            Ok(Err(join_err)) => Err(MlError::ClassifierFailed(join_err.to_string())),
            Ok(Ok(Err(e))) => Err(MlError::from(e)),
            Ok(Ok(Ok(predictions))) => interpret(&predictions, min_confidence),
        };

        match &result {
            Ok(r) => tracing::debug!(label = %r.primary_label, confidence = r.confidence, "ML triage accepted"),
            Err(e) => tracing::debug!(reason = e.kind(), "ML triage rejected"),
        }

        invocation.finish(&result);
        (result, invocation)
    }
}

/// Marks the adapter Unavailable if a preload is dropped before settling.
struct InitGuard<'a> {
    state: &'a AtomicU8,
    settled: bool,
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.state.store(MlState::Unavailable as u8, Ordering::Release);
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Result interpretation
// ═══════════════════════════════════════════════════════════

const HIGH_RISK: (&str, &str) = ("Visit ER immediately", "Possibly severe condition");
const MEDIUM_RISK: (&str, &str) = ("Telehealth", "Monitor symptoms");
const LOW_RISK: (&str, &str) = ("Self-care", "Mild condition");
const UNKNOWN_CONDITION: &str = "Undetermined";

/// Map a classifier label to risk, suggestion and condition.
pub fn map_label(label: &str) -> (RiskLevel, &'static str, &'static str) {
    let lower = label.to_lowercase();
    if lower.contains("high") {
        (RiskLevel::High, HIGH_RISK.0, HIGH_RISK.1)
    } else if lower.contains("medium") {
        (RiskLevel::Medium, MEDIUM_RISK.0, MEDIUM_RISK.1)
    } else if lower.contains("low") {
        (RiskLevel::Low, LOW_RISK.0, LOW_RISK.1)
    } else {
        (RiskLevel::Medium, MEDIUM_RISK.0, UNKNOWN_CONDITION)
    }
}

/// Turn raw predictions into a result, applying the confidence gate.
pub fn interpret(predictions: &[Prediction], min_confidence: f64) -> Result<TriageResult, MlError> {
    if let Some((label, score)) = predictions
        .iter()
        .find(|(_, s)| !s.is_finite() || !(0.0..=1.0).contains(s))
    {
        return Err(MlError::MalformedResult(format!(
            "score {score} for label {label:?} outside [0, 1]"
        )));
    }

    let (label, score) = predictions
        .iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or(MlError::EmptyResult)?;

    if label.trim().is_empty() {
        return Err(MlError::MalformedResult("empty label".into()));
    }

    if *score < min_confidence {
        return Err(MlError::BelowThreshold {
            score: *score,
            threshold: min_confidence,
        });
    }

    let (risk, suggestion, condition) = map_label(label);
    Ok(TriageResult {
        primary_label: condition.to_string(),
        suggestion: suggestion.to_string(),
        differential: vec![condition.to_string()],
        confidence: round3(*score),
        matched_triggers: Vec::new(),
        used_fallback: false,
        risk,
        urgency: None,
        treatment: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::classifier::{ClassifierError, MockClassifier, MockLoader, MockResponse};
    use std::time::Instant;

    async fn ready_adapter(classifier: MockClassifier) -> MlTriageAdapter {
        let adapter = MlTriageAdapter::new(Arc::new(MockLoader::new(Arc::new(classifier))));
        adapter.preload().await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn uninitialized_fails_immediately() {
        let loader = Arc::new(MockLoader::new(Arc::new(MockClassifier::new(&[("High", 0.9)]))));
        let adapter = MlTriageAdapter::new(loader.clone());

        let start = Instant::now();
        let (result, invocation) = adapter.invoke("chest pain", Duration::from_secs(5), 0.5).await;
        assert!(start.elapsed() < Duration::from_millis(10));

        assert_eq!(result, Err(MlError::NotInitialized));
        assert!(!invocation.initialized);
        assert_eq!(
            invocation.outcome,
            InvocationOutcome::Failure { reason: "not_initialized".into() }
        );
        // Classification never loads implicitly.
        assert_eq!(loader.load_count(), 0);
        assert_eq!(adapter.state(), MlState::Uninitialized);
    }

    #[tokio::test]
    async fn preload_makes_adapter_ready() {
        let adapter = ready_adapter(MockClassifier::new(&[("High", 0.9)])).await;
        assert_eq!(adapter.state(), MlState::Ready);
        // Idempotent once ready.
        assert_eq!(adapter.preload().await, Ok(()));
    }

    #[tokio::test]
    async fn hanging_classifier_times_out_promptly() {
        let (mock, release) = MockClassifier::hanging(&[("High", 0.99)]);
        let adapter = ready_adapter(mock).await;

        let start = Instant::now();
        let (result, invocation) = adapter
            .invoke("chest pain", Duration::from_millis(50), 0.5)
            .await;
        let elapsed = start.elapsed();

        assert_eq!(result, Err(MlError::TimedOut(Duration::from_millis(50))));
        assert_eq!(invocation.outcome, InvocationOutcome::TimedOut);
        assert!(invocation.deadline > invocation.started_at);
        assert!(elapsed < Duration::from_millis(200), "took {elapsed:?}");

        // Let the detached worker finish so the runtime can shut down.
        drop(release);
    }

    #[tokio::test]
    async fn late_result_does_not_leak_into_next_call() {
        let mock = MockClassifier::sequence(vec![
            MockResponse::predictions(&[("High", 0.95)]).after(Duration::from_millis(150)),
            MockResponse::predictions(&[("Low", 0.8)]),
        ]);
        let adapter = ready_adapter(mock).await;

        let first = adapter
            .try_classify("chest pain", Duration::from_millis(20), 0.5)
            .await;
        assert!(matches!(first, Err(MlError::TimedOut(_))));

        let second = adapter
            .try_classify("runny nose", Duration::from_secs(1), 0.5)
            .await
            .unwrap();
        assert_eq!(second.risk, RiskLevel::Low);

        // The abandoned worker completes now; the result already returned is unaffected.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(second.risk, RiskLevel::Low);
        assert_eq!(second.confidence, 0.8);
    }

    #[tokio::test]
    async fn low_confidence_is_rejected() {
        let adapter = ready_adapter(MockClassifier::new(&[("High", 0.45), ("Low", 0.3)])).await;
        let result = adapter.try_classify("cough", Duration::from_secs(1), 0.6).await;
        assert_eq!(
            result,
            Err(MlError::BelowThreshold { score: 0.45, threshold: 0.6 })
        );
    }

    #[tokio::test]
    async fn empty_predictions_are_rejected() {
        let adapter = ready_adapter(MockClassifier::new(&[])).await;
        let (result, invocation) = adapter.invoke("cough", Duration::from_secs(1), 0.1).await;
        assert_eq!(result, Err(MlError::EmptyResult));
        assert!(invocation.initialized);
    }

    #[tokio::test]
    async fn malformed_output_is_rejected() {
        let adapter = ready_adapter(MockClassifier::from_response(MockResponse::error(
            ClassifierError::Malformed("not json".into()),
        )))
        .await;
        let result = adapter.try_classify("cough", Duration::from_secs(1), 0.1).await;
        assert!(matches!(result, Err(MlError::MalformedResult(_))));
    }

    #[tokio::test]
    async fn success_is_not_a_fallback() {
        let adapter = ready_adapter(MockClassifier::new(&[("Low", 0.1), ("High", 0.87)])).await;
        let (result, invocation) = adapter
            .invoke("chest pain", Duration::from_secs(1), 0.6)
            .await;
        let result = result.unwrap();
        assert!(!result.used_fallback);
        assert_eq!(result.risk, RiskLevel::High);
        assert_eq!(result.suggestion, "Visit ER immediately");
        assert_eq!(result.differential, vec!["Possibly severe condition".to_string()]);
        assert_eq!(
            invocation.outcome,
            InvocationOutcome::Success {
                label: "Possibly severe condition".into(),
                score: 0.87
            }
        );
    }

    #[tokio::test]
    async fn concurrent_preloads_load_once() {
        let classifier = Arc::new(MockClassifier::new(&[("High", 0.9)]));
        let loader = Arc::new(MockLoader::new(classifier).with_delay(Duration::from_millis(50)));
        let adapter = MlTriageAdapter::new(loader.clone());

        let (a, b) = tokio::join!(adapter.preload(), adapter.preload());
        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.contains(&Err(MlError::PreloadInProgress)));
        assert_eq!(loader.load_count(), 1);
        assert_eq!(adapter.state(), MlState::Ready);
    }

    #[tokio::test]
    async fn failed_load_is_terminal() {
        let loader = Arc::new(MockLoader::failing(ClassifierError::ModelNotFound(
            "medgemma:4b".into(),
        )));
        let adapter = MlTriageAdapter::new(loader.clone());

        assert!(matches!(adapter.preload().await, Err(MlError::LoadFailed(_))));
        assert_eq!(adapter.state(), MlState::Unavailable);

        assert_eq!(adapter.preload().await, Err(MlError::Unavailable));
        assert_eq!(loader.load_count(), 1);

        let result = adapter.try_classify("cough", Duration::from_secs(1), 0.1).await;
        assert_eq!(result, Err(MlError::NotInitialized));
    }

    #[test]
    fn label_mapping() {
        assert_eq!(map_label("HIGH risk").0, RiskLevel::High);
        assert_eq!(map_label("Medium").0, RiskLevel::Medium);
        assert_eq!(map_label("low").2, "Mild condition");
        assert_eq!(map_label("banana"), (RiskLevel::Medium, "Telehealth", "Undetermined"));
    }

    #[test]
    fn interpret_rejects_out_of_range_scores() {
        let preds = vec![("High".to_string(), 1.7)];
        assert!(matches!(interpret(&preds, 0.5), Err(MlError::MalformedResult(_))));
        let preds = vec![("High".to_string(), f64::NAN)];
        assert!(matches!(interpret(&preds, 0.5), Err(MlError::MalformedResult(_))));
        let preds = vec![(" ".to_string(), 0.9)];
        assert!(matches!(interpret(&preds, 0.5), Err(MlError::MalformedResult(_))));
    }

    #[test]
    fn interpret_accepts_threshold_boundary() {
        let preds = vec![("Medium".to_string(), 0.6)];
        let result = interpret(&preds, 0.6).unwrap();
        assert_eq!(result.confidence, 0.6);
        assert_eq!(result.risk, RiskLevel::Medium);
    }

    #[test]
    fn invocation_serializes_with_status_tag() {
        let mut invocation = MlInvocation::start(true, Duration::from_secs(2));
        invocation.finish(&Err(MlError::EmptyResult));
        let json = serde_json::to_value(&invocation).unwrap();
        assert_eq!(json["outcome"]["status"], "failure");
        assert_eq!(json["outcome"]["reason"], "empty_result");
        assert_eq!(json["initialized"], true);
    }
}
