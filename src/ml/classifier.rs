use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

/// Labels offered to zero-shot classifiers, one per risk level.
pub const RISK_LABELS: &[&str] = &["High", "Medium", "Low"];

/// One `(label, score)` pair from a classifier.
pub type Prediction = (String, f64);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("Classifier backend is not reachable at {0}")]
    Connection(String),

    #[error("Classifier backend returned error (status {status}): {body}")]
    Backend { status: u16, body: String },

    #[error("Model {0} is not installed")]
    ModelNotFound(String),

    #[error("Invalid classifier configuration: {0}")]
    InvalidConfig(String),

    #[error("Unexpected classifier output: {0}")]
    Malformed(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

/// A loaded risk classifier.
///
/// Implementations may block for an unbounded time; callers run them on a
/// blocking thread and bound them externally.
pub trait SymptomClassifier: Send + Sync {
    fn classify(&self, text: &str, labels: &[&str]) -> Result<Vec<Prediction>, ClassifierError>;
}

/// Acquires a classifier (model download, availability check, ...).
///
/// Only ever invoked from an explicit preload, never from a request.
pub trait ClassifierLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn SymptomClassifier>, ClassifierError>;
}

// ═══════════════════════════════════════════════════════════
// Mock implementations
// ═══════════════════════════════════════════════════════════

/// One scripted answer of a [`MockClassifier`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub predictions: Result<Vec<Prediction>, ClassifierError>,
    pub delay: Duration,
}

impl MockResponse {
    pub fn predictions(predictions: &[(&str, f64)]) -> Self {
        Self {
            predictions: Ok(predictions
                .iter()
                .map(|(label, score)| (label.to_string(), *score))
                .collect()),
            delay: Duration::ZERO,
        }
    }

    pub fn error(err: ClassifierError) -> Self {
        Self {
            predictions: Err(err),
            delay: Duration::ZERO,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Mock classifier for testing: scripted answers, delays, or a hang that
/// lasts until the paired sender is dropped.
pub struct MockClassifier {
    scripted: Mutex<VecDeque<MockResponse>>,
    fallback: MockResponse,
    gate: Option<Mutex<Receiver<()>>>,
    calls: AtomicUsize,
}

impl MockClassifier {
    /// Always answer with `predictions`.
    pub fn new(predictions: &[(&str, f64)]) -> Self {
        Self::from_response(MockResponse::predictions(predictions))
    }

    pub fn from_response(response: MockResponse) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback: response,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer with `responses` in order, then repeat the last one.
    pub fn sequence(responses: Vec<MockResponse>) -> Self {
        let fallback = responses
            .last()
            .cloned()
            .unwrap_or_else(|| MockResponse::predictions(&[]));
        Self {
            scripted: Mutex::new(responses.into()),
            fallback,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Block every call until the returned sender is dropped.
    pub fn hanging(predictions: &[(&str, f64)]) -> (Self, Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let mut mock = Self::new(predictions);
        mock.gate = Some(Mutex::new(rx));
        (mock, tx)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SymptomClassifier for MockClassifier {
    fn classify(&self, _text: &str, _labels: &[&str]) -> Result<Vec<Prediction>, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(rx) = gate.lock() {
                // Returns once the sender is dropped.
                let _ = rx.recv();
            }
        }

        let response = self
            .scripted
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| self.fallback.clone());

        if !response.delay.is_zero() {
            std::thread::sleep(response.delay);
        }
        response.predictions
    }
}

/// Mock loader: hands out a fixed classifier, or fails.
pub struct MockLoader {
    result: Result<Arc<dyn SymptomClassifier>, ClassifierError>,
    delay: Duration,
    loads: AtomicUsize,
}

impl MockLoader {
    pub fn new(classifier: Arc<dyn SymptomClassifier>) -> Self {
        Self {
            result: Ok(classifier),
            delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: ClassifierError) -> Self {
        Self {
            result: Err(err),
            delay: Duration::ZERO,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ClassifierLoader for MockLoader {
    fn load(&self) -> Result<Arc<dyn SymptomClassifier>, ClassifierError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.result.clone()
    }
}
