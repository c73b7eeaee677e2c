//! Zero-shot risk classification over a local Ollama instance.
//!
//! The classifier asks the model for a probability per risk label and
//! expects a JSON object back (`{"High": 0.7, "Medium": 0.2, "Low": 0.1}`).
//! Symptom text never leaves the machine: only loopback endpoints are
//! accepted.
//!
//! HTTP clients are built per call. Both `load` and `classify` run on a
//! blocking worker, and a blocking `reqwest` client must not be created or
//! dropped on an async thread.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::classifier::{ClassifierError, ClassifierLoader, Prediction, SymptomClassifier};

/// Upper bound for a single HTTP exchange. Abandoned attempts still end.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

static MODEL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*(/[a-zA-Z0-9][a-zA-Z0-9._-]*)?(:[a-zA-Z0-9._-]+)?$")
        .expect("Invalid model name regex")
});

const SYSTEM_PROMPT: &str = "You are a triage risk classifier. \
Given a patient's symptom description, estimate the probability that each \
risk label applies. Reply with a single JSON object mapping every label to a \
number between 0 and 1. Do not add any other text.";

// ═══════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════

/// Accept only loopback endpoints: localhost, 127.0.0.1, [::1].
pub fn validate_base_url(url: &str) -> Result<(), ClassifierError> {
    let after_scheme = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| ClassifierError::InvalidConfig(format!("Unsupported URL: {url}")))?;

    let host = if after_scheme.starts_with('[') {
        after_scheme
            .split(']')
            .next()
            .unwrap_or("")
            .trim_start_matches('[')
    } else {
        after_scheme
            .split(['/', ':'])
            .next()
            .unwrap_or("")
    };

    match host {
        "localhost" | "127.0.0.1" | "::1" => Ok(()),
        _ => Err(ClassifierError::InvalidConfig(format!(
            "Endpoint must be local, got {url}"
        ))),
    }
}

/// Ollama model naming: `[namespace/]model[:tag]`.
pub fn validate_model_name(name: &str) -> Result<(), ClassifierError> {
    if MODEL_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ClassifierError::InvalidConfig(format!(
            "Invalid model name: {name:?}"
        )))
    }
}

// ═══════════════════════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════════════════════

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a str,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

// ═══════════════════════════════════════════════════════════
// Classifier
// ═══════════════════════════════════════════════════════════

pub struct OllamaClassifier {
    base_url: String,
    model: String,
}

impl OllamaClassifier {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl SymptomClassifier for OllamaClassifier {
    fn classify(&self, text: &str, labels: &[&str]) -> Result<Vec<Prediction>, ClassifierError> {
        let prompt = build_prompt(text, labels);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            system: SYSTEM_PROMPT,
            stream: false,
            format: "json",
            options: GenerateOptions { temperature: 0.0 },
        };

        let response = http_client()?
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .map_err(|e| map_send_error(e, &self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClassifierError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;

        parse_label_scores(&parsed.response, labels)
    }
}

/// Prompt listing the candidate labels and the patient's text.
pub fn build_prompt(text: &str, labels: &[&str]) -> String {
    format!(
        "Labels: {}\nSymptoms: \"\"\"{}\"\"\"\nJSON:",
        labels.join(", "),
        text.trim()
    )
}

/// Parse the model's JSON object into predictions, best first.
///
/// Keys are matched to `labels` case-insensitively; keys outside `labels`
/// are ignored. An object with none of the labels yields an empty list.
pub fn parse_label_scores(raw: &str, labels: &[&str]) -> Result<Vec<Prediction>, ClassifierError> {
    let value: serde_json::Value = serde_json::from_str(raw.trim())
        .map_err(|e| ClassifierError::Malformed(format!("Invalid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| ClassifierError::Malformed("Expected a JSON object".into()))?;

    let mut predictions = Vec::new();
    for label in labels {
        let Some((_, score)) = object.iter().find(|(key, _)| key.eq_ignore_ascii_case(label))
        else {
            continue;
        };
        let score = score.as_f64().ok_or_else(|| {
            ClassifierError::Malformed(format!("Score for {label} is not a number"))
        })?;
        predictions.push((label.to_string(), score));
    }

    predictions.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(predictions)
}

// ═══════════════════════════════════════════════════════════
// Loader
// ═══════════════════════════════════════════════════════════

/// Confirms the model is installed locally, then hands out a classifier.
pub struct OllamaLoader {
    base_url: String,
    model: String,
}

impl OllamaLoader {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn list_models(&self) -> Result<Vec<String>, ClassifierError> {
        let response = http_client()?
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .map_err(|e| map_send_error(e, &self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ClassifierError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TagsResponse = response
            .json()
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

impl ClassifierLoader for OllamaLoader {
    fn load(&self) -> Result<Arc<dyn SymptomClassifier>, ClassifierError> {
        validate_base_url(&self.base_url)?;
        validate_model_name(&self.model)?;

        let installed = self.list_models()?;
        if !installed.iter().any(|m| m.starts_with(&self.model)) {
            return Err(ClassifierError::ModelNotFound(self.model.clone()));
        }

        tracing::info!(model = %self.model, "Ollama classifier available");
        Ok(Arc::new(OllamaClassifier::new(&self.base_url, &self.model)))
    }
}

fn http_client() -> Result<reqwest::blocking::Client, ClassifierError> {
    reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| ClassifierError::HttpClient(e.to_string()))
}

fn map_send_error(err: reqwest::Error, base_url: &str) -> ClassifierError {
    if err.is_connect() {
        ClassifierError::Connection(base_url.to_string())
    } else if err.is_timeout() {
        ClassifierError::HttpClient(format!(
            "Request timed out after {}s",
            REQUEST_TIMEOUT.as_secs()
        ))
    } else {
        ClassifierError::HttpClient(err.to_string())
    }
}
