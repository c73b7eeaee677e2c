use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "symptom-triage";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Confidence of the "could not determine" result. Below every matched score.
pub const UNDETERMINED_CONFIDENCE: f64 = 0.05;

/// Lowest confidence reported for a disease that matched at least one phrase.
pub const MIN_MATCHED_CONFIDENCE: f64 = 0.1;

/// Number of entries in the differential list, primary included.
pub const DIFFERENTIAL_SIZE: usize = 3;

/// ML attempt budget before falling back to rules.
pub const DEFAULT_ML_TIMEOUT: Duration = Duration::from_secs(2);

/// ML answers below this confidence are discarded in favour of rules.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.6;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_ML_MODEL: &str = "medgemma:4b";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "symptom_triage=info,warn"
}

/// Per-user data directory: `~/.symptom-triage/`.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(format!(".{APP_NAME}"))
}

/// Lexicon override picked up automatically when present.
pub fn user_lexicon_path() -> PathBuf {
    app_data_dir().join("lexicon.json")
}

/// Runtime configuration, usually read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct TriageConfig {
    /// Explicit lexicon file. `None` means user override or built-in.
    pub lexicon_path: Option<PathBuf>,
    pub ollama_url: String,
    pub ml_model: String,
    pub ml_timeout: Duration,
    pub min_confidence: f64,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            lexicon_path: None,
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            ml_model: DEFAULT_ML_MODEL.to_string(),
            ml_timeout: DEFAULT_ML_TIMEOUT,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

impl TriageConfig {
    /// Read overrides from `TRIAGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("TRIAGE_LEXICON_PATH").filter(|p| !p.trim().is_empty()) {
            config.lexicon_path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("TRIAGE_OLLAMA_URL").filter(|u| !u.trim().is_empty()) {
            config.ollama_url = url;
        }
        if let Some(model) = lookup("TRIAGE_ML_MODEL").filter(|m| !m.trim().is_empty()) {
            config.ml_model = model;
        }
        if let Some(raw) = lookup("TRIAGE_ML_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.ml_timeout = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid TRIAGE_ML_TIMEOUT_MS"),
            }
        }
        if let Some(raw) = lookup("TRIAGE_ML_MIN_CONFIDENCE") {
            match raw.trim().parse::<f64>() {
                Ok(value) if (0.0..=1.0).contains(&value) => config.min_confidence = value,
                _ => tracing::warn!(value = %raw, "Ignoring invalid TRIAGE_ML_MIN_CONFIDENCE"),
            }
        }

        config
    }
}
