pub mod config;
pub mod triage; // Lexicon, scorer, ranker, rule engine
pub mod ml; // Classifier backends + time-bounded adapter
pub mod service;

pub use config::TriageConfig;
pub use ml::{MlError, MlInvocation, MlState, MlTriageAdapter};
pub use service::{MlSettings, TriageOutcome, TriageService};
pub use triage::{Demographics, Lexicon, LexiconError, RuleBasedEngine, TriageResult, UrgencyTier};

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise [`config::default_log_filter`] applies.
/// Safe to call more than once: later calls are ignored.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} v{} starting", config::APP_NAME, config::APP_VERSION);
    }
}
