pub mod types;
pub mod lexicon;
pub mod scorer;
pub mod ranker;
pub mod engine;

pub use types::*;
pub use lexicon::{normalize_text, Lexicon, LexiconError};
pub use scorer::{score, Candidates, Scoring, TextModifiers};
pub use ranker::{rank, Ranking};
pub use engine::{undetermined, RuleBasedEngine, UNDETERMINED_LABEL, UNDETERMINED_SUGGESTION};
