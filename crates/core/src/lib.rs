pub mod intent;
pub mod models;
pub mod responses;
pub mod safety;

pub use intent::{
    classify, normalize_text, IntentClassifier, IntentRule, IntentRuleSet, PatternSpec,
    RuleSetError,
};
pub use models::*;
pub use responses::ResponseCatalog;
pub use safety::{sanitize, sanitize_optional, EMERGENCY_MESSAGE, RAG_FALLBACK_MESSAGE};
