use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

use crate::models::{Classification, Intent, MatchReason};

pub const BUILTIN_RULES_VERSION: &str = "2024-06-medbot-v1";
pub const DEFAULT_SHORT_GREETING_MAX_CHARS: usize = 10;

static BUILTIN_CLASSIFIER: Lazy<IntentClassifier> = Lazy::new(IntentClassifier::builtin);

#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("failed reading intent rules from {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid intent rules document")]
    Json(#[from] serde_json::Error),
    #[error("{0:?} is the fallback intent and cannot carry patterns")]
    FallbackRule(Intent),
    #[error("empty pattern in {0:?} rule")]
    EmptyPattern(Intent),
    #[error("intent rules define no emergency patterns")]
    MissingEmergency,
    #[error("pattern {phrase:?} does not compile")]
    Pattern {
        phrase: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub phrase: String,
    /// Match only when the whole message is this phrase (trailing punctuation ignored).
    #[serde(default)]
    pub whole_message: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRule {
    pub intent: Intent,
    #[serde(default)]
    pub topic: Option<String>,
    pub patterns: Vec<PatternSpec>,
}

/// Versioned keyword table driving [`IntentClassifier`].
///
/// Precedence between intents is fixed by [`Intent::PRECEDENCE`]; the order of
/// rules only matters among rules of the same intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRuleSet {
    pub version: String,
    /// Messages up to this many characters fall back to `Greeting`. Zero disables it.
    #[serde(default = "default_short_greeting_max_chars")]
    pub short_greeting_max_chars: usize,
    pub rules: Vec<IntentRule>,
}

fn default_short_greeting_max_chars() -> usize {
    DEFAULT_SHORT_GREETING_MAX_CHARS
}

impl IntentRuleSet {
    pub fn from_json_str(raw: &str) -> Result<Self, RuleSetError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, RuleSetError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| RuleSetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}

impl Default for IntentRuleSet {
    fn default() -> Self {
        Self {
            version: BUILTIN_RULES_VERSION.to_string(),
            short_greeting_max_chars: DEFAULT_SHORT_GREETING_MAX_CHARS,
            rules: vec![
                rule(
                    Intent::Emergency,
                    None,
                    phrases(&[
                        "chest pain",
                        "chest pains",
                        "chest tightness",
                        "can't breathe",
                        "cant breathe",
                        "cannot breathe",
                        "can not breathe",
                        "unable to breathe",
                        "trouble breathing",
                        "difficulty breathing",
                        "not breathing",
                        "stopped breathing",
                        "unconscious",
                        "unresponsive",
                        "passed out",
                        "heart attack",
                        "stroke",
                        "severe pain",
                        "severe bleeding",
                        "bleeding heavily",
                        "won't stop bleeding",
                        "overdose",
                        "overdosed",
                        "poisoned",
                        "seizure",
                        "anaphylaxis",
                        "anaphylactic",
                        "choking",
                        "suicide",
                        "suicidal",
                        "kill myself",
                        "emergency",
                    ]),
                ),
                rule(
                    Intent::SmallTalk,
                    Some("wellbeing"),
                    phrases(&[
                        "how are you",
                        "how are u",
                        "how r u",
                        "how do you do",
                        "how's it going",
                        "how is it going",
                    ]),
                ),
                rule(
                    Intent::SmallTalk,
                    Some("whats_up"),
                    phrases(&["what's up", "whats up", "wassup"]),
                ),
                rule(
                    Intent::SmallTalk,
                    Some("identity"),
                    phrases(&[
                        "what is your name",
                        "what's your name",
                        "whats your name",
                        "who are you",
                        "what are you",
                    ]),
                ),
                rule(
                    Intent::SmallTalk,
                    Some("bot"),
                    phrases(&[
                        "are you a bot",
                        "are you ai",
                        "are you an ai",
                        "are you a robot",
                        "are you human",
                        "are you artificial intelligence",
                    ]),
                ),
                rule(
                    Intent::SmallTalk,
                    Some("thanks"),
                    phrases(&["thanks", "thank you", "thank u", "thx", "much appreciated"])
                        .into_iter()
                        .chain(whole(&["ty"]))
                        .collect(),
                ),
                rule(
                    Intent::SmallTalk,
                    Some("acknowledgement"),
                    whole(&[
                        "ok", "okay", "k", "fine", "cool", "nice", "great", "got it", "alright",
                    ]),
                ),
                rule(
                    Intent::Farewell,
                    None,
                    phrases(&[
                        "bye",
                        "goodbye",
                        "good bye",
                        "bye bye",
                        "see you",
                        "see ya",
                        "cya",
                        "take care",
                        "farewell",
                        "have a good day",
                        "have a nice day",
                        "have a great day",
                        "good night",
                        "gotta go",
                        "ttyl",
                        "talk to you later",
                        "that's all",
                        "that's it",
                        "adios",
                    ])
                    .into_iter()
                    .chain(whole(&["exit", "quit"]))
                    .collect(),
                ),
                rule(
                    Intent::Greeting,
                    None,
                    phrases(&[
                        "hello",
                        "hi",
                        "hii",
                        "hiii",
                        "hey",
                        "hiya",
                        "howdy",
                        "greetings",
                        "good morning",
                        "good afternoon",
                        "good evening",
                        "hola",
                        "namaste",
                        "salaam",
                    ])
                    .into_iter()
                    .chain(whole(&["yo", "sup", "morning", "afternoon", "evening"]))
                    .collect(),
                ),
            ],
        }
    }
}

fn rule(intent: Intent, topic: Option<&str>, patterns: Vec<PatternSpec>) -> IntentRule {
    IntentRule {
        intent,
        topic: topic.map(str::to_string),
        patterns,
    }
}

fn phrases(values: &[&str]) -> Vec<PatternSpec> {
    values
        .iter()
        .map(|phrase| PatternSpec {
            phrase: phrase.to_string(),
            whole_message: false,
        })
        .collect()
}

fn whole(values: &[&str]) -> Vec<PatternSpec> {
    values
        .iter()
        .map(|phrase| PatternSpec {
            phrase: phrase.to_string(),
            whole_message: true,
        })
        .collect()
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    phrase: String,
    regex: Regex,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    intent: Intent,
    topic: Option<String>,
    patterns: Vec<CompiledPattern>,
}

#[derive(Debug, Clone)]
pub struct IntentClassifier {
    version: String,
    short_greeting_max_chars: usize,
    rules: Vec<CompiledRule>,
}

impl IntentClassifier {
    pub fn new(rule_set: IntentRuleSet) -> Result<Self, RuleSetError> {
        let mut rules = Vec::with_capacity(rule_set.rules.len());

        for rule in rule_set.rules {
            if rule.intent == Intent::MedicalQuery {
                return Err(RuleSetError::FallbackRule(rule.intent));
            }

            let mut patterns = Vec::with_capacity(rule.patterns.len());
            for spec in rule.patterns {
                let phrase = normalize_text(&spec.phrase).to_lowercase();
                if phrase.is_empty() {
                    return Err(RuleSetError::EmptyPattern(rule.intent));
                }
                let regex = compile_pattern(&phrase, spec.whole_message)?;
                patterns.push(CompiledPattern { phrase, regex });
            }

            rules.push(CompiledRule {
                intent: rule.intent,
                topic: rule.topic,
                patterns,
            });
        }

        let has_emergency = rules
            .iter()
            .any(|rule| rule.intent == Intent::Emergency && !rule.patterns.is_empty());
        if !has_emergency {
            return Err(RuleSetError::MissingEmergency);
        }

        Ok(Self {
            version: rule_set.version,
            short_greeting_max_chars: rule_set.short_greeting_max_chars,
            rules,
        })
    }

    pub fn builtin() -> Self {
        Self::new(IntentRuleSet::default()).expect("built-in intent rules compile")
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, RuleSetError> {
        Self::new(IntentRuleSet::from_json_path(path)?)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn classify(&self, message: &str) -> Intent {
        self.classify_detailed(message).intent
    }

    pub fn classify_detailed(&self, message: &str) -> Classification {
        let normalized = normalize_text(message);

        for intent in Intent::PRECEDENCE {
            for rule in self.rules.iter().filter(|rule| rule.intent == intent) {
                if let Some(pattern) = rule
                    .patterns
                    .iter()
                    .find(|pattern| pattern.regex.is_match(&normalized))
                {
                    return Classification {
                        intent,
                        rule: Some(pattern.phrase.clone()),
                        topic: rule.topic.clone(),
                        reason: MatchReason::Pattern,
                    };
                }
            }

            if intent == Intent::Greeting && self.is_short_message(&normalized) {
                return Classification {
                    intent,
                    rule: None,
                    topic: None,
                    reason: MatchReason::ShortMessage,
                };
            }
        }

        Classification::fallback()
    }

    fn is_short_message(&self, normalized: &str) -> bool {
        self.short_greeting_max_chars > 0
            && normalized.graphemes(true).count() <= self.short_greeting_max_chars
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        BUILTIN_CLASSIFIER.clone()
    }
}

/// Classifies with the built-in rule table.
pub fn classify(message: &str) -> Intent {
    BUILTIN_CLASSIFIER.classify(message)
}

pub fn normalize_text(input: &str) -> String {
    input
        .replace(['\u{2019}', '\u{2018}'], "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn compile_pattern(phrase: &str, whole_message: bool) -> Result<Regex, RuleSetError> {
    let escaped = regex::escape(phrase);
    let source = if whole_message {
        format!(r"^{escaped}[\s.!?,;:]*$")
    } else {
        let lead = if starts_with_word_char(phrase) { r"\b" } else { "" };
        let tail = if ends_with_word_char(phrase) { r"\b" } else { "" };
        format!("{lead}{escaped}{tail}")
    };

    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map_err(|source| RuleSetError::Pattern {
            phrase: phrase.to_string(),
            source,
        })
}

fn starts_with_word_char(phrase: &str) -> bool {
    phrase
        .chars()
        .next()
        .is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
}

fn ends_with_word_char(phrase: &str) -> bool {
    phrase
        .chars()
        .last()
        .is_some_and(|ch| ch.is_alphanumeric() || ch == '_')
}
