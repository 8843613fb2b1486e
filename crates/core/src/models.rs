use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Emergency,
    Greeting,
    Farewell,
    SmallTalk,
    MedicalQuery,
}

impl Intent {
    /// Order in which the classifier tries each category. `MedicalQuery` is
    /// never matched by a rule; it is what remains.
    pub const PRECEDENCE: [Intent; 4] = [
        Intent::Emergency,
        Intent::SmallTalk,
        Intent::Farewell,
        Intent::Greeting,
    ];

    pub fn as_code(self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Greeting => "greeting",
            Self::Farewell => "farewell",
            Self::SmallTalk => "small_talk",
            Self::MedicalQuery => "medical_query",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "emergency" => Some(Self::Emergency),
            "greeting" => Some(Self::Greeting),
            "farewell" => Some(Self::Farewell),
            "small_talk" | "smalltalk" => Some(Self::SmallTalk),
            "medical_query" | "medical" => Some(Self::MedicalQuery),
            _ => None,
        }
    }

    pub fn is_canned(self) -> bool {
        matches!(self, Self::Greeting | Self::Farewell | Self::SmallTalk)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    Pattern,
    ShortMessage,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    /// Phrase of the pattern that matched, if any.
    pub rule: Option<String>,
    pub topic: Option<String>,
    pub reason: MatchReason,
}

impl Classification {
    pub fn fallback() -> Self {
        Self {
            intent: Intent::MedicalQuery,
            rule: None,
            topic: None,
            reason: MatchReason::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub text: String,
    pub intent: Intent,
    pub sources: Vec<String>,
    /// True when the text is a fixed fallback rather than the intended answer.
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBand {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeBand {
    /// Buckets a 24-hour local clock hour. Boundaries sit at 5, 12, 17 and 21.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=20 => Self::Evening,
            _ => Self::Night,
        }
    }

    pub fn greeting(self) -> &'static str {
        match self {
            Self::Morning => "Good morning",
            Self::Afternoon => "Good afternoon",
            Self::Evening => "Good evening",
            Self::Night => "Hello",
        }
    }
}
