use std::collections::HashMap;

use crate::models::{Intent, TimeBand};

/// Placeholder replaced by [`TimeBand::greeting`] in greeting templates.
pub const TIME_GREETING_PLACEHOLDER: &str = "{time_greeting}";

/// Canned replies for the conversational intents.
#[derive(Debug, Clone)]
pub struct ResponseCatalog {
    greetings: Vec<String>,
    farewells: Vec<String>,
    small_talk: Vec<String>,
    small_talk_topics: HashMap<String, Vec<String>>,
}

impl ResponseCatalog {
    pub fn new(
        greetings: Vec<String>,
        farewells: Vec<String>,
        small_talk: Vec<String>,
        small_talk_topics: HashMap<String, Vec<String>>,
    ) -> Option<Self> {
        let usable = |pool: &[String]| {
            !pool.is_empty() && pool.iter().all(|entry| !entry.trim().is_empty())
        };
        if !usable(&greetings) || !usable(&farewells) || !usable(&small_talk) {
            return None;
        }
        if small_talk_topics
            .values()
            .any(|pool| pool.iter().any(|entry| entry.trim().is_empty()))
        {
            return None;
        }

        let small_talk_topics = small_talk_topics
            .into_iter()
            .filter(|(_, pool)| !pool.is_empty())
            .collect();

        Some(Self {
            greetings,
            farewells,
            small_talk,
            small_talk_topics,
        })
    }

    /// Returns the pool for a canned intent, preferring the topic pool when
    /// one exists. Emergency and medical queries have no pool.
    pub fn pool(&self, intent: Intent, topic: Option<&str>) -> Option<&[String]> {
        match intent {
            Intent::Greeting => Some(&self.greetings),
            Intent::Farewell => Some(&self.farewells),
            Intent::SmallTalk => Some(
                topic
                    .and_then(|topic| self.small_talk_topics.get(topic))
                    .unwrap_or(&self.small_talk),
            ),
            Intent::Emergency | Intent::MedicalQuery => None,
        }
        .map(Vec::as_slice)
    }

    pub fn render(template: &str, band: TimeBand) -> String {
        template.replace(TIME_GREETING_PLACEHOLDER, band.greeting())
    }
}

impl Default for ResponseCatalog {
    fn default() -> Self {
        let topics = [
            (
                "wellbeing",
                vec![
                    "I'm doing great, thanks for asking! How about you? 😊 Is there anything health-related I can help you with?",
                ],
            ),
            (
                "whats_up",
                vec![
                    "Not much, just here and ready to help with your health questions! What's on your mind?",
                ],
            ),
            (
                "identity",
                vec![
                    "I'm your AI Medical Assistant 🤖, here to help you with health and medical questions!",
                    "I'm your friendly AI Medical Assistant! 🏥 I provide health information and answer medical questions. How can I help you today?",
                ],
            ),
            (
                "bot",
                vec![
                    "Yes, I'm an AI chatbot built to assist you with medical information and health questions! 🤖💙",
                ],
            ),
            (
                "thanks",
                vec![
                    "You're welcome! Let me know if there's anything else I can help with 😊",
                    "Happy to help! Feel free to ask another question anytime.",
                ],
            ),
            (
                "acknowledgement",
                vec![
                    "Great! Is there anything else you'd like to know?",
                    "Sounds good. I'm here if you have more health questions.",
                ],
            ),
        ];

        Self {
            greetings: strings(&[
                "Hello! 👋 How can I help you today?",
                "Hi there! 😊 What's on your mind?",
                "Hey! I'm here to assist you. What would you like to know?",
                "{time_greeting}! How can I support you today?",
                "Welcome! Ready to get your health questions answered? 🏥",
            ]),
            farewells: strings(&[
                "You're welcome! Have a great day ahead 🌸",
                "Glad I could help! Goodbye 👋",
                "Take care and feel free to come back anytime 🚀",
                "It was nice chatting with you. See you soon! 😊",
                "Thanks for chatting! Wishing you all the best 🌟",
            ]),
            small_talk: strings(&[
                "I'm here and happy to chat! Is there anything health-related I can help you with?",
            ]),
            small_talk_topics: topics
                .into_iter()
                .map(|(topic, pool)| (topic.to_string(), strings(&pool)))
                .collect(),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
