use medassist_core::Passage;

use crate::{ChatMessage, Role};

pub const CONTEXT_PLACEHOLDER: &str = "{context}";

pub const SYSTEM_PROMPT: &str = "You are a friendly AI Medical Assistant. Follow these guidelines:

PERSONALITY:
• Be warm, helpful, and professional
• Show empathy and understanding
• Maintain a supportive tone

RESPONSE STYLE:
• Keep responses concise (2-3 bullet points maximum)
• Provide essential information only
• Use simple, clear language
• Maximum 3-4 sentences per bullet point

MEDICAL GUIDANCE:
• First check the provided context for relevant information
• If the context doesn't contain the answer, use your general medical knowledge
• Focus on key points and practical, actionable information

RESPONSE FORMAT:
• Start with a brief acknowledgment if appropriate
• 2-3 key medical points in bullet format
• For medical advice or diagnosis questions, end on a new line with:
  ⚠️ Please consult a doctor for proper diagnosis and treatment

SAFETY & TRANSPARENCY:
• Never replace professional medical advice
• For emergencies, recommend immediate medical care
• Be honest about limitations

Context from medical database:
{context}";

/// Joins passages the way a "stuff documents" chain does: plain text blocks
/// separated by a blank line.
pub fn stuff_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|passage| passage.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_messages(system_template: &str, passages: &[Passage], question: &str) -> Vec<ChatMessage> {
    let system = system_template.replace(CONTEXT_PLACEHOLDER, &stuff_passages(passages));

    vec![
        ChatMessage {
            role: Role::System,
            content: system,
        },
        ChatMessage {
            role: Role::User,
            content: question.to_string(),
        },
    ]
}
