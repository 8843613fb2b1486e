//! Fixed safety texts and the post-processing applied to generated answers.

pub const EMERGENCY_MESSAGE: &str = "🚨 This sounds like it could be a medical emergency. Please call your local emergency number (such as 911, 112 or 999) or go to the nearest emergency room right away. Do not wait for an online answer.";

pub const RAG_FALLBACK_MESSAGE: &str = "I'm sorry, I'm having trouble accessing medical information right now. Please try again in a moment, or consult a healthcare professional for advice about your situation.";

pub const EMPTY_ANSWER_FALLBACK: &str = "I'm sorry, I couldn't find a good answer to that. Please consult a healthcare professional for advice about your situation.";

pub const MEDICAL_DISCLAIMER: &str =
    "⚠️ Please consult a healthcare professional for proper diagnosis and treatment.";

const ADVICE_KEYWORDS: [&str; 6] = [
    "diagnosis",
    "treatment",
    "medication",
    "disease",
    "condition",
    "symptoms",
];

const DISCLAIMER_MARKERS: [&str; 2] = ["consult", "healthcare professional"];

/// Trims a generated answer and appends [`MEDICAL_DISCLAIMER`] when it gives
/// medical advice without already pointing to a professional. Never returns an
/// empty string, and applying it twice changes nothing.
pub fn sanitize(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return EMPTY_ANSWER_FALLBACK.to_string();
    }

    let lower = trimmed.to_lowercase();
    if contains_any(&lower, &ADVICE_KEYWORDS) && !contains_any(&lower, &DISCLAIMER_MARKERS) {
        format!("{trimmed}\n\n{MEDICAL_DISCLAIMER}")
    } else {
        trimmed.to_string()
    }
}

pub fn sanitize_optional(text: Option<&str>) -> String {
    sanitize(text.unwrap_or_default())
}

pub fn has_disclaimer(text: &str) -> bool {
    contains_any(&text.to_lowercase(), &DISCLAIMER_MARKERS)
}

fn contains_any(input: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| input.contains(needle))
}
