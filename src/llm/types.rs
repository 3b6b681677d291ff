use serde::{Deserialize, Serialize};

/// One segment of a structured prompt, tagged with its conversational role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// A fully assembled generation request, ordered system → history → user →
/// empty assistant segment.
#[derive(Debug, Clone)]
pub struct GenerationPrompt {
    pub messages: Vec<PromptMessage>,
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}
