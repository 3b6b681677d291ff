//! Prompt assembly: persona, retrieved context, history window, current
//! message, in that order.

use crate::history::MessageRecord;
use crate::llm::types::{GenerationPrompt, PromptMessage};
use crate::rag::retriever::RetrievedContext;

/// Fixed sliding window over conversation history; not per-call
/// configurable.
pub const HISTORY_WINDOW: usize = 6;

/// Default persona. The grounding rules live in the text itself; nothing
/// validates that the model obeys them.
pub const DEFAULT_PERSONA: &str = "\
You are Sartoria, a consultative assistant with deep knowledge of Italian fashion.
Rules:
- When documents are supplied, answer using only those documents.
- If the documents do not contain the answer, say you cannot answer instead of inventing one.
- Never preface replies with commentary about the documents or the context.";

pub struct PromptAssembler;

impl PromptAssembler {
    /// Build the ordered prompt: one system segment (persona plus, when
    /// present, the numbered document block), up to the last six history
    /// entries oldest first, the current user message, and an empty
    /// assistant segment marking where generation starts.
    pub fn build(
        user_message: &str,
        persona: Option<&str>,
        context: &RetrievedContext,
        history: &[MessageRecord],
    ) -> GenerationPrompt {
        let mut system = persona.unwrap_or(DEFAULT_PERSONA).to_string();

        let documents = context.documents();
        if !documents.is_empty() {
            let docs_text = documents
                .iter()
                .enumerate()
                .map(|(i, scored)| format!("[DOCUMENT {}]: {}", i + 1, scored.document.content))
                .collect::<Vec<_>>()
                .join("\n\n");
            system.push_str("\n\nUse ONLY the following documents to answer:\n");
            system.push_str(&docs_text);
        }

        let mut messages = Vec::with_capacity(history.len() + 3);
        messages.push(PromptMessage::new("system", system));

        let window_start = history.len().saturating_sub(HISTORY_WINDOW);
        for record in &history[window_start..] {
            messages.push(PromptMessage::new(record.role.as_str(), record.content.clone()));
        }

        messages.push(PromptMessage::new("user", user_message));
        messages.push(PromptMessage::new("assistant", ""));

        GenerationPrompt { messages }
    }
}
