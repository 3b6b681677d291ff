//! Query rewriting for context-dependent questions.
//!
//! A cheap marker scan decides whether a query leans on the conversation
//! ("what about those?", "tell me more"); only then is the generation
//! backend asked to produce a self-contained rewrite. Precision over
//! recall: an unclear miss costs one weaker retrieval, a false positive
//! costs a generation call.

use std::sync::Arc;

use crate::history::MessageRecord;
use crate::llm::types::{GenerationPrompt, PromptMessage};
use crate::llm::GenerationBackend;

/// Anaphora and continuation markers, matched as lowercase substrings.
const AMBIGUITY_MARKERS: &[&str] = &[
    "that one",
    "this one",
    "those",
    "these",
    "also",
    "instead",
    "the same",
    "same thing",
    "tell me more",
    "more about",
    "continue",
    "elaborate",
    "what about",
    "and the",
];

const HISTORY_TURNS: usize = 4;
const HISTORY_CHAR_LIMIT: usize = 200;

const REWRITER_PERSONA: &str =
    "You are an assistant that rewrites ambiguous questions into clear, self-contained ones.";

pub struct QueryRewriter {
    llm: Arc<dyn GenerationBackend>,
}

impl QueryRewriter {
    pub fn new(llm: Arc<dyn GenerationBackend>) -> Self {
        Self { llm }
    }

    /// Rewrite `query` into a self-contained question using recent history.
    /// Infallible: with no history, no matching marker, or a failing
    /// backend, the original query comes back untouched.
    pub async fn rewrite(&self, query: &str, history: &[MessageRecord]) -> String {
        if history.is_empty() {
            return query.to_string();
        }

        let lowered = query.to_lowercase();
        if !AMBIGUITY_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            return query.to_string();
        }

        let prompt = build_rewrite_prompt(query, history);
        match self.llm.generate(&prompt).await {
            Ok(raw) => {
                let cleaned = strip_quotes(&raw);
                if cleaned.is_empty() {
                    return query.to_string();
                }
                tracing::debug!("rewrote query '{}' -> '{}'", query, cleaned);
                cleaned
            }
            Err(err) => {
                tracing::warn!("query rewrite failed, keeping original: {}", err);
                query.to_string()
            }
        }
    }
}

fn build_rewrite_prompt(query: &str, history: &[MessageRecord]) -> GenerationPrompt {
    let recent = &history[history.len().saturating_sub(HISTORY_TURNS)..];
    let history_text = recent
        .iter()
        .map(|record| {
            format!(
                "{}: {}",
                record.role.as_str().to_uppercase(),
                truncate_chars(&record.content, HISTORY_CHAR_LIMIT)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let instruction = format!(
        "Rewrite the following question so that it is complete and self-contained, \
without implicit references to the prior conversation.\n\n\
CONVERSATION HISTORY:\n{history_text}\n\n\
ORIGINAL QUESTION: {query}\n\n\
RULES:\n\
- Reply with the rewritten question only, nothing else\n\
- Keep the user's intent\n\
- Make the missing references explicit\n\
- If the question is already clear, repeat it unchanged\n\n\
REWRITTEN QUESTION:"
    );

    GenerationPrompt {
        messages: vec![
            PromptMessage::new("system", REWRITER_PERSONA),
            PromptMessage::new("user", instruction),
            PromptMessage::new("assistant", ""),
        ],
    }
}

fn strip_quotes(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use super::*;
    use crate::errors::ApiError;
    use crate::history::Role;

    struct StubGenerator {
        reply: Result<String, ()>,
        prompts: Mutex<Vec<GenerationPrompt>>,
    }

    impl StubGenerator {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerationBackend for StubGenerator {
        async fn generate(&self, prompt: &GenerationPrompt) -> Result<String, ApiError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            self.reply
                .clone()
                .map_err(|_| ApiError::GenerationFailed("stub failure".to_string()))
        }

        async fn generate_stream(
            &self,
            _prompt: &GenerationPrompt,
        ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
            Err(ApiError::GenerationFailed("not streamable".to_string()))
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn record(role: Role, content: &str) -> MessageRecord {
        MessageRecord {
            id: 0,
            session_id: "s".to_string(),
            role,
            content: content.to_string(),
            created_at: String::new(),
        }
    }

    #[tokio::test]
    async fn no_history_returns_input_without_generation() {
        let stub = StubGenerator::replying("anything");
        let rewriter = QueryRewriter::new(stub.clone());

        let out = rewriter.rewrite("what about those?", &[]).await;
        assert_eq!(out, "what about those?");
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn unambiguous_query_is_returned_byte_identical() {
        let stub = StubGenerator::replying("anything");
        let rewriter = QueryRewriter::new(stub.clone());
        let history = vec![record(Role::User, "earlier")];

        let query = "What material is the FW25 jacket?";
        let out = rewriter.rewrite(query, &history).await;
        assert_eq!(out, query);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn marker_triggers_rewrite_and_quotes_are_stripped() {
        let stub = StubGenerator::replying("\"Which colors does the FW25 jacket come in?\"");
        let rewriter = QueryRewriter::new(stub.clone());
        let history = vec![
            record(Role::User, "Tell me about the FW25 jacket"),
            record(Role::Assistant, "It is a wool blend jacket."),
        ];

        let out = rewriter.rewrite("and the colors?", &history).await;
        assert_eq!(out, "Which colors does the FW25 jacket come in?");
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn rewrite_prompt_truncates_history_entries() {
        let stub = StubGenerator::replying("rewritten");
        let rewriter = QueryRewriter::new(stub.clone());
        let long = "y".repeat(400);
        let history = vec![record(Role::Assistant, &long)];

        rewriter.rewrite("tell me more", &history).await;

        let prompts = stub.prompts.lock().unwrap();
        let instruction = &prompts[0].messages[1].content;
        assert!(instruction.contains(&"y".repeat(200)));
        assert!(!instruction.contains(&"y".repeat(201)));
        assert!(instruction.contains("ASSISTANT:"));
    }

    #[tokio::test]
    async fn backend_failure_falls_back_to_original() {
        let stub = StubGenerator::failing();
        let rewriter = QueryRewriter::new(stub.clone());
        let history = vec![record(Role::User, "context")];

        let out = rewriter.rewrite("elaborate on that", &history).await;
        assert_eq!(out, "elaborate on that");
        assert_eq!(stub.calls(), 1);
    }
}
