//! Turn orchestration: one user-message-in, assistant-message-out cycle.
//!
//! A turn moves through session resolution, user-message persistence,
//! history load, optional rewrite and retrieval, prompt assembly, and
//! generation. The user message is persisted before anything fallible
//! downstream runs and is never rolled back; the assistant message is only
//! persisted after generation fully succeeds.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::errors::ApiError;
use crate::history::{ConversationStore, Role};
use crate::llm::prompt::PromptAssembler;
use crate::llm::types::GenerationPrompt;
use crate::llm::GenerationBackend;
use crate::rag::retriever::{EmptyReason, RetrievedContext, Retriever};
use crate::rewrite::QueryRewriter;

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: Option<String>,
    pub message: String,
    pub use_rag: bool,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub session_id: String,
    pub response: String,
    /// Source ids that cleared the threshold, annotated with their
    /// similarity percentage, best match first.
    pub sources: Vec<String>,
}

/// Events of a streaming turn, in order: one `Session`, zero or more
/// `Token`s, then exactly one of `Done` or `Error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Session { id: String },
    Token { text: String },
    Done { sources: Vec<String> },
    Error { message: String },
}

#[derive(Debug, Clone, Copy)]
pub struct TurnLimits {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub history_window: usize,
}

struct PreparedTurn {
    session_id: String,
    prompt: GenerationPrompt,
    sources: Vec<String>,
}

pub struct TurnOrchestrator {
    history: ConversationStore,
    rewriter: QueryRewriter,
    retriever: Retriever,
    llm: Arc<dyn GenerationBackend>,
    limits: TurnLimits,
}

impl TurnOrchestrator {
    pub fn new(
        history: ConversationStore,
        rewriter: QueryRewriter,
        retriever: Retriever,
        llm: Arc<dyn GenerationBackend>,
        limits: TurnLimits,
    ) -> Self {
        Self {
            history,
            rewriter,
            retriever,
            llm,
            limits,
        }
    }

    /// Shared turn prefix: resolve session, persist the user message, load
    /// prior history, rewrite and retrieve, assemble the prompt. After this
    /// returns, the user message is durable regardless of what generation
    /// does.
    async fn prepare(&self, request: &TurnRequest) -> Result<PreparedTurn, ApiError> {
        let session = self
            .history
            .resolve_or_create_session(request.session_id.as_deref(), &request.message)
            .await?;

        self.history
            .append_message(&session.id, Role::User, &request.message)
            .await?;

        // Window of prior turns: one extra row covers the message persisted
        // just above, which is then dropped from the tail.
        let mut prior = self
            .history
            .load_recent_history(&session.id, self.limits.history_window as i64 + 1)
            .await?;
        prior.pop();

        let context = if request.use_rag {
            let query = self.rewriter.rewrite(&request.message, &prior).await;
            self.retriever
                .retrieve(&query, self.limits.top_k, self.limits.similarity_threshold)
                .await
        } else {
            RetrievedContext::Empty(EmptyReason::Disabled)
        };

        let sources = context.source_annotations();
        let prompt = PromptAssembler::build(
            &request.message,
            request.system_prompt.as_deref(),
            &context,
            &prior,
        );

        Ok(PreparedTurn {
            session_id: session.id,
            prompt,
            sources,
        })
    }

    /// Blocking turn: generate the full reply, persist it, return it with
    /// the session id and source annotations. On generation failure the
    /// already-persisted user message stays and no assistant message is
    /// written.
    pub async fn run_turn(&self, request: &TurnRequest) -> Result<TurnResponse, ApiError> {
        let prepared = self.prepare(request).await?;

        let response = self.llm.generate(&prepared.prompt).await?;

        self.history
            .append_message(&prepared.session_id, Role::Assistant, &response)
            .await?;

        Ok(TurnResponse {
            session_id: prepared.session_id,
            response,
            sources: prepared.sources,
        })
    }

    /// Streaming turn. Session resolution errors surface before any event
    /// is emitted; once the stream starts, failures arrive in-band as an
    /// `Error` event. The assistant message is persisted only when the
    /// backend stream completes cleanly; a consumer that stops reading
    /// cancels the turn with nothing persisted beyond the user message.
    pub async fn run_turn_stream(
        &self,
        request: &TurnRequest,
    ) -> Result<mpsc::Receiver<TurnEvent>, ApiError> {
        let prepared = self.prepare(request).await?;

        let (tx, rx) = mpsc::channel(32);
        let history = self.history.clone();
        let llm = self.llm.clone();

        tokio::spawn(async move {
            let PreparedTurn {
                session_id,
                prompt,
                sources,
            } = prepared;

            if tx
                .send(TurnEvent::Session {
                    id: session_id.clone(),
                })
                .await
                .is_err()
            {
                return;
            }

            let mut tokens = match llm.generate_stream(&prompt).await {
                Ok(receiver) => receiver,
                Err(err) => {
                    let _ = tx
                        .send(TurnEvent::Error {
                            message: err.to_string(),
                        })
                        .await;
                    return;
                }
            };

            let mut accumulated = String::new();
            while let Some(item) = tokens.recv().await {
                match item {
                    Ok(token) => {
                        accumulated.push_str(&token);
                        if tx.send(TurnEvent::Token { text: token }).await.is_err() {
                            // Consumer went away; drop the partial reply.
                            tracing::debug!("stream consumer dropped, discarding partial reply");
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::warn!("generation stream failed mid-turn: {}", err);
                        let _ = tx
                            .send(TurnEvent::Error {
                                message: err.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }

            if let Err(err) = history
                .append_message(&session_id, Role::Assistant, &accumulated)
                .await
            {
                let _ = tx
                    .send(TurnEvent::Error {
                        message: err.to_string(),
                    })
                    .await;
                return;
            }

            let _ = tx.send(TurnEvent::Done { sources }).await;
        });

        Ok(rx)
    }
}
