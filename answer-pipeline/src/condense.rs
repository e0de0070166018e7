//! Follow-up questions are rewritten into standalone ones before retrieval.

use std::sync::Arc;

use tracing::debug;

use common::error::AppError;

use crate::llm::{ChatRequest, ChatService, ChatTurn};
use crate::prompts;

/// Rewriting must be deterministic.
const CONDENSE_TEMPERATURE: f32 = 0.0;

/// Rewrites a follow-up question against the chat history so the retrieval
/// query carries no unresolved pronouns.
///
/// Runs on every turn, first questions included; with an empty history the
/// model simply echoes a cleaned-up question.
#[derive(Clone)]
pub struct QuestionCondenser {
    chat: Arc<dyn ChatService>,
}

impl QuestionCondenser {
    pub fn new(chat: Arc<dyn ChatService>) -> Self {
        Self { chat }
    }

    pub async fn condense(
        &self,
        question: &str,
        history: &[(String, String)],
    ) -> Result<String, AppError> {
        let prompt = prompts::condense_prompt(&prompts::history_block(history), question);
        let request = ChatRequest {
            turns: vec![ChatTurn::user(prompt)],
            temperature: CONDENSE_TEMPERATURE,
            max_tokens: None,
        };

        let standalone = self.chat.complete(request).await?.trim().to_owned();
        debug!(%question, %standalone, "Condensed follow-up question");
        Ok(standalone)
    }
}
