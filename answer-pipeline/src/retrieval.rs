//! Second-generation answer flow: condense the follow-up into a standalone
//! question, retrieve the nearest passages from the segment's vector
//! collection, and synthesize an answer over that context.

use std::sync::Arc;

use tracing::{info, instrument};

use common::error::AppError;
use knowledge_pipeline::{
    index::{RetrievedPassage, VectorIndexManager},
    sources::SegmentDataSource,
};

use crate::condense::QuestionCondenser;
use crate::llm::{ChatRequest, ChatService, ChatTurn};
use crate::prompts;

/// Synthesis sticks to the retrieved context.
const SYNTHESIS_TEMPERATURE: f32 = 0.0;
/// Retrieval answers are short by contract, one hundred words or so.
const SYNTHESIS_MAX_TOKENS: u32 = 150;

/// The synthesized answer together with the passages it was grounded on.
#[derive(Debug, Clone)]
pub struct ChainAnswer {
    pub answer: String,
    pub sources: Vec<RetrievedPassage>,
}

#[derive(Clone)]
pub struct RetrievalAnswerChain {
    index: VectorIndexManager,
    chat: Arc<dyn ChatService>,
    condenser: QuestionCondenser,
    top_k: usize,
}

impl RetrievalAnswerChain {
    pub fn new(index: VectorIndexManager, chat: Arc<dyn ChatService>, top_k: usize) -> Self {
        let condenser = QuestionCondenser::new(chat.clone());
        Self {
            index,
            chat,
            condenser,
            top_k,
        }
    }

    /// Run the full chain for one turn.
    ///
    /// The collection is ensured first, so a conversation can start before
    /// the background builder has reached this segment. Any stage failing
    /// aborts the turn.
    #[instrument(skip_all, fields(segment = %source.segment()))]
    pub async fn answer(
        &self,
        source: &SegmentDataSource,
        question: &str,
        history: &[(String, String)],
    ) -> Result<ChainAnswer, AppError> {
        let collection = self.index.ensure_segment_collection(source).await?;
        let standalone = self.condenser.condense(question, history).await?;
        let passages = self
            .index
            .retrieve(&collection, &standalone, self.top_k)
            .await?;

        let context = passages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = prompts::qa_prompt(source.segment(), &context, &standalone);

        let answer = self
            .chat
            .complete(ChatRequest {
                turns: vec![ChatTurn::user(prompt)],
                temperature: SYNTHESIS_TEMPERATURE,
                max_tokens: Some(SYNTHESIS_MAX_TOKENS),
            })
            .await?;

        info!(
            collection = %collection,
            passages = passages.len(),
            "Synthesized a retrieval answer"
        );
        Ok(ChainAnswer {
            answer,
            sources: passages,
        })
    }
}
