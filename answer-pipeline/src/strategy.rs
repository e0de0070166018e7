//! The answer strategies behind the two API generations, unified behind one
//! trait so route handlers stay identical in shape.

use async_trait::async_trait;

use common::error::AppError;
use knowledge_pipeline::sources::SegmentDataSource;

use crate::context::ConversationContext;
use crate::fast_path::FastPathAnswerer;
use crate::retrieval::RetrievalAnswerChain;

#[async_trait]
pub trait AnswerStrategy: Send + Sync {
    async fn answer(
        &self,
        source: &SegmentDataSource,
        question: &str,
        context: &ConversationContext,
    ) -> Result<String, AppError>;
}

/// First generation: question-bank matching with canned answers, consuming
/// the cached prompt turns.
#[derive(Clone)]
pub struct FastPathStrategy {
    answerer: FastPathAnswerer,
}

impl FastPathStrategy {
    pub fn new(answerer: FastPathAnswerer) -> Self {
        Self { answerer }
    }
}

#[async_trait]
impl AnswerStrategy for FastPathStrategy {
    async fn answer(
        &self,
        source: &SegmentDataSource,
        question: &str,
        context: &ConversationContext,
    ) -> Result<String, AppError> {
        let answer = self
            .answerer
            .answer(source, question, &context.turns)
            .await?;
        Ok(answer.answer)
    }
}

/// Second generation: condense, retrieve and synthesize over the segment's
/// vector collection, consuming the cached Q&A pairs.
#[derive(Clone)]
pub struct RetrievalChainStrategy {
    chain: RetrievalAnswerChain,
}

impl RetrievalChainStrategy {
    pub fn new(chain: RetrievalAnswerChain) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl AnswerStrategy for RetrievalChainStrategy {
    async fn answer(
        &self,
        source: &SegmentDataSource,
        question: &str,
        context: &ConversationContext,
    ) -> Result<String, AppError> {
        let answer = self.chain.answer(source, question, &context.pairs).await?;
        Ok(answer.answer)
    }
}
