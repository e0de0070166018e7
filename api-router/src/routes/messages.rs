use std::time::Instant;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use common::{
    error::AppError,
    storage::types::{
        conversation::Conversation,
        message::{Message, MessageRole},
    },
    utils::segment::strip_segmentation,
};

use answer_pipeline::{prompts, AnswerStrategy, TurnRole};
use knowledge_pipeline::SegmentDataSource;

use super::conversations::FeedbackParams;
use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::AuthSubject};

#[derive(Debug, Deserialize)]
pub struct CreateMessageParams {
    pub question: String,
}

/// Answer with the embedding-match pipeline, priming the persona on the
/// first question of the conversation.
pub async fn create_message(
    State(state): State<ApiState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Path(conversation_id): Path<String>,
    Json(params): Json<CreateMessageParams>,
) -> Result<impl IntoResponse, ApiError> {
    answer_turn(
        &state,
        &subject,
        &conversation_id,
        &params.question,
        &state.fast_path,
        true,
    )
    .await
}

/// Answer with the retrieval chain. The chain carries its own prompt
/// template, so the persona priming is skipped.
pub async fn create_message_v2(
    State(state): State<ApiState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Path(conversation_id): Path<String>,
    Json(params): Json<CreateMessageParams>,
) -> Result<impl IntoResponse, ApiError> {
    answer_turn(
        &state,
        &subject,
        &conversation_id,
        &params.question,
        &state.retrieval_chain,
        false,
    )
    .await
}

/// The visible messages of an owned conversation in causal order.
pub async fn list_messages(
    State(state): State<ApiState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = Conversation::get_owned(&conversation_id, &subject, &state.db).await?;
    let messages =
        Message::visible_for_conversation(&conversation.id, &subject, &state.db).await?;

    Ok(Json(messages))
}

pub async fn message_feedback(
    State(state): State<ApiState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Path(message_id): Path<String>,
    Json(params): Json<FeedbackParams>,
) -> Result<impl IntoResponse, ApiError> {
    let updated =
        Message::add_feedback(&message_id, &subject, params.into_feedback(), &state.db).await?;

    Ok(Json(updated))
}

/// One question-and-answer turn against a stored conversation.
///
/// The question is persisted before the answer is generated, so an
/// aborted turn leaves the question on record without a reply. Both the
/// completion history and the Q&A pairs in the cached context are extended
/// afterwards, whichever strategy ran.
async fn answer_turn(
    state: &ApiState,
    subject: &str,
    conversation_id: &str,
    question: &str,
    strategy: &dyn AnswerStrategy,
    prime: bool,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversation = Conversation::get_owned(conversation_id, subject, &state.db).await?;
    let mut context = state.context.load(subject, &conversation).await?;

    if prime && context.turns.is_empty() {
        for turn in prompts::priming_turns(context.description_or_default(), question) {
            let hidden = Message::new(
                conversation.id.clone(),
                subject.to_owned(),
                turn.role.into(),
                turn.content.clone(),
                true,
                false,
            );
            state.db.store_item(hidden).await.map_err(AppError::from)?;
            context.turns.push(turn);
        }
    }

    let question_message = Message::new(
        conversation.id.clone(),
        subject.to_owned(),
        MessageRole::User,
        question.to_owned(),
        false,
        true,
    );
    state
        .db
        .store_item(question_message.clone())
        .await
        .map_err(AppError::from)?;

    let source = SegmentDataSource::new(
        state.storage.clone(),
        state.config.environment.clone(),
        conversation.survey.clone(),
        conversation.segmentation.clone(),
        strip_segmentation(&conversation.segmentation, &conversation.segment),
    );

    let started = Instant::now();
    let answer = strategy.answer(&source, question, &context).await?;
    info!(
        conversation_id = %conversation.id,
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Answered a question"
    );

    let answer_message = Message::new(
        conversation.id.clone(),
        subject.to_owned(),
        MessageRole::Assistant,
        answer.clone(),
        true,
        true,
    );
    state
        .db
        .store_item(answer_message.clone())
        .await
        .map_err(AppError::from)?;

    context.push_turn(TurnRole::User, question);
    context.push_turn(TurnRole::Assistant, answer.clone());
    context.push_pair(question, answer);
    state.context.store(subject, &conversation.id, &context).await?;
    conversation.touch(&state.db).await?;

    Ok(Json(json!({
        "question": question_message,
        "message": answer_message
    })))
}
