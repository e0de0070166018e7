use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use common::{
    error::AppError,
    storage::types::{
        message::MessageRole,
        trial::{Trial, TrialMessage},
    },
    utils::segment::{cluster_name, namespace_segment, normalize_segmentation, strip_segmentation},
};

use answer_pipeline::{prompts, AnswerStrategy, ChatTurn, ConversationContext, TurnRole};
use knowledge_pipeline::{sources::segment_description, SegmentDataSource};

use super::messages::CreateMessageParams;
use crate::{api_state::ApiState, error::ApiError};

const TRIAL_EXPIRED: &str =
    "Trial has expired. You have reached the maximum amount of messages allowed.";

#[derive(Debug, Deserialize)]
pub struct CreateTrialParams {
    pub survey: String,
    pub segmentation: String,
    pub segment: String,
    #[serde(default)]
    pub survey_id: Option<String>,
    #[serde(default)]
    pub segment_id: Option<String>,
}

/// Create an anonymous trial with its greeting embedded. The segment
/// description is looked up eagerly but a missing catalogue never blocks
/// the trial.
pub async fn create_trial(
    State(state): State<ApiState>,
    Json(params): Json<CreateTrialParams>,
) -> Result<impl IntoResponse, ApiError> {
    let segmentation = normalize_segmentation(&params.segmentation);
    let segment = namespace_segment(&segmentation, &params.segment);

    let mut trial = Trial::new(
        params.survey,
        params.survey_id.unwrap_or_default(),
        segmentation,
        segment,
        params.segment_id.unwrap_or_default(),
    );

    let greeting = TrialMessage::initial(prompts::greeting(cluster_name(&trial.segment)));
    trial.messages.push(greeting.clone());

    match segment_description(
        &state.storage,
        &state.config.environment,
        &trial.survey_id,
        &trial.segmentation,
        &trial.segment_id,
    )
    .await
    {
        Ok(description) => trial.description = Some(description),
        Err(error) => {
            warn!(trial_id = %trial.id, %error, "Could not load the segment description");
        }
    }

    state
        .db
        .store_item(trial.clone())
        .await
        .map_err(AppError::from)?;

    info!(trial_id = %trial.id, segment = %trial.segment, "Created trial");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "trial": trial, "message": greeting })),
    ))
}

/// A trial with only its visible messages embedded.
pub async fn get_trial(
    State(state): State<ApiState>,
    Path(trial_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let trial = Trial::get(&trial_id, &state.db).await?;

    let mut body = serde_json::to_value(&trial).map_err(AppError::from)?;
    if let Some(object) = body.as_object_mut() {
        object.insert("messages".to_string(), json!(trial.visible_messages()));
    }

    Ok(Json(body))
}

/// Answer a trial question with the embedding-match pipeline, backfilling
/// the description and priming the persona on the first question.
pub async fn create_trial_message(
    State(state): State<ApiState>,
    Path(trial_id): Path<String>,
    Json(params): Json<CreateMessageParams>,
) -> Result<impl IntoResponse, ApiError> {
    trial_answer_turn(&state, &trial_id, &params.question, &state.fast_path, true).await
}

/// Answer a trial question with the retrieval chain; no priming, the chain
/// brings its own prompt template.
pub async fn create_trial_message_v2(
    State(state): State<ApiState>,
    Path(trial_id): Path<String>,
    Json(params): Json<CreateMessageParams>,
) -> Result<impl IntoResponse, ApiError> {
    trial_answer_turn(
        &state,
        &trial_id,
        &params.question,
        &state.retrieval_chain,
        false,
    )
    .await
}

/// One question-and-answer turn against a trial.
///
/// Trials embed their whole history, so every mutation is saved back onto
/// the record. The message cap counts hidden turns too, which keeps the
/// unauthenticated surface bounded.
async fn trial_answer_turn(
    state: &ApiState,
    trial_id: &str,
    question: &str,
    strategy: &dyn AnswerStrategy,
    prime: bool,
) -> Result<impl IntoResponse, ApiError> {
    let mut trial = Trial::get(trial_id, &state.db).await?;

    if trial.is_expired(state.config.trial_message_threshold) {
        return Err(ApiError::TrialExpired(TRIAL_EXPIRED.to_string()));
    }

    if prime {
        if trial.description.is_none() {
            match segment_description(
                &state.storage,
                &state.config.environment,
                &trial.survey_id,
                &trial.segmentation,
                &trial.segment_id,
            )
            .await
            {
                Ok(description) => trial.description = Some(description),
                Err(error) => {
                    warn!(trial_id = %trial.id, %error, "Could not load the segment description");
                }
            }
        }

        // Only the greeting so far means this is the first question.
        if trial.messages.len() == 1 {
            let description = trial.description.clone().unwrap_or_default();
            for turn in prompts::priming_turns(&description, question) {
                trial
                    .messages
                    .push(TrialMessage::hidden(turn.content, turn.role.into()));
            }
        }

        trial.save(&state.db).await?;
    }

    let context = trial_context(&trial);

    let question_message = TrialMessage::user(question.to_owned());
    trial.messages.push(question_message.clone());
    trial.save(&state.db).await?;

    let source = SegmentDataSource::new(
        state.storage.clone(),
        state.config.environment.clone(),
        trial.survey.clone(),
        trial.segmentation.clone(),
        strip_segmentation(&trial.segmentation, &trial.segment),
    );

    let answer = strategy.answer(&source, question, &context).await?;

    let answer_message = TrialMessage::assistant(answer);
    trial.messages.push(answer_message.clone());
    trial.save(&state.db).await?;

    info!(trial_id = %trial.id, messages = trial.messages.len(), "Answered a trial question");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "question": question_message,
            "message": answer_message
        })),
    ))
}

/// Build the per-turn context from the trial's embedded history: completion
/// turns for the embedding-match flow and Q&A pairs for the retrieval chain,
/// greeting excluded from both.
fn trial_context(trial: &Trial) -> ConversationContext {
    let mut turns = Vec::new();
    let mut pairs = Vec::new();
    let mut open_question: Option<String> = None;

    for message in &trial.messages {
        let role = match message.role {
            MessageRole::Initial => continue,
            MessageRole::User => TurnRole::User,
            MessageRole::System => TurnRole::System,
            MessageRole::Assistant => TurnRole::Assistant,
        };
        turns.push(ChatTurn {
            role,
            content: message.content.clone(),
        });

        if message.is_bot {
            if let Some(open) = open_question.take() {
                pairs.push((open, message.content.clone()));
            }
        } else {
            open_question = Some(message.content.clone());
        }
    }

    ConversationContext {
        survey: trial.survey.clone(),
        survey_id: trial.survey_id.clone(),
        segmentation: trial.segmentation.clone(),
        segment: trial.segment.clone(),
        segment_id: trial.segment_id.clone(),
        description: trial.description.clone(),
        turns,
        pairs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_context_splits_turns_and_pairs() {
        let mut trial = Trial::new(
            "shopping".to_string(),
            "srv_1".to_string(),
            "qudo_seg".to_string(),
            "qudo_seg_convenience_seekers".to_string(),
            "seg_1".to_string(),
        );
        trial.description = Some("Busy households".to_string());
        trial
            .messages
            .push(TrialMessage::initial("greeting".to_string()));
        trial.messages.push(TrialMessage::hidden(
            "You are personaGPT".to_string(),
            MessageRole::System,
        ));
        trial.messages.push(TrialMessage::hidden(
            "I am Sarah".to_string(),
            MessageRole::Assistant,
        ));
        trial
            .messages
            .push(TrialMessage::user("What do you buy?".to_string()));
        trial
            .messages
            .push(TrialMessage::assistant("Mostly groceries.".to_string()));

        let context = trial_context(&trial);

        // The greeting never reaches the model.
        assert_eq!(context.turns.len(), 4);
        assert_eq!(context.turns[0].role, TurnRole::System);
        assert_eq!(context.turns[3].content, "Mostly groceries.");

        // Hidden priming has no question in front of it, so it pairs away.
        assert_eq!(
            context.pairs,
            vec![(
                "What do you buy?".to_string(),
                "Mostly groceries.".to_string()
            )]
        );
        assert_eq!(context.description.as_deref(), Some("Busy households"));
        assert_eq!(context.segment, "qudo_seg_convenience_seekers");
    }

    #[test]
    fn trial_context_drops_a_trailing_unanswered_question() {
        let mut trial = Trial::new(
            "shopping".to_string(),
            "srv_1".to_string(),
            "qudo_seg".to_string(),
            "qudo_seg_convenience_seekers".to_string(),
            "seg_1".to_string(),
        );
        trial
            .messages
            .push(TrialMessage::user("Unanswered?".to_string()));

        let context = trial_context(&trial);
        assert_eq!(context.turns.len(), 1);
        assert!(context.pairs.is_empty());
    }
}
