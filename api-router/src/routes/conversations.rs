use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use common::{
    error::AppError,
    storage::types::{
        conversation::Conversation,
        feedback::{Feedback, FeedbackReaction},
        message::{Message, MessageRole},
    },
    utils::segment::{cluster_name, namespace_segment, normalize_segmentation},
};

use answer_pipeline::prompts;

use crate::{api_state::ApiState, error::ApiError, middleware_api_auth::AuthSubject};

const DEFAULT_PER_PAGE: usize = 20;
const MAX_PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct CreateConversationParams {
    pub survey: String,
    pub segmentation: String,
    pub segment: String,
    #[serde(default)]
    pub survey_id: Option<String>,
    #[serde(default)]
    pub segment_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsParams {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub per_page: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PatchConversationParams {
    pub title: String,
}

/// Feedback payloads are tolerant: any subset of the fields may be sent and
/// the stored feedback is replaced wholesale.
#[derive(Debug, Deserialize)]
pub struct FeedbackParams {
    #[serde(default)]
    pub rating: Option<i32>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub reaction: Option<FeedbackReaction>,
}

impl FeedbackParams {
    pub fn into_feedback(self) -> Feedback {
        Feedback::new(
            self.rating.unwrap_or(0),
            self.comment.unwrap_or_default(),
            self.reaction,
        )
    }
}

#[derive(Debug, Serialize)]
struct PageMeta {
    page: usize,
    per_page: usize,
    total_pages: usize,
    total_count: usize,
}

/// Create a conversation and its opening greeting in one step.
pub async fn create_conversation(
    State(state): State<ApiState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Json(params): Json<CreateConversationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let segmentation = normalize_segmentation(&params.segmentation);
    let segment = namespace_segment(&segmentation, &params.segment);

    let conversation = Conversation::new(
        subject.clone(),
        params.survey,
        params.survey_id.unwrap_or_default(),
        segmentation,
        segment,
        params.segment_id.unwrap_or_default(),
        params.title,
    );
    state
        .db
        .store_item(conversation.clone())
        .await
        .map_err(AppError::from)?;

    let greeting = Message::new(
        conversation.id.clone(),
        subject,
        MessageRole::Initial,
        prompts::greeting(cluster_name(&conversation.segment)),
        true,
        true,
    );
    state
        .db
        .store_item(greeting.clone())
        .await
        .map_err(AppError::from)?;

    info!(conversation_id = %conversation.id, segment = %conversation.segment, "Created conversation");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "conversation": conversation, "message": greeting })),
    ))
}

/// One page of the caller's conversations, most recently active first, with
/// a visible message count per row and pagination metadata alongside.
pub async fn list_conversations(
    State(state): State<ApiState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Query(params): Query<ListConversationsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);

    let (conversations, total_count) =
        Conversation::list_for_user(&subject, page, per_page, &state.db).await?;

    let mut rows = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let message_count = Message::count_visible(&conversation.id, &state.db).await?;
        let mut row = serde_json::to_value(&conversation).map_err(AppError::from)?;
        if let Some(object) = row.as_object_mut() {
            object.insert("message_count".to_string(), json!(message_count));
        }
        rows.push(row);
    }

    let meta = PageMeta {
        page,
        per_page,
        total_pages: total_count.div_ceil(per_page),
        total_count,
    };

    Ok(Json(json!({ "conversations": rows, "meta": meta })))
}

/// A conversation with its visible messages embedded, newest first.
pub async fn get_conversation(
    State(state): State<ApiState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (conversation, messages) =
        Conversation::get_complete_conversation(&conversation_id, &subject, &state.db).await?;

    let mut body = serde_json::to_value(&conversation).map_err(AppError::from)?;
    if let Some(object) = body.as_object_mut() {
        object.insert("messages".to_string(), json!(messages));
    }

    Ok(Json(body))
}

pub async fn patch_conversation(
    State(state): State<ApiState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Path(conversation_id): Path<String>,
    Json(params): Json<PatchConversationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let updated =
        Conversation::patch_title(&conversation_id, &subject, &params.title, &state.db).await?;

    Ok(Json(updated))
}

pub async fn conversation_feedback(
    State(state): State<ApiState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Path(conversation_id): Path<String>,
    Json(params): Json<FeedbackParams>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = Conversation::add_feedback(
        &conversation_id,
        &subject,
        params.into_feedback(),
        &state.db,
    )
    .await?;

    Ok(Json(updated))
}

/// Delete a conversation, its messages and its cached session.
pub async fn delete_conversation(
    State(state): State<ApiState>,
    Extension(AuthSubject(subject)): Extension<AuthSubject>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Conversation::delete_with_messages(&conversation_id, &subject, &state.db).await?;
    state.context.invalidate(&subject, &conversation_id).await?;

    info!(conversation_id = %conversation_id, "Deleted conversation");

    Ok(StatusCode::NO_CONTENT)
}
