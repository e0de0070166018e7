//! Chat completion and moderation behind one mockable seam.
//!
//! Prompt assembly works on [`ChatTurn`] values; only [`OpenAiChatService`]
//! knows about the wire types. Turns serialize as `{role, content}` objects,
//! the same shape the session cache stores.

use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateModerationRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_retry::Retry;
use tracing::debug;

use common::{error::AppError, utils::retry::llm_backoff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::System => "system",
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// One message of a chat prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// A full completion request. `max_tokens: None` leaves the cap to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub turns: Vec<ChatTurn>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Run one chat completion and return the assistant text.
    async fn complete(&self, request: ChatRequest) -> Result<String, AppError>;

    /// True when the moderation endpoint flags the input.
    async fn moderate(&self, input: &str) -> Result<bool, AppError>;
}

/// [`ChatService`] over the OpenAI API, with the shared retry schedule on
/// every outbound call.
#[derive(Clone)]
pub struct OpenAiChatService {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiChatService {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn build_request(&self, request: &ChatRequest) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(request.turns.len());
        for turn in &request.turns {
            let message = match turn.role {
                TurnRole::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
                TurnRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
                TurnRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
            };
            messages.push(message);
        }

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone())
            .temperature(request.temperature)
            .messages(messages);
        if let Some(max_tokens) = request.max_tokens {
            args.max_tokens(max_tokens);
        }
        args.build()
    }
}

#[async_trait]
impl ChatService for OpenAiChatService {
    async fn complete(&self, request: ChatRequest) -> Result<String, AppError> {
        let completion_request = self.build_request(&request).map_err(into_app_error)?;

        let response = Retry::spawn(llm_backoff(), || {
            let request = completion_request.clone();
            async move { self.client.chat().create(request).await }
        })
        .await
        .map_err(into_app_error)?;

        debug!(model = %self.model, "Chat completion finished");
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .map(|content| content.to_owned())
            .ok_or_else(|| AppError::InternalError("No content in chat completion".to_owned()))
    }

    async fn moderate(&self, input: &str) -> Result<bool, AppError> {
        let moderation_request = CreateModerationRequestArgs::default()
            .input(input)
            .build()
            .map_err(into_app_error)?;

        let response = Retry::spawn(llm_backoff(), || {
            let request = moderation_request.clone();
            async move { self.client.moderations().create(request).await }
        })
        .await
        .map_err(into_app_error)?;

        Ok(response.results.first().is_some_and(|result| result.flagged))
    }
}

/// Failures the platform reports back (rate limits, invalid requests) carry
/// the upstream message to the caller as a client error; transport failures
/// stay internal.
fn into_app_error(error: OpenAIError) -> AppError {
    match error {
        OpenAIError::ApiError(api) => AppError::Validation(api.message),
        other => AppError::OpenAI(other),
    }
}
