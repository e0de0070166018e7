//! Cached conversation state: the prompt history and Q&A pairs a turn needs,
//! kept in the session cache and rebuilt from the database on a miss.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::{
    cache::{session_key, SessionCache},
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            conversation::Conversation,
            message::{Message, MessageRole},
        },
    },
};
use knowledge_pipeline::sources::segment_description;

use crate::llm::{ChatTurn, TurnRole};

/// Everything a turn needs to know about its conversation.
///
/// `turns` is the completion-ready history for the embedding-match flow,
/// priming included; `pairs` is the same history as question and answer
/// tuples for the retrieval flow. The greeting belongs to neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub survey: String,
    pub survey_id: String,
    pub segmentation: String,
    pub segment: String,
    pub segment_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub turns: Vec<ChatTurn>,
    #[serde(default)]
    pub pairs: Vec<(String, String)>,
}

impl ConversationContext {
    pub fn push_turn(&mut self, role: TurnRole, content: impl Into<String>) {
        self.turns.push(ChatTurn {
            role,
            content: content.into(),
        });
    }

    pub fn push_pair(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.pairs.push((question.into(), answer.into()));
    }

    pub fn description_or_default(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }
}

impl From<TurnRole> for MessageRole {
    fn from(role: TurnRole) -> Self {
        match role {
            TurnRole::System => MessageRole::System,
            TurnRole::User => MessageRole::User,
            TurnRole::Assistant => MessageRole::Assistant,
        }
    }
}

/// Map persisted messages onto completion turns. The greeting is presentation
/// only and never reaches the model.
pub fn prompt_turns(messages: &[Message]) -> Vec<ChatTurn> {
    messages
        .iter()
        .filter_map(|message| {
            let role = match message.role {
                MessageRole::Initial => return None,
                MessageRole::User => TurnRole::User,
                MessageRole::System => TurnRole::System,
                MessageRole::Assistant => TurnRole::Assistant,
            };
            Some(ChatTurn {
                role,
                content: message.content.clone(),
            })
        })
        .collect()
}

/// Pair each user question with the bot answer that followed it. Priming
/// messages are bot turns with no question before them, so they drop out,
/// as does a trailing unanswered question.
pub fn history_pairs(messages: &[Message]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut open_question: Option<String> = None;
    for message in messages {
        if message.role == MessageRole::Initial {
            continue;
        }
        if message.is_bot {
            if let Some(question) = open_question.take() {
                pairs.push((question, message.content.clone()));
            }
        } else {
            open_question = Some(message.content.clone());
        }
    }
    pairs
}

/// Loads, stores and invalidates [`ConversationContext`] values, backed by
/// the session cache with the database as the source of truth.
#[derive(Clone)]
pub struct ConversationContextService {
    db: SurrealDbClient,
    storage: StorageManager,
    cache: SessionCache,
    environment: String,
    ttl: Duration,
}

impl ConversationContextService {
    pub fn new(
        db: SurrealDbClient,
        storage: StorageManager,
        cache: SessionCache,
        environment: impl Into<String>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            db,
            storage,
            cache,
            environment: environment.into(),
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    /// The context for one conversation, from cache when fresh, rebuilt and
    /// cached otherwise.
    pub async fn load(
        &self,
        subject: &str,
        conversation: &Conversation,
    ) -> Result<ConversationContext, AppError> {
        let key = session_key(subject, &conversation.id);
        if let Some(context) = self.cache.get::<ConversationContext>(&key).await? {
            debug!(%key, "Session served from cache");
            return Ok(context);
        }

        let context = self.rebuild(conversation).await?;
        self.cache.set(&key, &context, self.ttl).await?;
        debug!(%key, turns = context.turns.len(), "Session rebuilt from the database");
        Ok(context)
    }

    /// Persist an updated context for the remainder of the session.
    pub async fn store(
        &self,
        subject: &str,
        conversation_id: &str,
        context: &ConversationContext,
    ) -> Result<(), AppError> {
        let key = session_key(subject, conversation_id);
        self.cache.set(&key, context, self.ttl).await
    }

    pub async fn invalidate(&self, subject: &str, conversation_id: &str) -> Result<(), AppError> {
        let key = session_key(subject, conversation_id);
        self.cache.delete(&key).await
    }

    async fn rebuild(&self, conversation: &Conversation) -> Result<ConversationContext, AppError> {
        let messages =
            Message::for_conversation(&conversation.id, &conversation.user_id, &self.db).await?;

        // The description seeds new priming only; a conversation must keep
        // working when the catalogue is missing or the id is stale.
        let description = match segment_description(
            &self.storage,
            &self.environment,
            &conversation.survey_id,
            &conversation.segmentation,
            &conversation.segment_id,
        )
        .await
        {
            Ok(description) => Some(description),
            Err(error) => {
                warn!(conversation_id = %conversation.id, %error, "Could not load the segment description");
                None
            }
        };

        Ok(ConversationContext {
            survey: conversation.survey.clone(),
            survey_id: conversation.survey_id.clone(),
            segmentation: conversation.segmentation.clone(),
            segment: conversation.segment.clone(),
            segment_id: conversation.segment_id.clone(),
            description,
            turns: prompt_turns(&messages),
            pairs: history_pairs(&messages),
        })
    }
}
