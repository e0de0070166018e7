#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::feedback::Feedback;

/// Wire roles match the persisted conversation format: `initial` marks the
/// auto-generated greeting, everything else mirrors the chat API roles.
#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    System,
    Assistant,
    Initial,
}

stored_object!(Message, "message", {
    user_id: String,
    conversation_id: String,
    role: MessageRole,
    content: String,
    is_visible: bool,
    is_bot: bool,
    feedback: Option<Feedback>
});

impl Message {
    pub fn new(
        conversation_id: String,
        user_id: String,
        role: MessageRole,
        content: String,
        is_bot: bool,
        is_visible: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            conversation_id,
            role,
            content,
            is_visible,
            is_bot,
            feedback: None,
        }
    }

    /// All of a conversation's messages in causal order, hidden scaffolding
    /// included.
    pub async fn for_conversation(
        conversation_id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let messages: Vec<Message> = db
            .client
            .query("SELECT * FROM type::table($table_name) WHERE conversation_id = $conversation_id AND user_id = $user_id ORDER BY created_at")
            .bind(("table_name", Message::table_name()))
            .bind(("conversation_id", conversation_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(messages)
    }

    /// Only the messages a client is meant to see.
    pub async fn visible_for_conversation(
        conversation_id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let messages: Vec<Message> = db
            .client
            .query("SELECT * FROM type::table($table_name) WHERE conversation_id = $conversation_id AND user_id = $user_id AND is_visible = true ORDER BY created_at")
            .bind(("table_name", Message::table_name()))
            .bind(("conversation_id", conversation_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(messages)
    }

    pub async fn count_visible(
        conversation_id: &str,
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: usize,
        }

        let row: Option<CountRow> = db
            .client
            .query("SELECT count() AS count FROM type::table($table_name) WHERE conversation_id = $conversation_id AND is_visible = true GROUP ALL")
            .bind(("table_name", Message::table_name()))
            .bind(("conversation_id", conversation_id.to_string()))
            .await?
            .take(0)?;

        Ok(row.map_or(0, |r| r.count))
    }

    /// Attach feedback to a message owned by the given user.
    pub async fn add_feedback(
        message_id: &str,
        user_id: &str,
        feedback: Feedback,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let message: Option<Message> = db.get_item(message_id).await?;
        let mut message =
            message.ok_or_else(|| AppError::NotFound("Message Not Found".to_string()))?;

        if message.user_id != user_id {
            return Err(AppError::Auth(
                "You don't have access to this message".to_string(),
            ));
        }

        message.feedback = Some(feedback);
        message.updated_at = Utc::now();
        let updated: Option<Message> = db
            .client
            .update((Self::table_name(), message_id))
            .content(message)
            .await?;

        updated.ok_or_else(|| AppError::NotFound("Message Not Found".to_string()))
    }

    /// Remove every message belonging to a conversation.
    pub async fn delete_for_conversation(
        conversation_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let query = format!(
            "DELETE {} WHERE conversation_id = $conversation_id",
            Self::table_name()
        );
        db.client
            .query(query)
            .bind(("conversation_id", conversation_id.to_string()))
            .await?;

        Ok(())
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Initial => write!(f, "initial"),
        }
    }
}
