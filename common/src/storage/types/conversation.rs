use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{feedback::Feedback, message::Message};

stored_object!(Conversation, "conversation", {
    user_id: String,
    survey: String,
    survey_id: String,
    segmentation: String,
    segment: String,
    segment_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    feedback: Option<Feedback>
});

impl Conversation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: String,
        survey: String,
        survey_id: String,
        segmentation: String,
        segment: String,
        segment_id: String,
        title: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            survey,
            survey_id,
            segmentation,
            segment,
            segment_id,
            title,
            feedback: None,
        }
    }

    /// Fetch a conversation the given user owns.
    pub async fn get_owned(
        conversation_id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let conversation: Conversation = db
            .get_item(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        if conversation.user_id != user_id {
            return Err(AppError::Auth(
                "You don't have access to this conversation".to_string(),
            ));
        }

        Ok(conversation)
    }

    /// A conversation together with its visible messages, newest first.
    pub async fn get_complete_conversation(
        conversation_id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(Self, Vec<Message>), AppError> {
        let conversation = Self::get_owned(conversation_id, user_id, db).await?;

        let messages: Vec<Message> = db
            .client
            .query("SELECT * FROM type::table($table_name) WHERE conversation_id = $conversation_id AND is_visible = true ORDER BY updated_at DESC")
            .bind(("table_name", Message::table_name()))
            .bind(("conversation_id", conversation_id.to_string()))
            .await?
            .take(0)?;

        Ok((conversation, messages))
    }

    /// One page of a user's conversations ordered by update time descending,
    /// plus the total count for pagination metadata.
    pub async fn list_for_user(
        user_id: &str,
        page: usize,
        per_page: usize,
        db: &SurrealDbClient,
    ) -> Result<(Vec<Self>, usize), AppError> {
        let start = page.saturating_sub(1).saturating_mul(per_page);

        let conversations: Vec<Conversation> = db
            .client
            .query("SELECT * FROM type::table($table_name) WHERE user_id = $user_id ORDER BY updated_at DESC LIMIT $limit START $start")
            .bind(("table_name", Self::table_name()))
            .bind(("user_id", user_id.to_string()))
            .bind(("limit", per_page))
            .bind(("start", start))
            .await?
            .take(0)?;

        #[derive(Deserialize)]
        struct CountRow {
            count: usize,
        }

        let total: Option<CountRow> = db
            .client
            .query("SELECT count() AS count FROM type::table($table_name) WHERE user_id = $user_id GROUP ALL")
            .bind(("table_name", Self::table_name()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok((conversations, total.map_or(0, |row| row.count)))
    }

    /// Title is the only client-updatable field.
    pub async fn patch_title(
        id: &str,
        user_id: &str,
        new_title: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut conversation = Self::get_owned(id, user_id, db).await?;

        conversation.title = Some(new_title.to_string());
        conversation.updated_at = Utc::now();
        let updated: Option<Self> = db
            .client
            .update((Self::table_name(), id))
            .content(conversation)
            .await?;

        updated.ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))
    }

    pub async fn add_feedback(
        id: &str,
        user_id: &str,
        feedback: Feedback,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut conversation = Self::get_owned(id, user_id, db).await?;

        conversation.feedback = Some(feedback);
        conversation.updated_at = Utc::now();
        let updated: Option<Self> = db
            .client
            .update((Self::table_name(), id))
            .content(conversation)
            .await?;

        updated.ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))
    }

    /// Delete a conversation and every message attached to it.
    pub async fn delete_with_messages(
        id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _conversation = Self::get_owned(id, user_id, db).await?;

        Message::delete_for_conversation(id, db).await?;
        let _deleted: Option<Self> = db.delete_item(id).await?;

        Ok(())
    }

    /// Touch the update timestamp so list ordering reflects activity.
    pub async fn touch(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let mut conversation = self.clone();
        conversation.updated_at = Utc::now();
        let _updated: Option<Self> = db
            .client
            .update((Self::table_name(), self.id.as_str()))
            .content(conversation)
            .await?;

        Ok(())
    }
}
