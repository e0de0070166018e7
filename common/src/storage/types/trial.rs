use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::message::MessageRole;

/// A turn embedded in a trial. Trials own their messages inline instead of
/// referencing standalone message records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrialMessage {
    pub content: String,
    pub role: MessageRole,
    pub is_visible: bool,
    pub is_bot: bool,
}

impl TrialMessage {
    pub fn new(content: String, role: MessageRole, is_bot: bool, is_visible: bool) -> Self {
        Self {
            content,
            role,
            is_visible,
            is_bot,
        }
    }

    pub fn user(content: String) -> Self {
        Self::new(content, MessageRole::User, false, true)
    }

    pub fn assistant(content: String) -> Self {
        Self::new(content, MessageRole::Assistant, true, true)
    }

    pub fn initial(content: String) -> Self {
        Self::new(content, MessageRole::Initial, true, true)
    }

    /// Hidden scaffolding turn (persona priming).
    pub fn hidden(content: String, role: MessageRole) -> Self {
        Self::new(content, role, true, false)
    }
}

stored_object!(Trial, "trial", {
    survey: String,
    survey_id: String,
    segmentation: String,
    segment: String,
    segment_id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    messages: Vec<TrialMessage>
});

impl Trial {
    pub fn new(
        survey: String,
        survey_id: String,
        segmentation: String,
        segment: String,
        segment_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            survey,
            survey_id,
            segmentation,
            segment,
            segment_id,
            description: None,
            messages: Vec::new(),
        }
    }

    pub async fn get(trial_id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let trial: Option<Trial> = db.get_item(trial_id).await?;
        trial.ok_or_else(|| AppError::NotFound("Trial not found".to_string()))
    }

    /// Persist in-place mutations (appended messages, backfilled
    /// description).
    pub async fn save(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let mut trial = self.clone();
        trial.updated_at = Utc::now();
        let _updated: Option<Self> = db
            .client
            .update((Self::table_name(), self.id.as_str()))
            .content(trial)
            .await?;

        Ok(())
    }

    pub fn visible_messages(&self) -> Vec<&TrialMessage> {
        self.messages.iter().filter(|m| m.is_visible).collect()
    }

    /// Every message except the auto-generated greeting; this is the
    /// history the answer pipelines thread through.
    pub fn non_initial_messages(&self) -> Vec<&TrialMessage> {
        self.messages
            .iter()
            .filter(|m| m.role != MessageRole::Initial)
            .collect()
    }

    /// The message cap counts every embedded turn, hidden ones included.
    pub fn is_expired(&self, threshold: usize) -> bool {
        self.messages.len() >= threshold
    }
}
