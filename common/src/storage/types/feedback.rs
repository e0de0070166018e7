use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackReaction {
    ThumbsUp,
    ThumbsDown,
}

/// Reader feedback, embedded on a conversation or a single message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    #[serde(default)]
    pub rating: i32,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub reaction: Option<FeedbackReaction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(rating: i32, comment: String, reaction: Option<FeedbackReaction>) -> Self {
        let now = Utc::now();
        Self {
            rating,
            comment,
            reaction,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_uses_snake_case_wire_format() {
        let feedback = Feedback::new(1, "helpful".to_string(), Some(FeedbackReaction::ThumbsUp));
        let json = serde_json::to_value(&feedback).expect("serialize feedback");
        assert_eq!(json["reaction"], "thumbs_up");
        assert_eq!(json["rating"], 1);
    }

    #[test]
    fn defaults_apply_on_partial_payload() {
        let feedback: Feedback = serde_json::from_value(serde_json::json!({
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }))
        .expect("deserialize feedback");
        assert_eq!(feedback.rating, 0);
        assert!(feedback.comment.is_empty());
        assert!(feedback.reaction.is_none());
    }
}
