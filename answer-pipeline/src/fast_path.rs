//! First-generation answer flow: score the question against the segment's
//! pre-embedded question bank and either return the stored modal answer
//! verbatim or fall back to a persona completion seeded with the closest
//! matches as exemplars.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use common::{
    error::AppError,
    utils::{embedding::EmbeddingProvider, segment::cluster_name},
};
use knowledge_pipeline::sources::{BankRow, PopulationModeRow, SegmentDataSource};

use crate::llm::{ChatRequest, ChatService, ChatTurn};
use crate::prompts;
use crate::tokens;

/// Bank questions scoring below this are ignored entirely.
const SIMILARITY_FLOOR: f32 = 0.85;
/// At or above this the stored modal answer is returned without a completion.
const CANNED_ANSWER_THRESHOLD: f32 = 0.95;
/// Matches attached to a generated prompt as exemplars are capped.
const MAX_EXEMPLARS: usize = 5;
/// Modal answer recorded when every respondent skipped the question.
const NOT_SELECTED: &str = "not selected";
/// Persona completions keep a little sampling freedom.
const FAST_PATH_TEMPERATURE: f32 = 0.3;

/// Outcome of one fast-path turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastPathAnswer {
    pub answer: String,
    /// True when the answer came straight from the stored modal answers.
    pub canned: bool,
}

/// A bank question joined with the cluster's modal answer and scored against
/// the input question.
#[derive(Debug, Clone)]
struct ScoredQuestion {
    shortname: String,
    title: String,
    weighted_mode: String,
    score: f32,
}

#[derive(Clone)]
pub struct FastPathAnswerer {
    chat: Arc<dyn ChatService>,
    embedding: EmbeddingProvider,
    context_window: usize,
}

impl FastPathAnswerer {
    pub fn new(
        chat: Arc<dyn ChatService>,
        embedding: EmbeddingProvider,
        context_window: usize,
    ) -> Self {
        Self {
            chat,
            embedding,
            context_window,
        }
    }

    /// Answer one question for the segment.
    ///
    /// `turns` is the cached prompt history, priming included. It is not
    /// modified here; the caller appends the plain question and the answer
    /// after persisting them.
    #[instrument(skip_all, fields(segment = %source.segment()))]
    pub async fn answer(
        &self,
        source: &SegmentDataSource,
        question: &str,
        turns: &[ChatTurn],
    ) -> Result<FastPathAnswer, AppError> {
        let matches = self.scored_matches(source, question).await?;

        if let Some(top) = canned_candidate(&matches) {
            info!(shortname = %top.shortname, score = top.score, "Answering from the stored modal answer");
            return Ok(FastPathAnswer {
                answer: top.weighted_mode.clone(),
                canned: true,
            });
        }

        if self.chat.moderate(question).await? {
            info!("Moderation flagged the question");
            return Ok(FastPathAnswer {
                answer: prompts::MODERATION_REFUSAL.to_owned(),
                canned: false,
            });
        }

        let exemplars: Vec<(String, String)> = matches
            .iter()
            .take(MAX_EXEMPLARS)
            .map(|row| (row.title.clone(), row.weighted_mode.clone()))
            .collect();

        // Exemplars ride on the question itself, not on the cached history.
        let mut request_turns = turns.to_vec();
        request_turns.push(ChatTurn::user(format!(
            "{question}{}",
            prompts::exemplar_block(&exemplars)
        )));

        let prompt_tokens = tokens::prompt_tokens(&request_turns)?;
        let max_tokens = tokens::reply_budget(self.context_window, prompt_tokens);
        debug!(prompt_tokens, max_tokens, exemplars = exemplars.len(), "Generating a persona completion");

        let answer = self
            .chat
            .complete(ChatRequest {
                turns: request_turns,
                temperature: FAST_PATH_TEMPERATURE,
                max_tokens: Some(max_tokens),
            })
            .await?;

        Ok(FastPathAnswer {
            answer: prompts::amend_answer(&answer),
            canned: false,
        })
    }

    /// Score the cluster's question bank against the input question.
    async fn scored_matches(
        &self,
        source: &SegmentDataSource,
        question: &str,
    ) -> Result<Vec<ScoredQuestion>, AppError> {
        let cluster = cluster_name(source.segment());
        let bank = source.question_bank().await?;
        let population_modes = source.population_modes().await?;

        let expected = self.embedding.model_code();
        if let Some(stored) = bank
            .iter()
            .filter_map(|row| row.embedding_model.as_deref())
            .find(|model| *model != expected)
        {
            warn!(
                stored,
                configured = %expected,
                "Question bank embeddings come from a different model"
            );
        }

        let question_embedding = self.embedding.embed(question).await?;

        let matches = rank_matches(&bank, &population_modes, cluster, &question_embedding);
        debug!(%cluster, candidates = matches.len(), "Scored the question bank");
        Ok(matches)
    }
}

/// Join bank rows with the cluster's modal answers, score them, and keep the
/// ones above the similarity floor, best first. Equal scores order by
/// shortname so the outcome is deterministic.
fn rank_matches(
    bank: &[BankRow],
    population_modes: &[PopulationModeRow],
    cluster: &str,
    question_embedding: &[f32],
) -> Vec<ScoredQuestion> {
    let cluster_modes: Vec<&PopulationModeRow> = population_modes
        .iter()
        .filter(|row| row.cluster == cluster)
        .collect();
    let shortnames: HashSet<&str> = cluster_modes
        .iter()
        .map(|row| row.shortname.as_str())
        .collect();

    let mut scored: Vec<ScoredQuestion> = bank
        .iter()
        .filter(|row| shortnames.contains(row.shortname.as_str()))
        .filter_map(|row| {
            let mode = cluster_modes
                .iter()
                .find(|mode| mode.shortname == row.shortname)?;
            let better = cosine_similarity(&row.better_question_embedding, question_embedding);
            let title = cosine_similarity(&row.title_embedding, question_embedding);
            Some(ScoredQuestion {
                shortname: row.shortname.clone(),
                title: row.title.clone(),
                weighted_mode: mode.weighted_mode.clone(),
                score: better.max(title),
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.shortname.cmp(&b.shortname))
    });
    scored.retain(|row| row.score >= SIMILARITY_FLOOR);
    scored
}

/// The top match qualifies for a canned answer when it clears the threshold
/// and its modal answer is a real selection.
fn canned_candidate(matches: &[ScoredQuestion]) -> Option<&ScoredQuestion> {
    matches
        .first()
        .filter(|top| top.score >= CANNED_ANSWER_THRESHOLD && top.weighted_mode != NOT_SELECTED)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|y| y * y).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use common::storage::store::testing::TestStorageManager;
    use serde_json::json;

    use crate::llm::MockChatService;

    use super::*;

    const DIM: usize = 64;

    fn bank_row(shortname: &str, title: &str, embedding: Vec<f32>) -> BankRow {
        BankRow {
            shortname: shortname.to_owned(),
            title: title.to_owned(),
            better_question_embedding: embedding.clone(),
            title_embedding: embedding,
            embedding_model: None,
        }
    }

    fn mode_row(cluster: &str, shortname: &str, weighted_mode: &str) -> PopulationModeRow {
        PopulationModeRow {
            cluster: cluster.to_owned(),
            shortname: shortname.to_owned(),
            weighted_mode: weighted_mode.to_owned(),
            unweighted_mode: weighted_mode.to_owned(),
        }
    }

    fn scored(shortname: &str, weighted_mode: &str, score: f32) -> ScoredQuestion {
        ScoredQuestion {
            shortname: shortname.to_owned(),
            title: format!("Question {shortname}"),
            weighted_mode: weighted_mode.to_owned(),
            score,
        }
    }

    #[test]
    fn ranking_filters_sorts_and_joins() {
        let bank = vec![
            bank_row("q_low", "Low", vec![0.6, 0.8]),
            bank_row("q_high", "High", vec![1.0, 0.0]),
            bank_row("q_mid", "Mid", vec![0.9, 0.43589]),
            bank_row("q_orphan", "No modal answer", vec![1.0, 0.0]),
            bank_row("q_other_cluster", "Elsewhere", vec![1.0, 0.0]),
        ];
        let modes = vec![
            mode_row("pioneers", "q_low", "Rarely"),
            mode_row("pioneers", "q_high", "Often"),
            mode_row("pioneers", "q_mid", "Sometimes"),
            mode_row("settlers", "q_other_cluster", "Never"),
        ];

        let matches = rank_matches(&bank, &modes, "pioneers", &[1.0, 0.0]);

        // q_low scores 0.6 and falls below the floor; q_orphan has no modal
        // answer; q_other_cluster belongs to another cluster.
        let names: Vec<&str> = matches.iter().map(|m| m.shortname.as_str()).collect();
        assert_eq!(names, vec!["q_high", "q_mid"]);
        assert_eq!(matches[0].weighted_mode, "Often");
        assert!(matches[0].score > 0.99);
        assert!(matches[1].score > 0.89 && matches[1].score < 0.91);
    }

    #[test]
    fn equal_scores_order_by_shortname() {
        let bank = vec![
            bank_row("q_b", "B", vec![1.0, 0.0]),
            bank_row("q_a", "A", vec![1.0, 0.0]),
        ];
        let modes = vec![
            mode_row("pioneers", "q_a", "Yes"),
            mode_row("pioneers", "q_b", "No"),
        ];

        let matches = rank_matches(&bank, &modes, "pioneers", &[1.0, 0.0]);
        let names: Vec<&str> = matches.iter().map(|m| m.shortname.as_str()).collect();
        assert_eq!(names, vec!["q_a", "q_b"]);
    }

    #[test]
    fn canned_needs_the_threshold_and_a_real_selection() {
        assert!(canned_candidate(&[scored("q", "Once a week", 0.95)]).is_some());
        assert!(canned_candidate(&[scored("q", "Once a week", 0.9499)]).is_none());
        assert!(canned_candidate(&[scored("q", "not selected", 0.99)]).is_none());
        assert!(canned_candidate(&[]).is_none());
        // Only the top match is consulted.
        assert!(canned_candidate(&[
            scored("q_top", "not selected", 0.99),
            scored("q_next", "Once a week", 0.98),
        ])
        .is_none());
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    struct Fixture {
        source: SegmentDataSource,
        provider: EmbeddingProvider,
        _storage: TestStorageManager,
    }

    /// Storage with a question bank and population modes for one cluster.
    /// Bank embeddings come from the hashed provider, so embedding the same
    /// text in the test scores an exact match.
    async fn fixture(rows: Vec<(&str, &str, &str, &str)>) -> Fixture {
        let storage = TestStorageManager::new_memory().await.expect("storage");
        let provider = EmbeddingProvider::new_hashed(DIM);

        let mut bank = Vec::new();
        let mut modes = Vec::new();
        for (shortname, title, embed_text, weighted_mode) in rows {
            let embedding = provider.embed(embed_text).await.expect("embed");
            bank.push(json!({
                "shortname": shortname,
                "title": title,
                "better_question_embedding": embedding,
                "title_embedding": embedding,
            }));
            modes.push(json!({
                "cluster": "pioneers",
                "shortname": shortname,
                "weighted_mode": weighted_mode,
                "unweighted_mode": weighted_mode,
            }));
        }

        storage
            .put_json("analytics/staging/food/relevant_questions_embedding.json", &bank)
            .await
            .expect("put bank");
        storage
            .put_json(
                "analytics/staging/food/population_modes/qudo_attitudinal/population_modes.json",
                &modes,
            )
            .await
            .expect("put modes");

        let source = SegmentDataSource::new(
            storage.clone_storage(),
            "staging",
            "food",
            "qudo_attitudinal",
            "pioneers",
        );
        Fixture {
            source,
            provider,
            _storage: storage,
        }
    }

    #[tokio::test]
    async fn exact_match_returns_the_modal_answer_without_a_completion() {
        let fixture = fixture(vec![(
            "shop_freq",
            "How often do you shop online?",
            "How often do you shop online?",
            "Once a week",
        )])
        .await;

        // No expectations: any chat or moderation call panics.
        let chat = MockChatService::new();
        let answerer = FastPathAnswerer::new(Arc::new(chat), fixture.provider.clone(), 8192);

        let turns = prompts::priming_turns("careful shoppers", "How often do you shop online?");
        let answer = answerer
            .answer(&fixture.source, "How often do you shop online?", &turns)
            .await
            .expect("answer");

        assert_eq!(answer.answer, "Once a week");
        assert!(answer.canned);
    }

    #[tokio::test]
    async fn a_bank_built_with_another_model_still_answers() {
        let storage = TestStorageManager::new_memory().await.expect("storage");
        let provider = EmbeddingProvider::new_hashed(DIM);
        let embedding = provider
            .embed("How often do you shop online?")
            .await
            .expect("embed");
        storage
            .put_json(
                "analytics/staging/food/relevant_questions_embedding.json",
                &json!([{
                    "shortname": "shop_freq",
                    "title": "How often do you shop online?",
                    "better_question_embedding": embedding,
                    "title_embedding": embedding,
                    "embedding_model": "text-embedding-ada-002"
                }]),
            )
            .await
            .expect("put bank");
        storage
            .put_json(
                "analytics/staging/food/population_modes/qudo_attitudinal/population_modes.json",
                &json!([{
                    "cluster": "pioneers",
                    "shortname": "shop_freq",
                    "weighted_mode": "Once a week",
                    "unweighted_mode": "Once a week"
                }]),
            )
            .await
            .expect("put modes");
        let source = SegmentDataSource::new(
            storage.clone_storage(),
            "staging",
            "food",
            "qudo_attitudinal",
            "pioneers",
        );

        let chat = MockChatService::new();
        let answerer = FastPathAnswerer::new(Arc::new(chat), provider, 8192);
        let turns = prompts::priming_turns("careful shoppers", "How often do you shop online?");
        let answer = answerer
            .answer(&source, "How often do you shop online?", &turns)
            .await
            .expect("answer");

        // The mismatch is logged, not fatal; scoring proceeds with the
        // stored vectors.
        assert_eq!(answer.answer, "Once a week");
        assert!(answer.canned);
    }

    #[tokio::test]
    async fn not_selected_top_match_generates_with_exemplars() {
        let fixture = fixture(vec![(
            "shop_freq",
            "How often do you shop online?",
            "How often do you shop online?",
            "not selected",
        )])
        .await;

        let mut chat = MockChatService::new();
        chat.expect_moderate()
            .withf(|input: &str| input == "How often do you shop online?")
            .times(1)
            .returning(|_| Ok(false));
        chat.expect_complete()
            .withf(|request: &ChatRequest| {
                let user_turn = request.turns.last().expect("user turn");
                request.temperature == 0.3
                    && request.max_tokens.is_some()
                    && user_turn.content.starts_with("How often do you shop online?For reference,")
                    && user_turn.content.contains("with this answer \"not selected\".")
            })
            .times(1)
            .returning(|_| Ok("As an AI language model, I shop rarely.".to_owned()));

        let answerer = FastPathAnswerer::new(Arc::new(chat), fixture.provider.clone(), 8192);
        let turns = prompts::priming_turns("careful shoppers", "How often do you shop online?");
        let answer = answerer
            .answer(&fixture.source, "How often do you shop online?", &turns)
            .await
            .expect("answer");

        assert_eq!(answer.answer, "I am a synthetic AI persona, as such I shop rarely.");
        assert!(!answer.canned);
    }

    #[tokio::test]
    async fn unrelated_questions_generate_without_exemplars() {
        let fixture = fixture(vec![(
            "shop_freq",
            "How often do you shop online?",
            "How often do you shop online?",
            "Once a week",
        )])
        .await;

        let mut chat = MockChatService::new();
        chat.expect_moderate().times(1).returning(|_| Ok(false));
        chat.expect_complete()
            .withf(|request: &ChatRequest| {
                let user_turn = request.turns.last().expect("user turn");
                user_turn.content == "Do you enjoy gardening at weekends?"
                    && !request.turns.iter().any(|t| t.content.contains("For reference"))
            })
            .times(1)
            .returning(|_| Ok("Not really.".to_owned()));

        let answerer = FastPathAnswerer::new(Arc::new(chat), fixture.provider.clone(), 8192);
        let turns = prompts::priming_turns("careful shoppers", "Do you enjoy gardening at weekends?");
        let answer = answerer
            .answer(&fixture.source, "Do you enjoy gardening at weekends?", &turns)
            .await
            .expect("answer");

        assert_eq!(answer.answer, "Not really.");
        assert!(!answer.canned);
    }

    #[tokio::test]
    async fn flagged_questions_get_the_refusal() {
        let fixture = fixture(vec![(
            "shop_freq",
            "How often do you shop online?",
            "How often do you shop online?",
            "Once a week",
        )])
        .await;

        let mut chat = MockChatService::new();
        chat.expect_moderate().times(1).returning(|_| Ok(true));
        // No completion expectation: reaching it panics.

        let answerer = FastPathAnswerer::new(Arc::new(chat), fixture.provider.clone(), 8192);
        let turns = prompts::priming_turns("careful shoppers", "Something terrible");
        let answer = answerer
            .answer(&fixture.source, "Something terrible", &turns)
            .await
            .expect("answer");

        assert_eq!(answer.answer, prompts::MODERATION_REFUSAL);
        assert!(!answer.canned);
    }

    #[tokio::test]
    async fn exemplars_cap_at_five_in_shortname_order() {
        // Six identical-scoring bank questions; the top one is "not selected"
        // so the canned path is skipped and all six compete as exemplars.
        let fixture = fixture(vec![
            ("s1", "Question s1", "How often do you shop online?", "not selected"),
            ("s2", "Question s2", "How often do you shop online?", "not selected"),
            ("s3", "Question s3", "How often do you shop online?", "not selected"),
            ("s4", "Question s4", "How often do you shop online?", "not selected"),
            ("s5", "Question s5", "How often do you shop online?", "not selected"),
            ("s6", "Question s6", "How often do you shop online?", "not selected"),
        ])
        .await;

        let mut chat = MockChatService::new();
        chat.expect_moderate().times(1).returning(|_| Ok(false));
        chat.expect_complete()
            .withf(|request: &ChatRequest| {
                let content = &request.turns.last().expect("user turn").content;
                content.matches("For reference").count() == 5
                    && content.contains("Question s1")
                    && content.contains("Question s5")
                    && !content.contains("Question s6")
                    && content.find("Question s1") < content.find("Question s2")
            })
            .times(1)
            .returning(|_| Ok("A persona answer.".to_owned()));

        let answerer = FastPathAnswerer::new(Arc::new(chat), fixture.provider.clone(), 8192);
        let turns = prompts::priming_turns("careful shoppers", "How often do you shop online?");
        let answer = answerer
            .answer(&fixture.source, "How often do you shop online?", &turns)
            .await
            .expect("answer");

        assert_eq!(answer.answer, "A persona answer.");
    }
}
