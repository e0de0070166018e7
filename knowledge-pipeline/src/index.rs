//! Vector collections: one SurrealDB table per survey segment, HNSW-indexed
//! and populated from the segment's passages.

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        indexes::{self, HnswIndexSpec},
    },
    utils::embedding::EmbeddingProvider,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    passages::{Passage, SegmentKnowledgeBuilder},
    sources::SegmentDataSource,
};

/// Deterministic table name for one (survey, segmentation, segment) triple.
///
/// SurrealDB identifiers stay unambiguous as `[a-z0-9_]`, so everything else
/// collapses to an underscore.
pub fn collection_name(survey: &str, environment: &str, segmentation: &str, segment: &str) -> String {
    let raw = format!("{survey}_{environment}-{segmentation}-{segment}");
    raw.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One stored passage row. The embedding model id travels with the vector so
/// reads can detect a model change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub text: String,
    pub question_text: String,
    pub modal_answer: String,
    pub significant_answers: String,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
}

/// A passage returned from vector search, scored by cosine distance.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub question_text: String,
    pub modal_answer: String,
    pub significant_answers: String,
    pub embedding_model: String,
    pub distance: f32,
}

impl RetrievedPassage {
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Manages the per-segment vector collections: index definitions, one-time
/// population and nearest-neighbour retrieval.
#[derive(Clone)]
pub struct VectorIndexManager {
    db: SurrealDbClient,
    embedding: EmbeddingProvider,
}

impl VectorIndexManager {
    pub fn new(db: SurrealDbClient, embedding: EmbeddingProvider) -> Self {
        Self { db, embedding }
    }

    /// Idempotently define the HNSW index for a collection. Returns whether
    /// a definition was actually submitted.
    pub async fn ensure_index(&self, collection: &str) -> Result<bool, AppError> {
        let spec = HnswIndexSpec::for_collection(collection);
        indexes::ensure_hnsw_index(&self.db, &spec, self.embedding.dimension()).await
    }

    /// Embed and insert passages unless the collection already holds rows.
    /// Returns the number of rows inserted.
    pub async fn populate_if_empty(
        &self,
        collection: &str,
        passages: &[Passage],
    ) -> Result<usize, AppError> {
        let existing = indexes::collection_row_count(&self.db, collection).await?;
        if existing > 0 {
            debug!(collection, rows = existing, "Collection already populated");
            return Ok(0);
        }
        if passages.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let embeddings = self.embedding.embed_batch(texts).await?;
        let model = self.embedding.model_code();

        for (passage, embedding) in passages.iter().zip(embeddings) {
            let record = VectorRecord {
                text: passage.text.clone(),
                question_text: passage.question_text.clone(),
                modal_answer: passage.modal_answer.clone(),
                significant_answers: passage.significant_answers.clone(),
                embedding,
                embedding_model: model.clone(),
            };
            let id = Uuid::new_v4().to_string();
            let _: Option<VectorRecord> = self
                .db
                .create((collection, id.as_str()))
                .content(record)
                .await?;
        }

        Ok(passages.len())
    }

    /// The `take` nearest passages for a question, closest first.
    pub async fn retrieve(
        &self,
        collection: &str,
        question: &str,
        take: usize,
    ) -> Result<Vec<RetrievedPassage>, AppError> {
        let embedding = self.embedding.embed(question).await?;
        let query = format!(
            "SELECT *, vector::distance::knn() AS distance FROM {collection} \
             WHERE embedding <|{take},40|> {embedding:?} ORDER BY distance"
        );
        let mut response = self.db.query(query).await?;
        let rows: Vec<RetrievedPassage> = response.take(0)?;

        let expected = self.embedding.model_code();
        if let Some(row) = rows.iter().find(|row| row.embedding_model != expected) {
            warn!(
                collection,
                stored = %row.embedding_model,
                configured = %expected,
                "Stored embeddings come from a different model"
            );
        }

        Ok(rows)
    }

    /// Build one segment's collection end to end: passages, rows, index.
    /// Returns the collection name queries should target.
    #[instrument(skip_all, fields(segment = %source.segment()))]
    pub async fn ensure_segment_collection(
        &self,
        source: &SegmentDataSource,
    ) -> Result<String, AppError> {
        let collection = collection_name(
            source.survey(),
            source.environment(),
            source.segmentation(),
            source.segment(),
        );

        let passages = SegmentKnowledgeBuilder::new(source.clone()).build().await?;
        let inserted = self.populate_if_empty(&collection, &passages).await?;
        let index_created = self.ensure_index(&collection).await?;

        info!(
            collection = %collection,
            inserted,
            index_created,
            "Segment collection ready"
        );
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::store::testing::TestStorageManager;
    use serde_json::json;

    const DIM: usize = 8;

    async fn memory_manager(ns: &str) -> VectorIndexManager {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(ns, &database)
            .await
            .expect("in-memory surrealdb");
        VectorIndexManager::new(db, EmbeddingProvider::new_hashed(DIM))
    }

    fn passage(text: &str) -> Passage {
        Passage {
            text: text.to_string(),
            question_text: format!("{text} question"),
            modal_answer: "Weekly (proportion of respondents: 0.4)".to_string(),
            significant_answers: String::new(),
        }
    }

    #[test]
    fn collection_names_are_sanitized() {
        assert_eq!(
            collection_name("food", "staging", "qudo_attitudinal", "pioneers"),
            "food_staging_qudo_attitudinal_pioneers"
        );
        assert_eq!(
            collection_name("Food-Survey", "staging", "qudo seg", "early adopters"),
            "food_survey_staging_qudo_seg_early_adopters"
        );
    }

    #[tokio::test]
    async fn populate_only_fills_an_empty_collection() {
        let manager = memory_manager("index_populate").await;
        let passages = vec![passage("alpha"), passage("beta")];

        let inserted = manager
            .populate_if_empty("seg_collection", &passages)
            .await
            .expect("first populate");
        assert_eq!(inserted, 2);

        let inserted = manager
            .populate_if_empty("seg_collection", &passages)
            .await
            .expect("second populate");
        assert_eq!(inserted, 0);

        let count = indexes::collection_row_count(&manager.db, "seg_collection")
            .await
            .expect("count");
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn retrieve_returns_closest_passages_first() {
        let manager = memory_manager("index_retrieve").await;
        let passages = vec![
            passage("how often do you buy groceries online"),
            passage("favourite holiday destination abroad"),
        ];
        manager
            .populate_if_empty("retrieval_collection", &passages)
            .await
            .expect("populate");
        manager
            .ensure_index("retrieval_collection")
            .await
            .expect("index");

        let rows = manager
            .retrieve("retrieval_collection", "how often do you buy groceries online", 2)
            .await
            .expect("retrieve");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text, "how often do you buy groceries online");
        // Identical text embeds identically, so the top hit is a perfect match.
        assert!(rows[0].similarity() > 0.99);
        assert!(rows[0].similarity() >= rows[1].similarity());
    }

    #[tokio::test]
    async fn retrieve_surfaces_rows_from_an_older_model() {
        let manager = memory_manager("index_model").await;
        let record = VectorRecord {
            text: "legacy passage".to_string(),
            question_text: "legacy question".to_string(),
            modal_answer: "answer".to_string(),
            significant_answers: String::new(),
            embedding: EmbeddingProvider::new_hashed(DIM)
                .embed("legacy passage")
                .await
                .expect("embed"),
            embedding_model: "hashed-legacy".to_string(),
        };
        let _: Option<VectorRecord> = manager
            .db
            .create(("legacy_collection", "row1"))
            .content(record)
            .await
            .expect("seed record");
        manager
            .ensure_index("legacy_collection")
            .await
            .expect("index");

        let rows = manager
            .retrieve("legacy_collection", "legacy passage", 1)
            .await
            .expect("retrieve");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].embedding_model, "hashed-legacy");
    }

    #[tokio::test]
    async fn segment_collection_builds_once_end_to_end() {
        let test_storage = TestStorageManager::new_memory()
            .await
            .expect("memory storage");
        let source = SegmentDataSource::new(
            test_storage.clone_storage(),
            "staging",
            "food",
            "qudo_attitudinal",
            "pioneers",
        );
        test_storage
            .put_json(
                &source.segment_modes_path(),
                &json!([{
                    "q_code": "sbeh_us_snacking",
                    "title": "How often do you snack?",
                    "mode": "Daily",
                    "proportion": 0.61,
                    "qtype": "varname"
                }]),
            )
            .await
            .expect("seed modes");
        test_storage
            .put_json(
                &source.chisquared_path(),
                &json!([{
                    "q_code": "sbeh_us_snacking",
                    "title": "How often do you snack?",
                    "segment": "pioneers",
                    "sig_more_category": ["Twice a day"],
                    "category_percentages": [38.0]
                }]),
            )
            .await
            .expect("seed chisquared");

        let manager = memory_manager("index_end_to_end").await;
        let collection = manager
            .ensure_segment_collection(&source)
            .await
            .expect("first build");
        assert_eq!(collection, "food_staging_qudo_attitudinal_pioneers");

        let count = indexes::collection_row_count(&manager.db, &collection)
            .await
            .expect("count");
        assert_eq!(count, 1);

        // A rerun neither duplicates rows nor rebuilds the index.
        manager
            .ensure_segment_collection(&source)
            .await
            .expect("second build");
        let count = indexes::collection_row_count(&manager.db, &collection)
            .await
            .expect("count after rerun");
        assert_eq!(count, 1);

        let rows = manager
            .retrieve(&collection, "How often do you snack?", 4)
            .await
            .expect("retrieve");
        assert_eq!(rows.len(), 1);
        assert!(rows[0].text.contains("Twice a day"));
    }
}
