//! Typed access to the analytics tables behind a survey segment.
//!
//! Every table is a JSON array of row objects stored under a deterministic
//! path keyed by environment, survey, segmentation and segment. Loaders go
//! through [`StorageManager::get_json`], so a missing object surfaces as
//! `AppError::NotFound` and callers can decide whether that is fatal.

use common::{error::AppError, storage::store::StorageManager};
use serde::{Deserialize, Serialize};

/// Namespace a question code lives in. Modal-answer rows carry both kinds;
/// chi-squared rows mix them, which is what reconciliation untangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionCodeKind {
    Varname,
    Shortname,
}

/// One modal answer for a question within the segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentModeRow {
    pub q_code: String,
    pub title: String,
    pub mode: String,
    #[serde(default)]
    pub proportion: f64,
    pub qtype: QuestionCodeKind,
}

/// One chi-squared excerpt: categories a segment picked significantly more
/// often than the rest of the population, with their percentages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChiSquaredRow {
    pub q_code: String,
    pub title: String,
    pub segment: String,
    #[serde(default)]
    pub sig_more_category: Vec<String>,
    #[serde(default)]
    pub weighted_category_percentages: Option<Vec<f64>>,
    #[serde(default)]
    pub category_percentages: Option<Vec<f64>>,
}

/// One pre-embedded survey question from the question bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankRow {
    pub shortname: String,
    pub title: String,
    pub better_question_embedding: Vec<f32>,
    pub title_embedding: Vec<f32>,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

/// Modal answers per cluster across the whole population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationModeRow {
    pub cluster: String,
    pub shortname: String,
    pub weighted_mode: String,
    pub unweighted_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentDescriptions {
    segments: Vec<SegmentDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentDescription {
    id: String,
    description: String,
}

/// Addresses and loads every analytics table belonging to one segment.
///
/// `segment` is the raw segment name with the segmentation namespace already
/// stripped; only persisted conversations and collection names use the
/// namespaced form.
#[derive(Clone)]
pub struct SegmentDataSource {
    storage: StorageManager,
    environment: String,
    survey: String,
    segmentation: String,
    segment: String,
}

impl SegmentDataSource {
    pub fn new(
        storage: StorageManager,
        environment: impl Into<String>,
        survey: impl Into<String>,
        segmentation: impl Into<String>,
        segment: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            environment: environment.into(),
            survey: survey.into(),
            segmentation: segmentation.into(),
            segment: segment.into(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn survey(&self) -> &str {
        &self.survey
    }

    pub fn segmentation(&self) -> &str {
        &self.segmentation
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn segment_modes_path(&self) -> String {
        format!(
            "analytics/{environ}/{survey}_{environ}/{segmentation}/{segment}/segment_modes/segment_modes.json",
            environ = self.environment,
            survey = self.survey,
            segmentation = self.segmentation,
            segment = self.segment,
        )
    }

    pub fn chisquared_rules_based_path(&self) -> String {
        format!(
            "analytics/{environ}/chisquared/{survey}_{environ}/{segmentation}/rules_based.json",
            environ = self.environment,
            survey = self.survey,
            segmentation = self.segmentation,
        )
    }

    pub fn chisquared_path(&self) -> String {
        format!(
            "analytics/{environ}/chisquared/{survey}_{environ}/{segmentation}.json",
            environ = self.environment,
            survey = self.survey,
            segmentation = self.segmentation,
        )
    }

    pub fn question_bank_path(&self) -> String {
        format!(
            "analytics/{environ}/{survey}/relevant_questions_embedding.json",
            environ = self.environment,
            survey = self.survey,
        )
    }

    pub fn population_modes_path(&self) -> String {
        format!(
            "analytics/{environ}/{survey}/population_modes/{segmentation}/population_modes.json",
            environ = self.environment,
            survey = self.survey,
            segmentation = self.segmentation,
        )
    }

    pub async fn segment_modes(&self) -> Result<Vec<SegmentModeRow>, AppError> {
        self.storage.get_json(&self.segment_modes_path()).await
    }

    /// The rules-based chi-squared table wins over the plain one when both
    /// exist for a segmentation.
    pub async fn chisquared(&self) -> Result<Vec<ChiSquaredRow>, AppError> {
        let rules_based = self.chisquared_rules_based_path();
        let location = if self
            .storage
            .exists(&rules_based)
            .await
            .map_err(AppError::Storage)?
        {
            rules_based
        } else {
            self.chisquared_path()
        };
        self.storage.get_json(&location).await
    }

    pub async fn question_bank(&self) -> Result<Vec<BankRow>, AppError> {
        self.storage.get_json(&self.question_bank_path()).await
    }

    pub async fn population_modes(&self) -> Result<Vec<PopulationModeRow>, AppError> {
        self.storage.get_json(&self.population_modes_path()).await
    }
}

pub fn segment_descriptions_path(environment: &str, survey_id: &str, segmentation: &str) -> String {
    format!("content/{environment}/{survey_id}/{segmentation}/segments.json")
}

/// Look up the editorial description for one segment id.
///
/// A missing catalogue and an unknown id both come back as `NotFound`;
/// callers that treat the description as optional log and move on.
pub async fn segment_description(
    storage: &StorageManager,
    environment: &str,
    survey_id: &str,
    segmentation: &str,
    segment_id: &str,
) -> Result<String, AppError> {
    let path = segment_descriptions_path(environment, survey_id, segmentation);
    let catalogue: SegmentDescriptions = storage.get_json(&path).await?;
    catalogue
        .segments
        .into_iter()
        .find(|segment| segment.id == segment_id)
        .map(|segment| segment.description)
        .ok_or_else(|| {
            AppError::NotFound("Cannot find segment description in the segments json.".to_owned())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::store::testing::TestStorageManager;
    use serde_json::json;

    async fn source_with_storage() -> (TestStorageManager, SegmentDataSource) {
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
        (test_storage, source)
    }

    #[tokio::test]
    async fn paths_follow_the_catalogue_layout() {
        let (_storage, source) = source_with_storage().await;

        assert_eq!(
            source.segment_modes_path(),
            "analytics/staging/food_staging/qudo_attitudinal/pioneers/segment_modes/segment_modes.json"
        );
        assert_eq!(
            source.chisquared_rules_based_path(),
            "analytics/staging/chisquared/food_staging/qudo_attitudinal/rules_based.json"
        );
        assert_eq!(
            source.chisquared_path(),
            "analytics/staging/chisquared/food_staging/qudo_attitudinal.json"
        );
        assert_eq!(
            source.question_bank_path(),
            "analytics/staging/food/relevant_questions_embedding.json"
        );
        assert_eq!(
            source.population_modes_path(),
            "analytics/staging/food/population_modes/qudo_attitudinal/population_modes.json"
        );
        assert_eq!(
            segment_descriptions_path("staging", "1042", "qudo_attitudinal"),
            "content/staging/1042/qudo_attitudinal/segments.json"
        );
    }

    #[tokio::test]
    async fn loads_typed_segment_modes() {
        let (storage, source) = source_with_storage().await;
        storage
            .put_json(
                &source.segment_modes_path(),
                &json!([
                    {
                        "q_code": "sbeh_us_groceries_gg",
                        "title": "How often do you buy groceries online?",
                        "mode": "Weekly",
                        "proportion": 0.42,
                        "qtype": "varname"
                    },
                    {
                        "q_code": "sbeh_us_payment",
                        "title": "Preferred payment method",
                        "mode": "Card",
                        "qtype": "shortname"
                    }
                ]),
            )
            .await
            .expect("seed segment modes");

        let rows = source.segment_modes().await.expect("load segment modes");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].qtype, QuestionCodeKind::Varname);
        assert!((rows[0].proportion - 0.42).abs() < f64::EPSILON);
        // Absent proportion defaults to zero rather than failing the decode.
        assert_eq!(rows[1].proportion, 0.0);
        assert_eq!(rows[1].qtype, QuestionCodeKind::Shortname);
    }

    #[tokio::test]
    async fn chisquared_prefers_the_rules_based_table() {
        let (storage, source) = source_with_storage().await;
        let row = |code: &str| {
            json!([{
                "q_code": code,
                "title": "Example",
                "segment": "pioneers",
                "sig_more_category": ["Online"],
                "category_percentages": [55.0]
            }])
        };
        storage
            .put_json(&source.chisquared_rules_based_path(), &row("from_rules"))
            .await
            .expect("seed rules based");
        storage
            .put_json(&source.chisquared_path(), &row("from_plain"))
            .await
            .expect("seed plain");

        let rows = source.chisquared().await.expect("load chisquared");
        assert_eq!(rows[0].q_code, "from_rules");
    }

    #[tokio::test]
    async fn chisquared_falls_back_to_the_plain_table() {
        let (storage, source) = source_with_storage().await;
        storage
            .put_json(
                &source.chisquared_path(),
                &json!([{
                    "q_code": "from_plain",
                    "title": "Example",
                    "segment": "pioneers",
                    "sig_more_category": [],
                    "category_percentages": []
                }]),
            )
            .await
            .expect("seed plain");

        let rows = source.chisquared().await.expect("load chisquared");
        assert_eq!(rows[0].q_code, "from_plain");
        assert!(rows[0].weighted_category_percentages.is_none());
    }

    #[tokio::test]
    async fn missing_table_maps_to_not_found() {
        let (_storage, source) = source_with_storage().await;
        let err = source.segment_modes().await.expect_err("must miss");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn description_lookup_matches_on_id() {
        let test_storage = TestStorageManager::new_memory()
            .await
            .expect("memory storage");
        let storage = test_storage.storage();
        test_storage
            .put_json(
                &segment_descriptions_path("staging", "1042", "qudo_attitudinal"),
                &json!({
                    "segments": [
                        {"id": "7", "description": "Early adopters of new food products."},
                        {"id": "8", "description": "Price-driven shoppers."}
                    ]
                }),
            )
            .await
            .expect("seed descriptions");

        let description =
            segment_description(storage, "staging", "1042", "qudo_attitudinal", "8")
                .await
                .expect("description");
        assert_eq!(description, "Price-driven shoppers.");

        let err = segment_description(storage, "staging", "1042", "qudo_attitudinal", "99")
            .await
            .expect_err("unknown id");
        assert!(matches!(err, AppError::NotFound(_)));

        let err = segment_description(storage, "staging", "9999", "qudo_attitudinal", "8")
            .await
            .expect_err("missing catalogue");
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
