//! Batch builder that prepares every segment collection found in object
//! storage.
//!
//! Discovery walks the analytics prefix for `segment_modes.json` objects;
//! each one pins down a (survey, segmentation, segment) triple. Builds run
//! with bounded concurrency and a failing segment is logged and skipped so
//! one broken table cannot sink the whole batch.

use common::{error::AppError, storage::store::StorageManager};
use futures::{stream, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::{index::VectorIndexManager, sources::SegmentDataSource};

/// A (survey, segmentation, segment) triple discovered in storage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SegmentTriple {
    pub survey: String,
    pub segmentation: String,
    pub segment: String,
}

/// Outcome of one batch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub built: usize,
    pub failed: usize,
}

/// Extract the segment triple from a segment-modes object path, if the path
/// is one and belongs to the given environment.
pub fn parse_segment_modes_path(location: &str, environment: &str) -> Option<SegmentTriple> {
    let parts: Vec<&str> = location.split('/').collect();
    match parts.as_slice() {
        ["analytics", environ, survey_env, segmentation, segment, "segment_modes", "segment_modes.json"]
            if *environ == environment =>
        {
            let survey = survey_env.strip_suffix(&format!("_{environment}"))?;
            Some(SegmentTriple {
                survey: survey.to_owned(),
                segmentation: (*segmentation).to_owned(),
                segment: (*segment).to_owned(),
            })
        }
        _ => None,
    }
}

pub struct CollectionBatchBuilder {
    storage: StorageManager,
    manager: VectorIndexManager,
    environment: String,
    concurrency: usize,
}

impl CollectionBatchBuilder {
    pub fn new(
        storage: StorageManager,
        manager: VectorIndexManager,
        environment: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            storage,
            manager,
            environment: environment.into(),
            concurrency,
        }
    }

    /// Discover segment triples by listing the segment-modes objects under
    /// the environment's analytics prefix.
    pub async fn discover(&self) -> Result<Vec<SegmentTriple>, AppError> {
        let prefix = format!("analytics/{}", self.environment);
        let objects = self
            .storage
            .list(Some(&prefix))
            .await
            .map_err(AppError::Storage)?;

        let mut triples: Vec<SegmentTriple> = objects
            .iter()
            .filter_map(|meta| parse_segment_modes_path(meta.location.as_ref(), &self.environment))
            .collect();
        triples.sort();
        triples.dedup();
        Ok(triples)
    }

    /// Build every discovered collection and report how many made it.
    #[instrument(skip_all, fields(environment = %self.environment))]
    pub async fn run(&self) -> Result<BatchReport, AppError> {
        let triples = self.discover().await?;
        info!(count = triples.len(), "Discovered segment collections to build");

        let outcomes = stream::iter(triples.into_iter().map(|triple| {
            let storage = self.storage.clone();
            let manager = self.manager.clone();
            let environment = self.environment.clone();

            async move {
                let source = SegmentDataSource::new(
                    storage,
                    environment,
                    triple.survey.clone(),
                    triple.segmentation.clone(),
                    triple.segment.clone(),
                );
                let result = manager.ensure_segment_collection(&source).await;
                (triple, result)
            }
        }))
        .buffer_unordered(self.concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

        let mut report = BatchReport::default();
        for (triple, result) in outcomes {
            match result {
                Ok(collection) => {
                    report.built += 1;
                    debug!(collection = %collection, "Collection built");
                }
                Err(error) => {
                    report.failed += 1;
                    warn!(
                        survey = %triple.survey,
                        segmentation = %triple.segmentation,
                        segment = %triple.segment,
                        %error,
                        "Skipping segment collection"
                    );
                }
            }
        }

        info!(
            built = report.built,
            failed = report.failed,
            "Collection batch finished"
        );
        Ok(report)
    }
}
