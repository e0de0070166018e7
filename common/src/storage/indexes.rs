use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{error::AppError, storage::db::SurrealDbClient};

const INDEX_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Index name reused across every knowledge collection. Surreal scopes
/// index names per table, so the constant never collides.
const EMBEDDING_INDEX_NAME: &str = "idx_segment_embedding";
const HNSW_OPTIONS: &str = "DIST COSINE TYPE F32 EFC 100 M 8 CONCURRENTLY";

#[derive(Clone)]
pub struct HnswIndexSpec {
    index_name: &'static str,
    table: String,
    options: &'static str,
}

impl HnswIndexSpec {
    pub fn for_collection(table: impl Into<String>) -> Self {
        Self {
            index_name: EMBEDDING_INDEX_NAME,
            table: table.into(),
            options: HNSW_OPTIONS,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn definition_if_not_exists(&self, dimension: usize) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} \
             FIELDS embedding HNSW DIMENSION {dimension} {options};",
            index = self.index_name,
            table = self.table,
            dimension = dimension,
            options = self.options,
        )
    }

    fn definition_overwrite(&self, dimension: usize) -> String {
        format!(
            "DEFINE INDEX OVERWRITE {index} ON TABLE {table} \
             FIELDS embedding HNSW DIMENSION {dimension} {options};",
            index = self.index_name,
            table = self.table,
            dimension = dimension,
            options = self.options,
        )
    }
}

/// Make sure the collection carries an HNSW index over `embedding` with the
/// requested dimension. Idempotent: an index that already matches is left
/// untouched, and a dimension change overwrites the old definition.
///
/// Returns `true` when a definition was actually submitted.
pub async fn ensure_hnsw_index(
    db: &SurrealDbClient,
    spec: &HnswIndexSpec,
    dimension: usize,
) -> Result<bool, AppError> {
    ensure_hnsw_index_inner(db, spec, dimension)
        .await
        .map_err(|err| AppError::IndexCreation(err.to_string()))
}

async fn ensure_hnsw_index_inner(
    db: &SurrealDbClient,
    spec: &HnswIndexSpec,
    dimension: usize,
) -> Result<bool> {
    let definition = match hnsw_index_state(db, spec, dimension).await? {
        HnswIndexState::Matches(_) => return Ok(false),
        HnswIndexState::Missing => spec.definition_if_not_exists(dimension),
        HnswIndexState::Different(existing) => {
            info!(
                index = spec.index_name,
                table = %spec.table,
                existing_dimension = existing,
                target_dimension = dimension,
                "Overwriting HNSW index to match new embedding dimension"
            );
            spec.definition_overwrite(dimension)
        }
    };

    create_index_with_polling(db, definition, spec.index_name, &spec.table).await?;
    Ok(true)
}

async fn hnsw_index_state(
    db: &SurrealDbClient,
    spec: &HnswIndexSpec,
    expected_dimension: usize,
) -> Result<HnswIndexState> {
    let info_query = format!("INFO FOR TABLE {table};", table = spec.table);
    let mut response = db
        .client
        .query(info_query)
        .await
        .with_context(|| format!("fetching table info for {}", spec.table))?;

    let info: surrealdb::Value = response
        .take(0)
        .context("failed to take table info response")?;

    let info_json: Value =
        serde_json::to_value(info).context("serializing table info to JSON for parsing")?;

    let Some(indexes) = info_json
        .get("Object")
        .and_then(|o| o.get("indexes"))
        .and_then(|i| i.get("Object"))
        .and_then(|i| i.as_object())
    else {
        return Ok(HnswIndexState::Missing);
    };

    let Some(definition) = indexes
        .get(spec.index_name)
        .and_then(|details| details.get("Strand"))
        .and_then(|v| v.as_str())
    else {
        return Ok(HnswIndexState::Missing);
    };

    let Some(current_dimension) = extract_dimension(definition) else {
        return Ok(HnswIndexState::Missing);
    };

    if current_dimension == expected_dimension as u64 {
        Ok(HnswIndexState::Matches(current_dimension))
    } else {
        Ok(HnswIndexState::Different(current_dimension))
    }
}

enum HnswIndexState {
    Missing,
    Matches(u64),
    Different(u64),
}

fn extract_dimension(definition: &str) -> Option<u64> {
    definition
        .split("DIMENSION")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.trim_end_matches(';').parse::<u64>().ok())
}

async fn create_index_with_polling(
    db: &SurrealDbClient,
    definition: String,
    index_name: &str,
    table: &str,
) -> Result<()> {
    let expected_total = count_table_rows(db, table)
        .await
        .with_context(|| format!("counting rows in {table} for index {index_name} progress"))?;

    let res = db
        .client
        .query(definition)
        .await
        .with_context(|| format!("creating index {index_name} on table {table}"))?;
    res.check()
        .with_context(|| format!("index definition failed for {index_name} on {table}"))?;

    info!(
        index = %index_name,
        table = %table,
        expected_rows = expected_total,
        "Index definition submitted; waiting for build to finish"
    );

    poll_index_build_status(db, index_name, table, Some(expected_total), INDEX_POLL_INTERVAL).await
}

async fn poll_index_build_status(
    db: &SurrealDbClient,
    index_name: &str,
    table: &str,
    total_rows: Option<u64>,
    poll_every: Duration,
) -> Result<()> {
    let started_at = std::time::Instant::now();

    loop {
        tokio::time::sleep(poll_every).await;

        let info_query = format!("INFO FOR INDEX {index_name} ON TABLE {table};");
        let mut info_res = db.client.query(info_query).await.with_context(|| {
            format!("checking index build status for {index_name} on {table}")
        })?;

        let info: Option<Value> = info_res
            .take(0)
            .context("failed to deserialize INFO FOR INDEX result")?;

        let Some(snapshot) = parse_index_build_info(info, total_rows) else {
            warn!(
                index = %index_name,
                table = %table,
                "INFO FOR INDEX returned no data; assuming index definition might be missing"
            );
            break;
        };

        match snapshot.progress_pct {
            Some(pct) => info!(
                index = %index_name,
                table = %table,
                status = snapshot.status,
                initial = snapshot.initial,
                pending = snapshot.pending,
                updated = snapshot.updated,
                processed = snapshot.processed,
                total = snapshot.total_rows,
                progress_pct = format_args!("{pct:.1}"),
                "Index build status"
            ),
            None => info!(
                index = %index_name,
                table = %table,
                status = snapshot.status,
                initial = snapshot.initial,
                pending = snapshot.pending,
                updated = snapshot.updated,
                processed = snapshot.processed,
                "Index build status"
            ),
        }

        if snapshot.is_ready() {
            info!(
                index = %index_name,
                table = %table,
                elapsed = ?started_at.elapsed(),
                processed = snapshot.processed,
                total = snapshot.total_rows,
                "Index is ready"
            );
            break;
        }

        if snapshot.status.eq_ignore_ascii_case("error") {
            warn!(
                index = %index_name,
                table = %table,
                status = snapshot.status,
                "Index build reported error status; stopping polling"
            );
            break;
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
struct IndexBuildSnapshot {
    status: String,
    initial: u64,
    pending: u64,
    updated: u64,
    processed: u64,
    total_rows: Option<u64>,
    progress_pct: Option<f64>,
}

impl IndexBuildSnapshot {
    fn is_ready(&self) -> bool {
        self.status.eq_ignore_ascii_case("ready")
    }
}

fn parse_index_build_info(
    info: Option<Value>,
    total_rows: Option<u64>,
) -> Option<IndexBuildSnapshot> {
    let info = info?;
    let building = info.get("building");

    let status = building
        .and_then(|b| b.get("status"))
        .and_then(|s| s.as_str())
        // If there's no `building` block at all, treat as "ready" (index not building anymore)
        .unwrap_or("ready")
        .to_string();

    let initial = building
        .and_then(|b| b.get("initial"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    let pending = building
        .and_then(|b| b.get("pending"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    let updated = building
        .and_then(|b| b.get("updated"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    // `initial` is the number of rows seen when the build started; `updated` accounts for later writes.
    let processed = initial.saturating_add(updated);

    let progress_pct = total_rows.map(|total| {
        if total == 0 {
            0.0
        } else {
            ((processed as f64 / total as f64).min(1.0)) * 100.0
        }
    });

    Some(IndexBuildSnapshot {
        status,
        initial,
        pending,
        updated,
        processed,
        total_rows,
        progress_pct,
    })
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

/// Row count for an arbitrary collection table. Tables Surreal has never
/// written to yield an empty result, which counts as zero.
pub async fn collection_row_count(db: &SurrealDbClient, table: &str) -> Result<u64, AppError> {
    count_table_rows(db, table)
        .await
        .map_err(|err| AppError::InternalError(err.to_string()))
}

async fn count_table_rows(db: &SurrealDbClient, table: &str) -> Result<u64> {
    let query = format!("SELECT count() AS count FROM {table} GROUP ALL;");
    let mut response = db
        .client
        .query(query)
        .await
        .with_context(|| format!("counting rows in {table}"))?;
    let rows: Vec<CountRow> = response
        .take(0)
        .context("failed to deserialize count() response")?;
    Ok(rows.first().map(|r| r.count).unwrap_or(0))
}
