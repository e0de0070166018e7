use std::sync::Arc;

use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use knowledge_pipeline::{CollectionBatchBuilder, VectorIndexManager};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await?;
    db.ensure_initialized().await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = EmbeddingProvider::from_config(&config, openai_client)?;
    info!(
        embedding_backend = ?config.embedding_backend,
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    // Create global storage manager
    let storage = StorageManager::new(&config).await?;

    let builder = CollectionBatchBuilder::new(
        storage,
        VectorIndexManager::new(db, embedding_provider),
        config.environment.clone(),
        config.collection_concurrency,
    );

    let report = builder.run().await?;
    info!(
        built = report.built,
        failed = report.failed,
        "Worker finished"
    );

    Ok(())
}
