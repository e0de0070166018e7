use api_router::{api_routes_v1, api_routes_v2, api_state::ApiState};
use axum::Router;
use common::{
    storage::store::StorageManager,
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use knowledge_pipeline::{CollectionBatchBuilder, VectorIndexManager};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    // Create global storage manager
    let storage = StorageManager::new(&config).await?;

    let api_state = ApiState::new(&config, storage.clone()).await?;

    // Warm the segment collections in the background while the server takes
    // traffic. A collection that is still missing when a question arrives is
    // built on demand by the retrieval chain.
    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let embedding_provider = EmbeddingProvider::from_config(&config, openai_client)?;
    let builder = CollectionBatchBuilder::new(
        storage,
        VectorIndexManager::new((*api_state.db).clone(), embedding_provider),
        config.environment.clone(),
        config.collection_concurrency,
    );
    tokio::spawn(async move {
        info!("Starting collection warm-up");
        if let Err(error) = builder.run().await {
            error!(%error, "Collection warm-up failed");
        }
    });

    // Create Axum router
    let app = Router::new()
        .nest("/api/v1", api_routes_v1())
        .nest("/api/v2", api_routes_v2())
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
