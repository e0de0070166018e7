use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};

use answer_pipeline::{
    ChatService, ConversationContextService, FastPathAnswerer, FastPathStrategy,
    OpenAiChatService, RetrievalAnswerChain, RetrievalChainStrategy,
};
use common::{
    cache::SessionCache,
    error::AppError,
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use knowledge_pipeline::VectorIndexManager;

/// Shared state for the API routers: the database handle plus the two
/// answering strategies, wired once at startup.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub context: ConversationContextService,
    pub fast_path: FastPathStrategy,
    pub retrieval_chain: RetrievalChainStrategy,
}

impl ApiState {
    pub async fn new(config: &AppConfig, storage: StorageManager) -> Result<Self, AppError> {
        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );
        db.ensure_initialized().await?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(config.openai_api_key.clone())
            .with_api_base(config.openai_base_url.clone());
        let openai_client = Arc::new(Client::with_config(openai_config));

        let embedding = EmbeddingProvider::from_config(config, openai_client.clone())?;
        let chat: Arc<dyn ChatService> = Arc::new(OpenAiChatService::new(
            openai_client,
            config.chat_model.clone(),
        ));

        let fast_path = FastPathStrategy::new(FastPathAnswerer::new(
            chat.clone(),
            embedding.clone(),
            config.chat_context_window,
        ));

        let index = VectorIndexManager::new((*db).clone(), embedding);
        let retrieval_chain = RetrievalChainStrategy::new(RetrievalAnswerChain::new(
            index,
            chat,
            config.retrieval_top_k,
        ));

        let cache = SessionCache::from_config(config).await?;
        let context = ConversationContextService::new(
            (*db).clone(),
            storage.clone(),
            cache,
            config.environment.clone(),
            config.session_ttl_seconds,
        );

        Ok(Self {
            db,
            config: config.clone(),
            storage,
            context,
            fast_path,
            retrieval_chain,
        })
    }
}
