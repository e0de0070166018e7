use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};

use crate::{error::AppError, utils::config::AppConfig};

/// Text-embedding provider used for both passage indexing and fast-path
/// question scoring.
///
/// The `Hashed` backend is a deterministic, network-free stand-in used in
/// tests: it buckets tokens into a fixed-dimension L2-normalized vector, so
/// identical texts always embed identically.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimension: usize,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn new_openai(client: Arc<Client<OpenAIConfig>>, model: String, dimension: usize) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimension: dimension.max(1),
            },
        }
    }

    pub fn new_hashed(dimension: usize) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        }
    }

    /// Select the backend named in the configuration.
    pub fn from_config(config: &AppConfig, client: Arc<Client<OpenAIConfig>>) -> Result<Self, AppError> {
        match config.embedding_backend.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::new_openai(
                client,
                config.embedding_model.clone(),
                config.embedding_dimension,
            )),
            "hashed" => Ok(Self::new_hashed(config.embedding_dimension)),
            other => Err(AppError::Validation(format!(
                "unknown embedding backend '{other}'. Expected 'openai' or 'hashed'."
            ))),
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::OpenAI { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => *dimension,
            EmbeddingInner::OpenAI { dimension, .. } => *dimension,
        }
    }

    /// Identifier persisted next to every stored vector so reads can detect
    /// a model change.
    pub fn model_code(&self) -> String {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => format!("hashed-{dimension}"),
            EmbeddingInner::OpenAI { model, .. } => model.clone(),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimension,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input([text])
                    .build()
                    .map_err(|e| AppError::EmbeddingService(e.to_string()))?;

                let response = client
                    .embeddings()
                    .create(request)
                    .await
                    .map_err(|e| AppError::EmbeddingService(e.to_string()))?;

                let embedding = response
                    .data
                    .first()
                    .ok_or_else(|| {
                        AppError::EmbeddingService("no embedding data received".to_string())
                    })?
                    .embedding
                    .clone();

                check_dimension(embedding.len(), *dimension)?;
                Ok(embedding)
            }
        }
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .into_iter()
                .map(|text| hashed_embedding(&text, *dimension))
                .collect()),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimension,
            } => {
                if texts.is_empty() {
                    return Ok(Vec::new());
                }

                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .build()
                    .map_err(|e| AppError::EmbeddingService(e.to_string()))?;

                let response = client
                    .embeddings()
                    .create(request)
                    .await
                    .map_err(|e| AppError::EmbeddingService(e.to_string()))?;

                let embeddings: Vec<Vec<f32>> = response
                    .data
                    .into_iter()
                    .map(|item| item.embedding)
                    .collect();

                for embedding in &embeddings {
                    check_dimension(embedding.len(), *dimension)?;
                }
                Ok(embeddings)
            }
        }
    }
}

/// The configured dimension drives index definitions, so a vector of any
/// other length would poison the collection.
fn check_dimension(actual: usize, expected: usize) -> Result<(), AppError> {
    if actual == expected {
        Ok(())
    } else {
        Err(AppError::EmbeddingService(format!(
            "embedding has dimension {actual}, expected {expected}"
        )))
    }
}

// Helper functions for hashed embeddings
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    for token in tokens(text) {
        let idx = bucket(&token, dim);
        if let Some(slot) = vector.get_mut(idx) {
            *slot += 1.0;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}
