//! Abstracción sobre Rig para embeddings y chat.
//! El proveedor de producción es OpenAI; el trait `LanguageModel` permite
//! sustituirlo (por ejemplo, en los tests).

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel;

use crate::config::{AppConfig, LlmProvider};

/// Tamaño máximo de lote para las peticiones de embeddings.
const EMBED_BATCH_SIZE: usize = 96;

/// Caracteres del documento que se envían para generar el resumen.
pub const SUMMARY_INPUT_CHARS: usize = 4000;

/// Resultado de un embedding de un chunk.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub id: String,
    pub text: String,
    pub vector: Vec<f64>,
}

/// Petición de completado: preámbulo de sistema + prompt del usuario.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub preamble: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: Option<u64>,
}

/// Operaciones mínimas que necesitamos de un proveedor de modelos.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>>;

    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Cliente OpenAI de Rig.
#[derive(Clone)]
pub struct OpenAiModel {
    client: rig::providers::openai::Client,
    embedding_model: String,
    chat_model: String,
}

impl OpenAiModel {
    pub fn new(api_key: &str, embedding_model: &str, chat_model: &str) -> Self {
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};

        let embedding_model = if embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            embedding_model
        };
        let chat_model = if chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            chat_model
        };

        Self {
            client: openai::Client::new(api_key),
            embedding_model: embedding_model.to_string(),
            chat_model: chat_model.to_string(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let model = self.client.embedding_model(&self.embedding_model);
        let embeddings = model.embed_texts(texts).await?;
        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let mut builder = self
            .client
            .agent(&self.chat_model)
            .preamble(&request.preamble)
            .temperature(request.temperature);
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        let agent = builder.build();

        let answer = agent.prompt(request.prompt.as_str()).await?;
        Ok(answer)
    }
}

/// Gestor de LLMs y embeddings con los prompts de la aplicación.
#[derive(Clone)]
pub struct LlmManager {
    model: Arc<dyn LanguageModel>,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let model: Arc<dyn LanguageModel> = match cfg.llm_provider {
            LlmProvider::OpenAI => Arc::new(OpenAiModel::new(
                &cfg.openai_api_key,
                &cfg.llm_embedding_model,
                &cfg.llm_chat_model,
            )),
        };
        Ok(Self { model })
    }

    pub fn with_model(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    /// Calcula embeddings para una lista de (id, texto), en lotes.
    pub async fn embed_chunks(&self, chunks: &[(String, String)]) -> Result<Vec<EmbeddedChunk>> {
        let mut result = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let vectors = self.model.embed_texts(texts).await?;

            if vectors.len() != batch.len() {
                return Err(anyhow!(
                    "Número de embeddings ({}) distinto al número de chunks ({})",
                    vectors.len(),
                    batch.len()
                ));
            }

            for ((id, text), vector) in batch.iter().zip(vectors) {
                result.push(EmbeddedChunk {
                    id: id.clone(),
                    text: text.clone(),
                    vector,
                });
            }
        }

        Ok(result)
    }

    pub async fn embed_query(&self, question: &str) -> Result<Vec<f64>> {
        self.model
            .embed_texts(vec![question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No se pudo generar embedding de la pregunta"))
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    /// Genera una respuesta a partir de una pregunta y un contexto
    /// (concatenación de ventanas relevantes).
    pub async fn answer_with_context(&self, question: &str, context: &str) -> Result<String> {
        const SYSTEM_PROMPT: &str = "You are a helpful assistant that provides accurate information based on the context. \
Answer in the same language as the question. \
If the context does not contain the answer, say so explicitly.";

        let prompt = format!(
            "Context information is below.\n\
             ---------------------\n\
             {context}\n\
             ---------------------\n\
             Given the context information and not prior knowledge, answer the question: {question}"
        );

        let answer = self
            .model
            .complete(CompletionRequest {
                preamble: SYSTEM_PROMPT.to_string(),
                prompt,
                temperature: 0.1,
                max_tokens: None,
            })
            .await?;
        Ok(answer.trim().to_string())
    }

    /// Resume los primeros `SUMMARY_INPUT_CHARS` caracteres del documento.
    pub async fn summarize(&self, text: &str) -> Result<String> {
        const SUMMARY_PROMPT: &str = "You are an expert summarizer. Create a concise summary that captures the key information in the document. \
Focus on the main topics, key findings, and important details.";

        let excerpt: String = text.chars().take(SUMMARY_INPUT_CHARS).collect();
        let summary = self
            .model
            .complete(CompletionRequest {
                preamble: SUMMARY_PROMPT.to_string(),
                prompt: format!("Please summarize the following document in 4-5 sentences:\n\n{excerpt}"),
                temperature: 0.3,
                max_tokens: Some(250),
            })
            .await?;
        Ok(summary.trim().to_string())
    }
}
