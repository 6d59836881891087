//! Utilidades de test: modelo falso determinista y estado de aplicación en disco temporal.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    app_state::AppState,
    config::{AppConfig, LlmProvider},
    document_store::DocumentStore,
    llm::{CompletionRequest, LanguageModel, LlmManager},
    vector_store::LocalVectorStore,
};

const FAKE_DIMENSIONS: usize = 64;

/// Modelo sin red: embeddings de bolsa de palabras y completado que devuelve el prompt.
#[derive(Default)]
pub struct FakeModel {
    fail: AtomicBool,
    fail_chat: AtomicBool,
    embed_calls: AtomicUsize,
    complete_calls: AtomicUsize,
    last_request: Mutex<Option<CompletionRequest>>,
    gate: Mutex<Option<EmbedGate>>,
}

/// Retiene la siguiente llamada a `embed_texts` hasta que el test la libere.
#[derive(Clone, Default)]
pub struct EmbedGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl EmbedGate {
    /// Espera a que la llamada retenida haya empezado.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

impl FakeModel {
    pub fn failing() -> Self {
        let model = Self::default();
        model.set_failing(true);
        model
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Sólo falla el completado; los embeddings siguen funcionando.
    pub fn set_chat_failing(&self, fail: bool) {
        self.fail_chat.store(fail, Ordering::SeqCst);
    }

    /// La próxima llamada a `embed_texts` queda bloqueada en la puerta devuelta.
    pub fn hold_next_embedding(&self) -> EmbedGate {
        let gate = EmbedGate::default();
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().unwrap().clone()
    }

    fn embed_one(text: &str) -> Vec<f64> {
        let mut vector = vec![0.0; FAKE_DIMENSIONS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            // FNV-1a: estable entre ejecuciones.
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
            vector[(hash % FAKE_DIMENSIONS as u64) as usize] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("servicio de embeddings no disponible"));
        }
        Ok(texts.iter().map(|t| Self::embed_one(t)).collect())
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if self.fail.load(Ordering::SeqCst) || self.fail_chat.load(Ordering::SeqCst) {
            return Err(anyhow!("servicio de chat no disponible"));
        }
        Ok(format!("ECO: {}", request.prompt))
    }
}

pub fn test_config(root: &Path) -> AppConfig {
    AppConfig {
        server_addr: "127.0.0.1:0".to_string(),
        frontend_dir: root.join("frontend"),
        open_browser: false,
        llm_provider: LlmProvider::OpenAI,
        openai_api_key: "sk-test".to_string(),
        llm_embedding_model: "fake-embed".to_string(),
        llm_chat_model: "fake-chat".to_string(),
        upload_dir: root.join("uploads"),
        vector_db_path: root.join("vector_db"),
        max_upload_bytes: 1024 * 1024,
        index_sync: true,
        sentence_window: 2,
        rag_top_k: 4,
        rag_min_score: 0.0,
    }
}

/// Estado completo sobre un directorio temporal con el modelo falso dado.
pub async fn test_state(root: &Path, model: Arc<FakeModel>) -> AppState {
    state_with_config(test_config(root), model).await
}

pub async fn state_with_config(config: AppConfig, model: Arc<FakeModel>) -> AppState {
    let documents = DocumentStore::open(&config.upload_dir).await.unwrap();
    let vectors = LocalVectorStore::open(&config.vector_db_path).await.unwrap();

    AppState {
        config: Arc::new(config),
        documents: Arc::new(documents),
        vectors: Arc::new(vectors),
        llm_manager: LlmManager::with_model(model),
    }
}
