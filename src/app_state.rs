use std::sync::Arc;

use crate::{
    config::AppConfig, document_store::DocumentStore, llm::LlmManager, vector_store::VectorStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub documents: Arc<DocumentStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub llm_manager: LlmManager,
}
