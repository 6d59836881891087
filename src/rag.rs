//! Consulta RAG sobre los documentos indexados.
//!
//! Flujo:
//!   1. Se calcula el ámbito: documentos `indexed`, opcionalmente filtrados.
//!   2. Embedding de la pregunta y búsqueda top-k en sus colecciones.
//!   3. El contexto se construye con las ventanas de frases recuperadas.
//!   4. El LLM responde y se devuelven los fragmentos citados con su puntuación.

use std::collections::HashSet;

use tracing::info;

use crate::{
    app_state::AppState,
    error::AppError,
    models::{AskResponse, DocumentStatus, SourceSnippet},
};

pub const NO_DOCUMENTS_ANSWER: &str =
    "Todavía no hay documentos indexados sobre los que responder.";
pub const NO_RELEVANT_CONTENT_ANSWER: &str =
    "No se encontró información relevante en los documentos para responder a esta pregunta.";

/// Lanza una consulta RAG restringida a `scope` (todos los documentos si es `None`).
pub async fn rag_query(
    state: &AppState,
    question: &str,
    scope: Option<&[String]>,
    top_k: usize,
) -> Result<AskResponse, AppError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(AppError::BadRequest("La pregunta está vacía".to_string()));
    }
    if top_k == 0 {
        return Err(AppError::BadRequest("top_k debe ser mayor que 0".to_string()));
    }

    // 1) Colecciones del ámbito
    let filter: Option<HashSet<&str>> = scope.map(|ids| ids.iter().map(String::as_str).collect());
    let collections: Vec<String> = state
        .documents
        .list()
        .await
        .into_iter()
        .filter(|d| d.status == DocumentStatus::Indexed)
        .filter(|d| filter.as_ref().map_or(true, |f| f.contains(d.id.as_str())))
        .map(|d| d.collection_name())
        .collect();

    if collections.is_empty() {
        info!("Pregunta sin documentos indexados en el ámbito: {question}");
        return Ok(empty_response(NO_DOCUMENTS_ANSWER));
    }

    // 2) Búsqueda vectorial
    let query_vec = state
        .llm_manager
        .embed_query(question)
        .await
        .map_err(AppError::external)?;
    let results = state
        .vectors
        .query(&collections, &query_vec, top_k)
        .await
        .map_err(AppError::external)?;

    let min_score = state.config.rag_min_score;
    let results: Vec<_> = results.into_iter().filter(|r| r.score >= min_score).collect();
    info!(
        "Recuperados {} nodos de {} colecciones para: {question}",
        results.len(),
        collections.len()
    );

    if results.is_empty() {
        return Ok(empty_response(NO_RELEVANT_CONTENT_ANSWER));
    }

    // 3) Contexto con las ventanas, sin repetir las que se solapan por completo
    let mut seen = HashSet::new();
    let windows: Vec<&str> = results
        .iter()
        .map(|r| r.node.window.as_str())
        .filter(|w| seen.insert(*w))
        .collect();
    let context = windows.join("\n\n---\n\n");

    // 4) Respuesta del LLM
    let answer = state
        .llm_manager
        .answer_with_context(question, &context)
        .await
        .map_err(AppError::external)?;

    let sources = results
        .into_iter()
        .map(|r| SourceSnippet {
            document_id: r.node.document_id,
            source: r.node.source,
            text: r.node.text,
            score: r.score,
        })
        .collect();

    Ok(AskResponse { answer, sources })
}

fn empty_response(answer: &str) -> AskResponse {
    AskResponse {
        answer: answer.to_string(),
        sources: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{index_document, remove_document};
    use crate::testing::{test_state, FakeModel};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn upload_and_index(state: &AppState, name: &str, content: &str) -> String {
        let doc = state
            .documents
            .create(name, content.as_bytes())
            .await
            .unwrap()
            .document;
        index_document(state, &doc.id).await.unwrap();
        doc.id
    }

    #[tokio::test]
    async fn answers_from_uploaded_notes() {
        let dir = TempDir::new().unwrap();
        let state = test_state(dir.path(), Arc::new(FakeModel::default())).await;
        let id = upload_and_index(&state, "notes.txt", "The sky is blue.").await;

        let response = rag_query(&state, "What color is the sky?", None, 4)
            .await
            .unwrap();

        assert!(response.answer.contains("blue"));
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].document_id, id);
        assert_eq!(response.sources[0].source, "notes.txt");
        assert_eq!(response.sources[0].text, "The sky is blue.");
        assert!(response.sources[0].score > 0.3);
    }

    #[tokio::test]
    async fn empty_scope_returns_explicit_answer_without_calling_the_llm() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(FakeModel::failing());
        let state = test_state(dir.path(), model.clone()).await;

        let response = rag_query(&state, "¿Hay algo?", None, 4).await.unwrap();
        assert_eq!(response.answer, NO_DOCUMENTS_ANSWER);
        assert!(response.sources.is_empty());

        // Un documento subido pero no indexado tampoco entra en el ámbito.
        state.documents.create("pendiente.txt", b"Texto.").await.unwrap();
        let response = rag_query(&state, "¿Hay algo?", None, 4).await.unwrap();
        assert_eq!(response.answer, NO_DOCUMENTS_ANSWER);
        assert_eq!(model.embed_calls(), 0);
        assert_eq!(model.complete_calls(), 0);
    }

    #[tokio::test]
    async fn scores_below_threshold_yield_no_relevant_content() {
        let dir = TempDir::new().unwrap();
        let state = test_state(dir.path(), Arc::new(FakeModel::default())).await;
        upload_and_index(&state, "notes.txt", "The sky is blue.").await;

        let mut config = (*state.config).clone();
        config.rag_min_score = 1.1;
        let strict = AppState {
            config: Arc::new(config),
            ..state.clone()
        };

        let response = rag_query(&strict, "What color is the sky?", None, 4)
            .await
            .unwrap();
        assert_eq!(response.answer, NO_RELEVANT_CONTENT_ANSWER);
        assert!(response.sources.is_empty());
    }

    #[tokio::test]
    async fn scope_restricts_sources_and_deleted_documents_are_unreachable() {
        let dir = TempDir::new().unwrap();
        let state = test_state(dir.path(), Arc::new(FakeModel::default())).await;
        let sky = upload_and_index(&state, "sky.txt", "The sky is blue.").await;
        let grass = upload_and_index(&state, "grass.txt", "The grass is green.").await;

        let scoped = rag_query(&state, "What color is it?", Some(&[grass.clone()]), 4)
            .await
            .unwrap();
        assert!(scoped.sources.iter().all(|s| s.document_id == grass));

        let unknown = rag_query(&state, "What color?", Some(&["nada".to_string()]), 4)
            .await
            .unwrap();
        assert_eq!(unknown.answer, NO_DOCUMENTS_ANSWER);

        remove_document(&state, &sky).await.unwrap();
        let after = rag_query(&state, "What color is the sky?", None, 4)
            .await
            .unwrap();
        assert!(after.sources.iter().all(|s| s.document_id != sky));
        assert!(!after.sources.is_empty());
    }

    #[tokio::test]
    async fn reindexing_does_not_duplicate_sources() {
        let dir = TempDir::new().unwrap();
        let state = test_state(dir.path(), Arc::new(FakeModel::default())).await;
        let id = upload_and_index(&state, "notes.txt", "The sky is blue. Clouds are white.").await;

        index_document(&state, &id).await.unwrap();
        // Re-subir el mismo contenido devuelve el documento existente.
        let again = state
            .documents
            .create("copia.txt", b"The sky is blue. Clouds are white.")
            .await
            .unwrap();
        assert!(again.duplicate);

        let response = rag_query(&state, "What color is the sky?", None, 10)
            .await
            .unwrap();
        assert_eq!(response.sources.len(), 2);
        assert!(response.sources[0].score >= response.sources[1].score);
    }

    #[tokio::test]
    async fn llm_failure_is_an_external_service_error() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(FakeModel::default());
        let state = test_state(dir.path(), model.clone()).await;
        upload_and_index(&state, "notes.txt", "The sky is blue.").await;

        model.set_chat_failing(true);
        let err = rag_query(&state, "What color is the sky?", None, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalService(_)));

        model.set_failing(true);
        let err = rag_query(&state, "What color is the sky?", None, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalService(_)));
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let dir = TempDir::new().unwrap();
        let state = test_state(dir.path(), Arc::new(FakeModel::default())).await;
        assert!(matches!(
            rag_query(&state, "   ", None, 4).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
