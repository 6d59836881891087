use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Json, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    app_state::AppState,
    error::AppError,
    ingest,
    models::{AskResponse, Document},
    rag,
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct AskPayload {
    question: String,
    #[serde(default)]
    document_ids: Option<Vec<String>>,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    document: Document,
    duplicate: bool,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    document_id: String,
    filename: String,
    summary: Option<String>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    let upload_limit = app_state.config.max_upload_bytes;

    Router::new()
        .route("/api/health", get(health_handler))
        .route(
            "/api/documents",
            get(list_documents_handler)
                .post(upload_handler)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/documents/:id",
            get(get_document_handler).delete(delete_document_handler),
        )
        .route("/api/documents/:id/reindex", post(reindex_handler))
        .route("/api/documents/:id/summary", get(summary_handler))
        .route("/api/ask", post(ask_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(multipart_error)?;
        info!("Subida recibida: {} ({} bytes)", filename, data.len());

        let outcome = state.documents.create(&filename, &data).await?;
        if outcome.duplicate {
            return Ok((
                StatusCode::OK,
                Json(UploadResponse {
                    document: outcome.document,
                    duplicate: true,
                }),
            ));
        }

        let document = ingest::schedule_indexing(&state, outcome.document.id.clone())
            .await?
            .unwrap_or(outcome.document);
        // Un registro fallido reutilizado no es un documento nuevo.
        let status = if outcome.retried {
            StatusCode::OK
        } else {
            StatusCode::CREATED
        };

        return Ok((
            status,
            Json(UploadResponse {
                document,
                duplicate: false,
            }),
        ));
    }

    Err(AppError::BadRequest(
        "Falta el campo 'file' en el formulario".to_string(),
    ))
}

/// Respeta el 413 que produce `DefaultBodyLimit`; el resto es un 400.
fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(err.body_text())
    } else {
        AppError::BadRequest(format!("Multipart inválido: {}", err.body_text()))
    }
}

#[axum::debug_handler]
async fn list_documents_handler(State(state): State<AppState>) -> Json<Vec<Document>> {
    Json(state.documents.list().await)
}

#[axum::debug_handler]
async fn get_document_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    state
        .documents
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("documento {id}")))
}

#[axum::debug_handler]
async fn delete_document_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    ingest::remove_document(&state, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn reindex_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    match ingest::reindex_document(&state, &id).await? {
        Some(document) => Ok((StatusCode::OK, Json(document))),
        None => {
            // En segundo plano: se devuelve el registro ya en `uploaded`.
            let current = state
                .documents
                .get(&id)
                .await
                .ok_or_else(|| AppError::NotFound(format!("documento {id}")))?;
            Ok((StatusCode::ACCEPTED, Json(current)))
        }
    }
}

#[axum::debug_handler]
async fn summary_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SummaryResponse>, AppError> {
    let document = ingest::summarize_document(&state, &id).await?;
    Ok(Json(SummaryResponse {
        document_id: document.id,
        filename: document.filename,
        summary: document.summary,
    }))
}

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> Result<Json<AskResponse>, AppError> {
    let started = std::time::Instant::now();
    let top_k = payload.top_k.unwrap_or(state.config.rag_top_k);

    let response = rag::rag_query(
        &state,
        &payload.question,
        payload.document_ids.as_deref(),
        top_k,
    )
    .await?;

    info!(
        "Pregunta respondida en {:.2}s con {} fuentes.",
        started.elapsed().as_secs_f64(),
        response.sources.len()
    );
    Ok(Json(response))
}
