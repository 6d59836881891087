//! Errores de la capa de servicio y su traducción a respuestas HTTP.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Formato de fichero no soportado: {0}")]
    InvalidFormat(String),

    #[error("Petición inválida: {0}")]
    BadRequest(String),

    #[error("No encontrado: {0}")]
    NotFound(String),

    #[error("Estado no válido: {0}")]
    Conflict(String),

    #[error("Fichero demasiado grande: {0}")]
    PayloadTooLarge(String),

    #[error("Error del servicio externo: {0}")]
    ExternalService(String),

    #[error("Error interno: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Envuelve un fallo del LLM o del vector store.
    pub fn external(err: impl std::fmt::Display) -> Self {
        Self::ExternalService(err.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
