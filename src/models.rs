//! Modelos de dominio (documentos subidos, nodos indexados y resultados de consulta).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Estado de procesamiento de un documento.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Indexed,
    Failed,
}

/// Registro de un fichero subido por el usuario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    /// Nombre del fichero en el directorio de subidas (`{id}_{filename}`).
    pub stored_name: String,
    pub content_hash: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    pub status: DocumentStatus,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub node_count: usize,
    pub uploaded_at: DateTime<Utc>,
    pub indexed_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Nombre de la colección del vector store asociada al documento.
    pub fn collection_name(&self) -> String {
        collection_name(&self.id)
    }
}

pub fn collection_name(document_id: &str) -> String {
    format!("doc_{document_id}")
}

/// Nodo recuperable: una frase del documento con su ventana de contexto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkNode {
    pub id: String,
    pub document_id: String,
    pub index: usize,
    pub source: String,
    pub text: String,
    pub window: String,
    pub embedding: Vec<f64>,
}

/// Nodo devuelto por una búsqueda junto con su similitud coseno.
#[derive(Debug, Clone)]
pub struct ScoredNode {
    pub score: f64,
    pub node: ChunkNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSnippet {
    pub document_id: String,
    pub source: String,
    pub text: String,
    pub score: f64,
}

/// Respuesta a una pregunta: texto generado y fragmentos citados.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<SourceSnippet>,
}
