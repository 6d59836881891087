//! Indexación de documentos subidos: extracción de texto, nodos de ventana de
//! frases, embeddings y persistencia en el vector store.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{error, info, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::{
    app_state::AppState,
    error::AppError,
    extract::extract_text,
    models::{ChunkNode, Document, DocumentStatus},
};

/// Nodo antes de calcular su embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceWindow {
    pub sentence: String,
    pub window: String,
}

/// Divide el texto en frases (límites Unicode UAX #29).
///
/// Una línea en blanco separa párrafos; dentro de un párrafo los saltos de
/// línea cuentan como espacios.
pub fn split_into_sentences(text: &str) -> Vec<String> {
    paragraphs(text)
        .iter()
        .flat_map(|paragraph| {
            paragraph
                .split_sentence_bounds()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    // `lines()` también quita el `\r` de los finales CRLF.
    for line in text.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.extend(words);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs
}

/// Un nodo por frase; la ventana incluye `window_size` frases a cada lado.
pub fn build_sentence_windows(text: &str, window_size: usize) -> Vec<SentenceWindow> {
    let sentences = split_into_sentences(text);
    (0..sentences.len())
        .map(|i| {
            let start = i.saturating_sub(window_size);
            let end = (i + window_size + 1).min(sentences.len());
            SentenceWindow {
                sentence: sentences[i].clone(),
                window: sentences[start..end].join(" "),
            }
        })
        .collect()
}

/// Indexa el documento y actualiza su estado a `indexed` o `failed`.
///
/// Mientras dura la indexación el documento vuelve a `uploaded`, sin error ni
/// resumen previos.
pub async fn index_document(state: &AppState, id: &str) -> Result<Document, AppError> {
    let document = mark_pending(state, id).await?;

    info!("Indexando {} ({})...", document.filename, document.id);

    match build_index(state, &document).await {
        Ok((node_count, text)) => {
            let indexed = state
                .documents
                .update(id, |d| {
                    d.status = DocumentStatus::Indexed;
                    d.node_count = node_count;
                    d.error = None;
                    d.indexed_at = Some(Utc::now());
                })
                .await?
                .ok_or_else(|| AppError::NotFound(format!("documento {id}")))?;
            info!("Indexado {} con {} nodos.", indexed.filename, node_count);

            // El resumen es opcional: si falla, el documento sigue indexado.
            match state.llm_manager.summarize(&text).await {
                Ok(summary) => {
                    let with_summary = state
                        .documents
                        .update(id, |d| d.summary = Some(summary))
                        .await?;
                    Ok(with_summary.unwrap_or(indexed))
                }
                Err(e) => {
                    warn!("No se pudo generar el resumen de {}: {e}", indexed.filename);
                    Ok(indexed)
                }
            }
        }
        Err(err) => {
            error!("Error indexando {}: {err}", document.filename);
            let message = err.to_string();
            state
                .documents
                .update(id, |d| {
                    d.status = DocumentStatus::Failed;
                    d.error = Some(message);
                    d.summary = None;
                    d.node_count = 0;
                })
                .await?;
            Err(err)
        }
    }
}

async fn mark_pending(state: &AppState, id: &str) -> Result<Document, AppError> {
    state
        .documents
        .update(id, |d| {
            d.status = DocumentStatus::Uploaded;
            d.error = None;
            d.summary = None;
        })
        .await?
        .ok_or_else(|| AppError::NotFound(format!("documento {id}")))
}

/// Devuelve (nodos guardados, texto extraído).
async fn build_index(state: &AppState, document: &Document) -> Result<(usize, String), AppError> {
    let path = state.documents.file_path(document);
    let text = extract_text(&path)
        .await
        .map_err(|e| AppError::InvalidFormat(e.to_string()))?;

    let windows = build_sentence_windows(&text, state.config.sentence_window);
    if windows.is_empty() {
        return Err(AppError::InvalidFormat(format!(
            "No se pudo extraer contenido de '{}'",
            document.filename
        )));
    }

    let pairs: Vec<(String, String)> = windows
        .iter()
        .enumerate()
        .map(|(i, w)| (format!("{}-{i}", document.id), w.sentence.clone()))
        .collect();
    let embedded = state
        .llm_manager
        .embed_chunks(&pairs)
        .await
        .map_err(AppError::external)?;

    let nodes: Vec<ChunkNode> = embedded
        .into_iter()
        .zip(windows)
        .enumerate()
        .map(|(index, (emb, window))| ChunkNode {
            id: emb.id,
            document_id: document.id.clone(),
            index,
            source: document.filename.clone(),
            text: emb.text,
            window: window.window,
            embedding: emb.vector,
        })
        .collect();

    let collection = document.collection_name();
    let count = state
        .vectors
        .upsert_collection(&collection, nodes)
        .await
        .map_err(AppError::external)?;

    // `remove_document` borra el registro antes que la colección: si el
    // registro ya no está, la colección recién escrita no tiene dueño.
    if state.documents.get(&document.id).await.is_none() {
        warn!(
            "{} se eliminó durante la indexación; se descarta la colección '{collection}'.",
            document.filename
        );
        state
            .vectors
            .delete_collection(&collection)
            .await
            .map_err(AppError::external)?;
        return Err(AppError::NotFound(format!("documento {}", document.id)));
    }

    Ok((count, text))
}

/// Resumen del documento: el guardado o uno nuevo generado por el LLM.
pub async fn summarize_document(state: &AppState, id: &str) -> Result<Document, AppError> {
    let document = state
        .documents
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("documento {id}")))?;

    if document.status != DocumentStatus::Indexed {
        return Err(AppError::Conflict(format!(
            "el procesamiento de '{}' no ha terminado (estado: {:?})",
            document.filename, document.status
        )));
    }
    if document.summary.is_some() {
        return Ok(document);
    }

    let text = extract_text(&state.documents.file_path(&document)).await?;
    let summary = state
        .llm_manager
        .summarize(&text)
        .await
        .map_err(AppError::external)?;
    info!("Resumen generado para {}", document.filename);

    state
        .documents
        .update(id, |d| d.summary = Some(summary))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("documento {id}")))
}

/// Borra el registro, el fichero y la colección de vectores del documento.
pub async fn remove_document(state: &AppState, id: &str) -> Result<Document, AppError> {
    let removed = state
        .documents
        .remove(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("documento {id}")))?;

    // Si falla, la limpieza de arranque la recoge como colección huérfana.
    if let Err(e) = state
        .vectors
        .delete_collection(&removed.collection_name())
        .await
    {
        warn!("No se pudo borrar la colección de {}: {e:#}", removed.id);
    }

    info!("Documento {} ({}) eliminado.", removed.filename, removed.id);
    Ok(removed)
}

/// Reindexa un documento salvo que otro registro activo tenga el mismo contenido.
pub async fn reindex_document(state: &AppState, id: &str) -> Result<Option<Document>, AppError> {
    let document = state
        .documents
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("documento {id}")))?;

    let twin = state.documents.list().await.into_iter().find(|d| {
        d.id != document.id
            && d.content_hash == document.content_hash
            && d.status != DocumentStatus::Failed
    });
    if let Some(twin) = twin {
        return Err(AppError::Conflict(format!(
            "'{}' tiene el mismo contenido que el documento {} ({})",
            document.filename, twin.id, twin.filename
        )));
    }

    schedule_indexing(state, document.id).await
}

/// Lanza la indexación en segundo plano (o en línea si `INDEX_SYNC`).
pub async fn schedule_indexing(state: &AppState, id: String) -> Result<Option<Document>, AppError> {
    if state.config.index_sync {
        return match index_document(state, &id).await {
            Ok(document) => Ok(Some(document)),
            // El fallo ya quedó registrado en el documento.
            Err(AppError::NotFound(msg)) => Err(AppError::NotFound(msg)),
            Err(_) => Ok(state.documents.get(&id).await),
        };
    }

    // El estado pasa a `uploaded` antes de responder para que el cliente lo vea.
    mark_pending(state, &id).await?;

    spawn_indexing(state, id, "Indexación en segundo plano");
    Ok(None)
}

fn spawn_indexing(state: &AppState, id: String, label: &'static str) {
    let state = state.clone();
    tokio::spawn(async move {
        if let Err(err) = index_document(&state, &id).await {
            error!("{label} de {id} fallida: {err}");
        }
    });
}

/// Reanuda la indexación de los documentos que quedaron a medias en un reinicio.
pub async fn requeue_pending(state: &AppState) -> usize {
    let pending: Vec<String> = state
        .documents
        .list()
        .await
        .into_iter()
        .filter(|d| d.status == DocumentStatus::Uploaded)
        .map(|d| d.id)
        .collect();

    if !pending.is_empty() {
        info!("Reanudando la indexación de {} documentos pendientes.", pending.len());
    }
    let count = pending.len();
    for id in pending {
        spawn_indexing(state, id, "Reindexación");
    }
    count
}

/// Elimina las colecciones que no corresponden a ningún documento registrado.
pub async fn cleanup_orphan_collections(state: &AppState) -> Result<usize, AppError> {
    let known: HashSet<String> = state
        .documents
        .list()
        .await
        .iter()
        .map(Document::collection_name)
        .collect();

    let mut removed = 0;
    for name in state
        .vectors
        .list_collections()
        .await
        .map_err(AppError::external)?
    {
        if known.contains(&name) {
            continue;
        }
        warn!("Colección huérfana '{name}' sin documento registrado; se elimina.");
        if state
            .vectors
            .delete_collection(&name)
            .await
            .map_err(AppError::external)?
        {
            removed += 1;
        }
    }
    Ok(removed)
}
