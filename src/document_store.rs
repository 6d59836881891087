//! Almacén de documentos subidos: ficheros en disco + registro persistido en
//! `documents.json` dentro del directorio de subidas.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Utc;
use mime_guess::MimeGuess;
use sha2::{Digest, Sha256};
use tokio::{fs, sync::Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Document, DocumentStatus},
};

const REGISTRY_FILE: &str = "documents.json";

/// Extensiones que sabemos convertir en texto.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "json", "log", "html", "htm", "rst", "pdf", "docx", "pptx",
    "xlsx", "xls",
];

pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

pub fn is_supported(filename: &str) -> bool {
    extension_of(filename)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Resultado de una subida.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub document: Document,
    /// Ya había un documento activo con el mismo contenido; no hay que indexar.
    pub duplicate: bool,
    /// Se reutilizó un registro fallido con el mismo contenido, de nuevo en `uploaded`.
    pub retried: bool,
}

pub struct DocumentStore {
    upload_dir: PathBuf,
    documents: Mutex<HashMap<String, Document>>,
}

impl DocumentStore {
    /// Abre (o crea) el directorio de subidas y carga el registro existente.
    pub async fn open(upload_dir: impl AsRef<Path>) -> Result<Self> {
        let upload_dir = upload_dir.as_ref().to_path_buf();
        fs::create_dir_all(&upload_dir)
            .await
            .with_context(|| format!("No se pudo crear {}", upload_dir.display()))?;

        let registry = upload_dir.join(REGISTRY_FILE);
        let documents: HashMap<String, Document> = match fs::read(&registry).await {
            Ok(raw) => {
                let list: Vec<Document> = serde_json::from_slice(&raw)
                    .with_context(|| format!("Registro corrupto: {}", registry.display()))?;
                list.into_iter().map(|d| (d.id.clone(), d)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e).with_context(|| format!("Error leyendo {}", registry.display())),
        };

        info!(
            "Almacén de documentos en {} ({} documentos registrados).",
            upload_dir.display(),
            documents.len()
        );
        Ok(Self {
            upload_dir,
            documents: Mutex::new(documents),
        })
    }

    pub fn file_path(&self, document: &Document) -> PathBuf {
        self.upload_dir.join(&document.stored_name)
    }

    /// Guarda el fichero y crea el registro con estado `uploaded`.
    ///
    /// Si ya hay un documento no fallido con el mismo contenido se devuelve ese.
    /// Si sólo hay uno fallido, se reutiliza su registro para reintentarlo.
    pub async fn create(&self, filename: &str, bytes: &[u8]) -> Result<UploadOutcome, AppError> {
        let filename = sanitize_filename(filename)
            .ok_or_else(|| AppError::BadRequest("El fichero no tiene nombre".to_string()))?;
        if !is_supported(&filename) {
            return Err(AppError::InvalidFormat(format!(
                "'{}' (extensiones admitidas: {})",
                filename,
                SUPPORTED_EXTENSIONS.join(", ")
            )));
        }
        if bytes.is_empty() {
            return Err(AppError::BadRequest(format!("El fichero '{filename}' está vacío")));
        }

        let content_hash = format!("{:x}", Sha256::digest(bytes));

        let mut documents = self.documents.lock().await;
        if let Some(existing) = documents
            .values()
            .find(|d| d.content_hash == content_hash && d.status != DocumentStatus::Failed)
        {
            info!(
                "'{}' tiene el mismo contenido que el documento {} ({}).",
                filename, existing.id, existing.filename
            );
            return Ok(UploadOutcome {
                document: existing.clone(),
                duplicate: true,
                retried: false,
            });
        }

        let failed = documents
            .values()
            .find(|d| d.content_hash == content_hash)
            .map(|d| (d.id.clone(), d.stored_name.clone()));
        if let Some((id, stored_name)) = failed {
            let path = self.upload_dir.join(&stored_name);
            fs::write(&path, bytes)
                .await
                .with_context(|| format!("No se pudo guardar {}", path.display()))?;

            let Some(document) = documents.get_mut(&id) else {
                return Err(AppError::NotFound(format!("documento {id}")));
            };
            document.status = DocumentStatus::Uploaded;
            document.error = None;
            document.summary = None;
            document.node_count = 0;
            let document = document.clone();
            self.persist(&documents).await?;

            info!(
                "'{}' reintenta el documento fallido {} ({}).",
                filename, document.id, document.filename
            );
            return Ok(UploadOutcome {
                document,
                duplicate: false,
                retried: true,
            });
        }

        let id = Uuid::new_v4().to_string();
        let stored_name = format!("{id}_{filename}");
        let path = self.upload_dir.join(&stored_name);
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("No se pudo guardar {}", path.display()))?;

        let document = Document {
            id: id.clone(),
            mime_type: MimeGuess::from_path(&filename).first().map(|m| m.to_string()),
            filename,
            stored_name,
            content_hash,
            size_bytes: bytes.len() as u64,
            status: DocumentStatus::Uploaded,
            summary: None,
            error: None,
            node_count: 0,
            uploaded_at: Utc::now(),
            indexed_at: None,
        };
        documents.insert(id, document.clone());

        if let Err(e) = self.persist(&documents).await {
            // Sin registro no debe quedar el fichero huérfano.
            documents.remove(&document.id);
            let _ = fs::remove_file(&path).await;
            return Err(e.into());
        }

        info!("Documento {} guardado en {}", document.id, path.display());
        Ok(UploadOutcome {
            document,
            duplicate: false,
            retried: false,
        })
    }

    /// Todos los documentos, del más antiguo al más reciente.
    pub async fn list(&self) -> Vec<Document> {
        let documents = self.documents.lock().await;
        let mut list: Vec<Document> = documents.values().cloned().collect();
        list.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub async fn get(&self, id: &str) -> Option<Document> {
        self.documents.lock().await.get(id).cloned()
    }

    /// Aplica `change` al documento y persiste el registro.
    pub async fn update<F>(&self, id: &str, change: F) -> Result<Option<Document>>
    where
        F: FnOnce(&mut Document),
    {
        let mut documents = self.documents.lock().await;
        let updated = match documents.get_mut(id) {
            Some(document) => {
                change(document);
                document.clone()
            }
            None => return Ok(None),
        };
        self.persist(&documents).await?;
        Ok(Some(updated))
    }

    /// Elimina el registro y el fichero original.
    pub async fn remove(&self, id: &str) -> Result<Option<Document>> {
        let mut documents = self.documents.lock().await;
        let Some(document) = documents.remove(id) else {
            return Ok(None);
        };
        self.persist(&documents).await?;
        drop(documents);

        let path = self.file_path(&document);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("El fichero {} ya no existía.", path.display());
            }
            Err(e) => return Err(e).with_context(|| format!("Error eliminando {}", path.display())),
        }
        Ok(Some(document))
    }

    async fn persist(&self, documents: &HashMap<String, Document>) -> Result<()> {
        let mut list: Vec<&Document> = documents.values().collect();
        list.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));

        let registry = self.upload_dir.join(REGISTRY_FILE);
        let tmp = registry.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&list)?).await?;
        fs::rename(&tmp, &registry).await?;
        Ok(())
    }
}

/// Se queda sólo con el nombre base, sin componentes de ruta.
fn sanitize_filename(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}
