//! Vector store local en disco para los nodos de cada documento.
//!
//! Cada documento tiene su propia colección (`doc_{id}`). Los nodos se
//! persisten como un fichero JSON dentro de `VECTOR_DB_PATH` y, al abrir el
//! store o al escribir una colección, se construye en memoria su índice HNSW
//! (`hnsw_rs`, distancia coseno). Las consultas recorren los índices de las
//! colecciones del ámbito y mezclan los resultados.
//!
//! API pública:
//!   - `VectorStore::upsert_collection` (reemplaza el contenido)
//!   - `VectorStore::query` (top-k sobre varias colecciones)
//!   - `VectorStore::delete_collection` / `list_collections`.

use std::{
    cmp::Ordering,
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::RwLock};
use tracing::{info, warn};

use crate::models::{ChunkNode, ScoredNode};

// Parámetros del grafo HNSW
const HNSW_MAX_CONNECTIONS: usize = 16;
const HNSW_MAX_LAYERS: usize = 16;
const HNSW_EF_CONSTRUCTION: usize = 200;
const HNSW_EF_SEARCH: usize = 64;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Sustituye el contenido de la colección por `nodes`. Devuelve el número de nodos guardados.
    async fn upsert_collection(&self, collection: &str, nodes: Vec<ChunkNode>) -> Result<usize>;

    /// Devuelve los `top_k` nodos más similares a `embedding` entre todas las colecciones dadas.
    async fn query(
        &self,
        collections: &[String],
        embedding: &[f64],
        top_k: usize,
    ) -> Result<Vec<ScoredNode>>;

    /// Elimina la colección. Devuelve `false` si no existía.
    async fn delete_collection(&self, collection: &str) -> Result<bool>;

    async fn list_collections(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectionFile {
    name: String,
    dimensions: usize,
    nodes: Vec<ChunkNode>,
}

/// Colección cargada: los nodos y el índice HNSW construido sobre sus embeddings.
struct Collection {
    dimensions: usize,
    nodes: Vec<ChunkNode>,
    index: Hnsw<'static, f32, DistCosine>,
}

impl Collection {
    fn build(name: &str, nodes: Vec<ChunkNode>) -> Result<Self> {
        let dimensions = nodes.first().map(|n| n.embedding.len()).unwrap_or(0);
        if let Some(bad) = nodes.iter().find(|n| n.embedding.len() != dimensions) {
            return Err(anyhow!(
                "Colección '{name}': el nodo {} tiene {} dimensiones, se esperaban {}",
                bad.id,
                bad.embedding.len(),
                dimensions
            ));
        }

        let index = Hnsw::new(
            HNSW_MAX_CONNECTIONS,
            nodes.len().max(1),
            HNSW_MAX_LAYERS,
            HNSW_EF_CONSTRUCTION,
            DistCosine {},
        );
        for (position, node) in nodes.iter().enumerate() {
            let vector = to_f32(&node.embedding);
            index.insert((&vector, position));
        }

        Ok(Self {
            dimensions,
            nodes,
            index,
        })
    }

    fn search(&self, query: &[f32], top_k: usize) -> Vec<ScoredNode> {
        let k = top_k.min(self.nodes.len());
        if k == 0 {
            return Vec::new();
        }
        self.index
            .search(query, k, HNSW_EF_SEARCH.max(k))
            .into_iter()
            .filter_map(|neighbour| {
                // DistCosine devuelve 1 - coseno.
                let score = (1.0 - f64::from(neighbour.distance)).clamp(-1.0, 1.0);
                self.nodes.get(neighbour.d_id).map(|node| ScoredNode {
                    score,
                    node: node.clone(),
                })
            })
            .collect()
    }
}

fn to_f32(vector: &[f64]) -> Vec<f32> {
    vector.iter().map(|x| *x as f32).collect()
}

/// Vector store persistido en el sistema de ficheros con índices HNSW en memoria.
pub struct LocalVectorStore {
    root: PathBuf,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl LocalVectorStore {
    /// Abre el directorio y reconstruye el índice de cada colección guardada.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("No se pudo crear el directorio {}", root.display()))?;

        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }

        let loaded = try_join_all(paths.into_iter().map(load_collection)).await?;
        let collections: HashMap<String, Arc<Collection>> = loaded
            .into_iter()
            .map(|(name, collection)| (name, Arc::new(collection)))
            .collect();

        info!(
            "Vector store local abierto en {} ({} colecciones).",
            root.display(),
            collections.len()
        );
        Ok(Self {
            root,
            collections: RwLock::new(collections),
        })
    }

    fn collection_path(&self, collection: &str) -> Result<PathBuf> {
        let valid = !collection.is_empty()
            && collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(anyhow!("Nombre de colección inválido: '{collection}'"));
        }
        Ok(self.root.join(format!("{collection}.json")))
    }
}

async fn load_collection(path: PathBuf) -> Result<(String, Collection)> {
    let raw = fs::read(&path)
        .await
        .with_context(|| format!("Error leyendo {}", path.display()))?;
    let file: CollectionFile = serde_json::from_slice(&raw)
        .with_context(|| format!("Colección corrupta: {}", path.display()))?;

    let name = file.name;
    let collection = tokio::task::spawn_blocking({
        let name = name.clone();
        move || Collection::build(&name, file.nodes)
    })
    .await
    .map_err(|e| anyhow!("La construcción del índice se interrumpió: {e}"))??;
    Ok((name, collection))
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn upsert_collection(&self, collection: &str, nodes: Vec<ChunkNode>) -> Result<usize> {
        let path = self.collection_path(collection)?;
        let file = CollectionFile {
            name: collection.to_string(),
            dimensions: nodes.first().map(|n| n.embedding.len()).unwrap_or(0),
            nodes,
        };
        let raw = serde_json::to_vec(&file)?;

        let built = tokio::task::spawn_blocking(move || Collection::build(&file.name, file.nodes))
            .await
            .map_err(|e| anyhow!("La construcción del índice se interrumpió: {e}"))??;
        let count = built.nodes.len();

        // El bloqueo de escritura cubre fichero y mapa: un borrado concurrente
        // de la misma colección no puede intercalarse entre ambos.
        let mut collections = self.collections.write().await;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw).await?;
        fs::rename(&tmp, &path).await?;
        collections.insert(collection.to_string(), Arc::new(built));

        info!("Colección '{collection}' guardada con {count} nodos.");
        Ok(count)
    }

    async fn query(
        &self,
        collections: &[String],
        embedding: &[f64],
        top_k: usize,
    ) -> Result<Vec<ScoredNode>> {
        if top_k == 0 || collections.is_empty() {
            return Ok(Vec::new());
        }

        let query = to_f32(embedding);
        let loaded = self.collections.read().await;

        let mut scored = Vec::new();
        for name in collections {
            let Some(collection) = loaded.get(name) else {
                continue;
            };
            if collection.nodes.is_empty() {
                continue;
            }
            if collection.dimensions != query.len() {
                warn!(
                    "Colección '{}' con {} dimensiones, la consulta tiene {}. Se omite.",
                    name,
                    collection.dimensions,
                    query.len()
                );
                continue;
            }
            scored.extend(collection.search(&query, top_k));
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_collection(&self, collection: &str) -> Result<bool> {
        let path = self.collection_path(collection)?;
        let mut collections = self.collections.write().await;

        let on_disk = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(e).with_context(|| format!("Error eliminando {}", path.display()))
            }
        };
        let in_memory = collections.remove(collection).is_some();

        if on_disk || in_memory {
            info!("Colección '{collection}' eliminada.");
        }
        Ok(on_disk || in_memory)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
