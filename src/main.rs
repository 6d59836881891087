// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod document_store;
mod error;
mod extract;
mod ingest;
mod llm;
mod models;
mod rag;
#[cfg(test)]
mod testing;
mod vector_store;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{app_state::AppState, document_store::DocumentStore, vector_store::LocalVectorStore};

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        error!("El servidor terminó con error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Abrir almacén de documentos y vector store
    let documents = DocumentStore::open(&cfg.upload_dir)
        .await
        .context("Error abriendo el almacén de documentos")?;
    let vectors = LocalVectorStore::open(&cfg.vector_db_path)
        .await
        .context("Error abriendo el vector store")?;

    // 4. Inicializar gestor de LLMs
    let llm_manager = llm::LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?;

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: Arc::new(cfg),
        documents: Arc::new(documents),
        vectors: Arc::new(vectors),
        llm_manager,
    };

    // Colecciones sin documento (p. ej. un borrado que no terminó) y
    // documentos cuya indexación quedó a medias.
    match ingest::cleanup_orphan_collections(&app_state).await {
        Ok(0) => {}
        Ok(removed) => info!("Eliminadas {removed} colecciones huérfanas."),
        Err(err) => warn!("No se pudieron revisar las colecciones huérfanas: {err}"),
    }
    ingest::requeue_pending(&app_state).await;

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let frontend_dir = app_state.config.frontend_dir.clone();
    if !frontend_dir.is_dir() {
        warn!("No existe el directorio del frontend: {}", frontend_dir.display());
    }
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new(frontend_dir))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    let server_url = format!("http://{}", listener.local_addr()?);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if app_state.config.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("No se pudo instalar el manejador de Ctrl+C: {err}");
        std::future::pending::<()>().await;
    }
    info!("Señal de apagado recibida, iniciando cierre del servidor.");
}
