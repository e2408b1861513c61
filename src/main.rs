// Módulos de la aplicación
mod api;
mod app_state;
mod chunker;
mod config;
mod content_parser;
mod embedding;
mod error;
mod ingest;
mod llm;
mod models;
mod neo4j_client;
mod rag;
mod vector_store;

#[cfg(test)]
mod testing;

use crate::app_state::{AppState, Status};
use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use std::sync::{Arc, Mutex};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;
    info!("Iniciando Humanoid Robotics Book Chatbot API...");

    // 3. Conectar a Neo4j y preparar el índice vectorial
    let graph = Arc::new(neo4j_client::connect_from_config(&cfg).await?);
    let vector_index: Arc<dyn vector_store::VectorIndex> = Arc::new(
        vector_store::Neo4jVectorIndex::new(graph, &cfg.collection_name, cfg.embedding_dimension)
            .context("Error creando el índice vectorial")?,
    );
    if vector_index.connectivity_check().await {
        info!("✓ Conexión con el vector store correcta");
    } else {
        warn!("✗ Falló la conexión con el vector store");
    }

    // 4. Servicios de embeddings y generación
    let embeddings = embedding::EmbeddingClient::new(
        llm::embedding_service_from_config(&cfg),
        cfg.embedding_dimension,
    );
    let llm_manager = llm::LlmManager::from_config(&cfg);

    // 5. Pipelines de consulta e indexación
    let retriever = rag::Retriever::new(
        embeddings.clone(),
        vector_index.clone(),
        cfg.top_k_results,
        cfg.similarity_threshold,
    );
    let pipeline = rag::RagPipeline::new(retriever, llm_manager);
    let indexer = ingest::IndexingPipeline::new(
        cfg.book_docs_path.clone(),
        chunker::Chunker::new(cfg.chunk_size, cfg.chunk_overlap),
        embeddings,
        vector_index.clone(),
    );

    // 6. Estado compartido y router
    let app_state = AppState {
        config: cfg.clone(),
        pipeline: Arc::new(pipeline),
        indexer: Arc::new(indexer),
        vector_index,
        status: Arc::new(Mutex::new(Status::ready())),
    };

    let app = api::create_router(app_state)
        .layer(cors_layer(&cfg.cors_origins))
        .layer(TraceLayer::new_for_http());

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo abrir {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}

/// CORS con los orígenes configurados; los que no son cabeceras válidas se ignoran.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Origen CORS no válido, se ignora: {origin}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}
