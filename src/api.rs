use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    app_state::{lock_status, AppState, BusyGuard, Status},
    error::RagError,
    models::{CollectionStats, IndexingReport, Source},
};

/// Longitud máxima de una pregunta, en caracteres.
pub const MAX_QUESTION_CHARS: usize = 1000;
/// Longitud mínima del texto seleccionado, en caracteres.
pub const MIN_SELECTION_CHARS: usize = 10;

type ApiError = (StatusCode, Json<Value>);

// --- Payloads y respuestas ---

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    question: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatQueryWithSelection {
    question: String,
    selected_text: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    answer: String,
    sources: Vec<Source>,
    session_id: Option<String>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexingRequest {
    #[serde(default)]
    force_reindex: bool,
}

#[derive(Debug, Serialize)]
pub struct IndexingResponse {
    status: &'static str,
    documents_processed: usize,
    chunks_created: usize,
    files_skipped: usize,
    degraded_embeddings: usize,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    vector_store_connected: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CollectionInfoResponse {
    status: &'static str,
    collection: CollectionStats,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/chat/query", post(query_handler))
        .route("/chat/query-selection", post(query_selection_handler))
        .route("/chat/index", post(index_handler))
        .route("/chat/collection-info", get(collection_info_handler))
        .route("/api/status", get(status_handler))
        .with_state(app_state)
}

// --- Validación ---

fn validate_question(question: &str) -> Result<(), RagError> {
    if question.trim().is_empty() {
        return Err(RagError::Validation("la pregunta no puede estar vacía".into()));
    }
    let chars = question.chars().count();
    if chars > MAX_QUESTION_CHARS {
        return Err(RagError::Validation(format!(
            "la pregunta tiene {chars} caracteres (máximo {MAX_QUESTION_CHARS})"
        )));
    }
    Ok(())
}

fn validate_selection(selected_text: &str) -> Result<(), RagError> {
    if selected_text.chars().count() < MIN_SELECTION_CHARS {
        return Err(RagError::Validation(format!(
            "el texto seleccionado debe tener al menos {MIN_SELECTION_CHARS} caracteres"
        )));
    }
    Ok(())
}

fn error_response(err: RagError) -> ApiError {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    if status.is_server_error() {
        error!("{err}");
    } else {
        warn!("{err}");
    }
    (status, Json(json!({ "error": err.to_string() })))
}

fn question_preview(question: &str) -> String {
    question.chars().take(50).collect()
}

// --- Handlers ---

#[axum::debug_handler]
async fn root_handler() -> Json<Value> {
    Json(json!({
        "name": "Humanoid Robotics Book Chatbot API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "RAG-based chatbot for the Physical AI & Humanoid Robotics textbook",
        "health": "/health",
    }))
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = state.vector_index.connectivity_check().await;
    Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" },
        vector_store_connected: connected,
        timestamp: Utc::now(),
    })
}

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatQuery>,
) -> Result<Json<ChatResponse>, ApiError> {
    validate_question(&payload.question).map_err(error_response)?;
    info!("Consulta recibida: {}...", question_preview(&payload.question));

    let answer = state
        .pipeline
        .answer(&payload.question, None, None)
        .await
        .map_err(error_response)?;

    Ok(Json(ChatResponse {
        answer: answer.answer,
        sources: answer.sources,
        session_id: payload.session_id,
        timestamp: Utc::now(),
    }))
}

#[axum::debug_handler]
async fn query_selection_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatQueryWithSelection>,
) -> Result<Json<ChatResponse>, ApiError> {
    validate_question(&payload.question).map_err(error_response)?;
    validate_selection(&payload.selected_text).map_err(error_response)?;
    info!("Consulta sobre selección: {}...", question_preview(&payload.question));

    let answer = state
        .pipeline
        .answer_selection(&payload.question, &payload.selected_text)
        .await
        .map_err(error_response)?;

    Ok(Json(ChatResponse {
        answer: answer.answer,
        sources: answer.sources,
        session_id: payload.session_id,
        timestamp: Utc::now(),
    }))
}

/// Lanza la indexación en una tarea aparte y espera su resultado; el resto de
/// handlers siguen atendiendo mientras tanto. Sólo se admite una a la vez.
///
/// El estado lo actualiza la propia tarea: si el cliente se desconecta y este
/// handler se cancela, la indexación termina igualmente y libera `is_busy`.
#[axum::debug_handler]
async fn index_handler(
    State(state): State<AppState>,
    payload: Option<Json<IndexingRequest>>,
) -> Result<Json<IndexingResponse>, ApiError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();

    let guard = BusyGuard::acquire(&state.status, "Indexando documentos...").ok_or_else(|| {
        (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Ya hay una indexación en curso." })),
        )
    })?;

    let indexer = state.indexer.clone();
    let status = state.status.clone();
    let joined = tokio::spawn(async move {
        let result = indexer.run(request.force_reindex).await;
        record_outcome(&status, &result);
        drop(guard);
        result
    })
    .await;

    match joined {
        Ok(Ok(report)) => Ok(Json(IndexingResponse {
            status: "success",
            documents_processed: report.documents_processed,
            chunks_created: report.chunks_created,
            files_skipped: report.files_skipped,
            degraded_embeddings: report.degraded_embeddings,
            timestamp: Utc::now(),
        })),
        Ok(Err(err)) => Err(error_response(err)),
        Err(join_err) => {
            lock_status(&state.status).message =
                "La tarea de indexación terminó de forma inesperada.".to_string();
            error!("Tarea de indexación abortada: {join_err}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Tarea de indexación abortada: {join_err}") })),
            ))
        }
    }
}

fn record_outcome(status: &Mutex<Status>, result: &Result<IndexingReport, RagError>) {
    let mut status = lock_status(status);
    match result {
        Ok(report) => {
            status.message = format!("¡Indexación completada! {report}");
            status.last_report = Some(report.clone());
        }
        Err(err) => status.message = format!("Error en la indexación: {err}"),
    }
}

#[axum::debug_handler]
async fn collection_info_handler(
    State(state): State<AppState>,
) -> Result<Json<CollectionInfoResponse>, ApiError> {
    info!("Consultando estadísticas de '{}'", state.config.collection_name);
    let collection = state
        .vector_index
        .collection_stats()
        .await
        .map_err(error_response)?;
    Ok(Json(CollectionInfoResponse {
        status: "success",
        collection,
    }))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(lock_status(&state.status).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunker::Chunker,
        config::AppConfig,
        embedding::EmbeddingClient,
        ingest::IndexingPipeline,
        llm::LlmManager,
        rag::{RagPipeline, Retriever, NO_RELEVANT_INFORMATION},
        testing::{FakeEmbedder, InMemoryVectorIndex, RecordingGenerator},
    };
    use std::{
        collections::HashMap,
        path::Path,
        sync::{Arc, Mutex},
    };
    use tempfile::TempDir;

    fn config(docs: &Path) -> AppConfig {
        let vars: HashMap<&str, String> = [
            ("NEO4J_URI", "neo4j://localhost:7687".to_string()),
            ("NEO4J_USER", "neo4j".to_string()),
            ("NEO4J_PASSWORD", "secret".to_string()),
            ("GEMINI_API_KEY", "test-key".to_string()),
            ("BOOK_DOCS_PATH", docs.display().to_string()),
        ]
        .into_iter()
        .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    fn state(docs: &Path, generator: RecordingGenerator) -> AppState {
        let cfg = config(docs);
        let index = Arc::new(InMemoryVectorIndex::new());
        let embeddings = EmbeddingClient::new(Arc::new(FakeEmbedder::new(8)), 8);
        let retriever = Retriever::new(
            embeddings.clone(),
            index.clone(),
            cfg.top_k_results,
            cfg.similarity_threshold,
        );
        let pipeline = RagPipeline::new(retriever, LlmManager::new(Arc::new(generator)));
        let indexer = IndexingPipeline::new(
            cfg.book_docs_path.clone(),
            Chunker::new(cfg.chunk_size, cfg.chunk_overlap),
            embeddings,
            index.clone(),
        );
        AppState {
            config: cfg,
            pipeline: Arc::new(pipeline),
            indexer: Arc::new(indexer),
            vector_index: index,
            status: Arc::new(Mutex::new(Status::ready())),
        }
    }

    #[test]
    fn question_validation_limits() {
        assert!(validate_question("What is ROS 2?").is_ok());
        assert!(validate_question(&"á".repeat(MAX_QUESTION_CHARS)).is_ok());
        assert!(validate_question(&"a".repeat(MAX_QUESTION_CHARS + 1)).is_err());
        assert!(validate_question("").is_err());
        assert!(validate_question("   \n\t").is_err());
    }

    #[test]
    fn selection_validation_limits() {
        assert!(validate_selection("0123456789").is_ok());
        assert!(validate_selection("too short").is_err());
    }

    #[test]
    fn errors_map_to_status_codes() {
        let (code, body) = error_response(RagError::Validation("x".into()));
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(body.0["error"].as_str().unwrap().contains('x'));

        let (code, _) = error_response(RagError::Generation("down".into()));
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn query_echoes_session_and_returns_canned_answer_on_empty_index() {
        let tmp = TempDir::new().unwrap();
        let state = state(tmp.path(), RecordingGenerator::new("unused"));

        let Json(response) = query_handler(
            State(state),
            Json(ChatQuery {
                question: "What is a URDF file?".into(),
                session_id: Some("session-42".into()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.answer, NO_RELEVANT_INFORMATION);
        assert!(response.sources.is_empty());
        assert_eq!(response.session_id.as_deref(), Some("session-42"));
    }

    #[tokio::test]
    async fn invalid_query_is_rejected_with_400() {
        let tmp = TempDir::new().unwrap();
        let state = state(tmp.path(), RecordingGenerator::new("unused"));

        let (code, _) = query_handler(
            State(state),
            Json(ChatQuery {
                question: "   ".into(),
                session_id: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn selection_generation_failure_is_a_500() {
        let tmp = TempDir::new().unwrap();
        let state = state(tmp.path(), RecordingGenerator::failing());

        let (code, _) = query_selection_handler(
            State(state),
            Json(ChatQueryWithSelection {
                question: "Explain simply".into(),
                selected_text: "Nodes communicate through topics.".into(),
                session_id: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn indexing_updates_status_and_reports_counts() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("intro.md"), "# Intro\n\nHumanoid robots walk.").unwrap();
        let state = state(tmp.path(), RecordingGenerator::new("unused"));

        let Json(response) = index_handler(State(state.clone()), None).await.unwrap();
        assert_eq!(response.documents_processed, 1);
        assert_eq!(response.chunks_created, 1);

        let Json(status) = status_handler(State(state.clone())).await;
        assert!(!status.is_busy);
        assert_eq!(status.last_report.map(|r| r.chunks_created), Some(1));

        let Json(info) = collection_info_handler(State(state)).await.unwrap();
        assert_eq!(info.collection.points_count, 1);
    }

    #[tokio::test]
    async fn indexing_an_empty_tree_is_a_400_and_clears_busy_flag() {
        let tmp = TempDir::new().unwrap();
        let state = state(tmp.path(), RecordingGenerator::new("unused"));

        let (code, _) = index_handler(
            State(state.clone()),
            Some(Json(IndexingRequest { force_reindex: true })),
        )
        .await
        .unwrap_err();
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(!lock_status(&state.status).is_busy);
    }

    #[tokio::test]
    async fn cancelled_index_request_still_finishes_and_releases_busy_flag() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("intro.md"), "# Intro\n\nHumanoid robots walk.").unwrap();
        let state = state(tmp.path(), RecordingGenerator::new("unused"));

        // El cliente se desconecta: axum suelta el future tras el primer poll.
        let mut request = tokio_test::task::spawn(index_handler(State(state.clone()), None));
        tokio_test::assert_pending!(request.poll());
        assert!(lock_status(&state.status).is_busy);
        drop(request);

        for _ in 0..100 {
            if !lock_status(&state.status).is_busy {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let status = lock_status(&state.status).clone();
        assert!(!status.is_busy);
        assert_eq!(status.last_report.map(|r| r.chunks_created), Some(1));
        assert!(status.message.starts_with("¡Indexación completada!"));

        let next = index_handler(State(state), None).await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn concurrent_indexing_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let state = state(tmp.path(), RecordingGenerator::new("unused"));
        lock_status(&state.status).is_busy = true;

        let (code, _) = index_handler(State(state), None).await.unwrap_err();
        assert_eq!(code, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn health_reports_vector_store_connectivity() {
        let tmp = TempDir::new().unwrap();
        let state = state(tmp.path(), RecordingGenerator::new("unused"));
        assert!(state.vector_index.connectivity_check().await);

        let Json(health) = health_handler(State(state)).await;
        assert_eq!(health.status, "healthy");
        assert!(health.vector_store_connected);
    }
}
