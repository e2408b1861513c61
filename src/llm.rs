//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//!
//! - `RigEmbedder`: embeddings (documento / consulta) sobre cualquier
//!   `EmbeddingModel` de Rig.
//! - `GeminiEmbedder`: llamada directa a `embedContent` con `taskType`, que
//!   Rig no expone.
//! - `RigGenerator`: generación de texto de un solo disparo.
//! - `LlmManager`: construcción de prompts para el asistente del libro.

use async_trait::async_trait;
use rig::agent::Agent;
use rig::client::{CompletionClient as _, EmbeddingsClient as _};
use rig::completion::{CompletionModel, Prompt};
use rig::embeddings::EmbeddingModel;
use rig::providers::{gemini, ollama, openai};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{AppConfig, LlmProvider};
use crate::embedding::{EmbedMode, EmbeddingService};
use crate::error::{RagError, Result};
use crate::models::Embedding;

/// Servicio externo de generación: `prompt -> texto`, sin streaming.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

// ---------------------------------------------------------------------
// EMBEDDINGS
// ---------------------------------------------------------------------

/// Adaptador de un modelo de embeddings de Rig. Los modelos asimétricos se
/// expresan con un prefijo distinto por modo (p. ej. `search_query: `).
pub struct RigEmbedder<M> {
    model: M,
    document_prefix: String,
    query_prefix: String,
}

impl<M> RigEmbedder<M> {
    pub fn new(model: M, document_prefix: String, query_prefix: String) -> Self {
        Self {
            model,
            document_prefix,
            query_prefix,
        }
    }
}

#[async_trait]
impl<M> EmbeddingService for RigEmbedder<M>
where
    M: EmbeddingModel + 'static,
{
    async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Embedding> {
        let prefix = match mode {
            EmbedMode::Document => &self.document_prefix,
            EmbedMode::Query => &self.query_prefix,
        };
        let input = format!("{prefix}{text}");

        let embedding = self
            .model
            .embed_text(&input)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;
        Ok(embedding.vec)
    }
}

/// Valor de `taskType` de Gemini para cada modo de embedding.
fn gemini_task_type(mode: EmbedMode) -> &'static str {
    match mode {
        EmbedMode::Document => "RETRIEVAL_DOCUMENT",
        EmbedMode::Query => "RETRIEVAL_QUERY",
    }
}

/// Cuerpo de `models/{model}:embedContent`.
fn gemini_embed_request(model: &str, text: &str, mode: EmbedMode, dimension: usize) -> Value {
    json!({
        "model": format!("models/{model}"),
        "content": { "parts": [{ "text": text }] },
        "taskType": gemini_task_type(mode),
        "outputDimensionality": dimension,
    })
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedResponse {
    embedding: GeminiEmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbeddingValues {
    values: Vec<f64>,
}

/// Embeddings de Gemini con `taskType` por modo (`RETRIEVAL_DOCUMENT` /
/// `RETRIEVAL_QUERY`). Los prefijos configurados se siguen aplicando.
pub struct GeminiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    document_prefix: String,
    query_prefix: String,
}

impl GeminiEmbedder {
    pub fn new(base_url: &str, api_key: String, model: &str, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            dimension,
            document_prefix: String::new(),
            query_prefix: String::new(),
        }
    }

    pub fn with_prefixes(mut self, document_prefix: String, query_prefix: String) -> Self {
        self.document_prefix = document_prefix;
        self.query_prefix = query_prefix;
        self
    }
}

#[async_trait]
impl EmbeddingService for GeminiEmbedder {
    async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Embedding> {
        let prefix = match mode {
            EmbedMode::Document => &self.document_prefix,
            EmbedMode::Query => &self.query_prefix,
        };
        let input = format!("{prefix}{text}");
        let request = gemini_embed_request(&self.model, &input, mode, self.dimension);

        let url = format!("{}/v1beta/models/{}:embedContent", self.base_url, self.model);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("petición a Gemini fallida: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!("Gemini respondió {status}: {body}")));
        }

        let parsed: GeminiEmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("respuesta de Gemini no válida: {e}")))?;
        Ok(parsed.embedding.values)
    }
}

/// Crea el servicio de embeddings del proveedor configurado.
pub fn embedding_service_from_config(cfg: &AppConfig) -> Arc<dyn EmbeddingService> {
    let model = cfg.llm_embedding_model.as_str();
    let document_prefix = cfg.embedding_document_prefix.clone();
    let query_prefix = cfg.embedding_query_prefix.clone();

    info!("Modelo de embeddings: {:?}/{}", cfg.llm_provider, model);
    match cfg.llm_provider {
        LlmProvider::OpenAI => {
            let client = openai::Client::from_env();
            Arc::new(RigEmbedder::new(client.embedding_model(model), document_prefix, query_prefix))
        }
        LlmProvider::Gemini => Arc::new(
            GeminiEmbedder::new(
                &cfg.gemini_api_base_url,
                cfg.gemini_api_key.clone().unwrap_or_default(),
                model,
                cfg.embedding_dimension,
            )
            .with_prefixes(document_prefix, query_prefix),
        ),
        LlmProvider::Ollama => {
            let client = ollama::Client::from_env();
            Arc::new(RigEmbedder::new(client.embedding_model(model), document_prefix, query_prefix))
        }
    }
}

// ---------------------------------------------------------------------
// CHAT / COMPLETION
// ---------------------------------------------------------------------

/// Agente de Rig sin preámbulo: el prompt completo lo arma `LlmManager`.
pub struct RigGenerator<M: CompletionModel> {
    agent: Agent<M>,
}

impl<M: CompletionModel> RigGenerator<M> {
    pub fn new(agent: Agent<M>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl<M> TextGenerator for RigGenerator<M>
where
    M: CompletionModel + 'static,
{
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.agent
            .prompt(prompt)
            .await
            .map_err(|e| RagError::Generation(e.to_string()))
    }
}

const TEXTBOOK_PREAMBLE: &str = r#"You are an expert assistant for the Physical AI & Humanoid Robotics textbook.
You help students understand ROS 2, robot simulation, NVIDIA Isaac and vision-language-action systems for humanoid robots.

Instructions:
- Answer accurately and clearly, using only the context provided below
- If the context does not contain enough information, say so explicitly
- Use technical terms appropriately and explain complex concepts
- Include practical examples when they help
- Mention the relevant modules or sections when appropriate
- Be encouraging and supportive with learners"#;

const SELECTION_PREAMBLE: &str = r#"You are an expert assistant for the Physical AI & Humanoid Robotics textbook.
The student has selected a passage of the book and has a question about it.

Instructions:
- Focus your answer on the selected text
- Give clear explanations and examples
- If the student asks for a simpler explanation, use analogies
- If the student asks for more depth, add technical detail
- Be concise but thorough"#;

/// Prompt para responder con el contexto recuperado del libro.
pub fn context_prompt(question: &str, context: &str) -> String {
    format!(
        "{TEXTBOOK_PREAMBLE}\n\nContext from the textbook:\n{context}\n\nStudent's question: {question}\n\nAnswer:"
    )
}

/// Prompt para explicar un fragmento seleccionado por el usuario.
pub fn selection_prompt(question: &str, selected_text: &str) -> String {
    format!(
        "{SELECTION_PREAMBLE}\n\nSelected text from the book:\n{selected_text}\n\nStudent's question: {question}\n\nAnswer:"
    )
}

/// Generador de respuestas del asistente.
#[derive(Clone)]
pub struct LlmManager {
    generator: Arc<dyn TextGenerator>,
}

impl LlmManager {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Construye el manager con el modelo de chat del proveedor configurado.
    pub fn from_config(cfg: &AppConfig) -> Self {
        let model = cfg.llm_chat_model.as_str();
        info!("Modelo de chat: {:?}/{}", cfg.llm_provider, model);

        let generator: Arc<dyn TextGenerator> = match cfg.llm_provider {
            LlmProvider::OpenAI => {
                let client = openai::Client::from_env();
                Arc::new(RigGenerator::new(client.agent(model).build()))
            }
            LlmProvider::Gemini => {
                let client = gemini::Client::from_env();
                Arc::new(RigGenerator::new(client.agent(model).build()))
            }
            LlmProvider::Ollama => {
                let client = ollama::Client::from_env();
                Arc::new(RigGenerator::new(client.agent(model).build()))
            }
        };
        Self::new(generator)
    }

    /// Genera una respuesta a partir de una pregunta y el contexto formateado.
    pub async fn answer_with_context(&self, question: &str, context: &str) -> Result<String> {
        let prompt = context_prompt(question, context);
        debug!("Prompt con contexto: {} caracteres", prompt.len());
        self.generator.generate(&prompt).await
    }

    /// Responde sobre un texto seleccionado. No hay paso de recuperación.
    pub async fn answer_from_selection(&self, question: &str, selected_text: &str) -> Result<String> {
        let prompt = selection_prompt(question, selected_text);
        self.generator.generate(&prompt).await
    }
}
