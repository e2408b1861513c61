//! Consulta RAG contra el índice vectorial del libro.
//!
//! Flujo:
//!   1. Embedding de la pregunta (modo consulta).
//!   2. Búsqueda vectorial con `top_k` y umbral de similitud.
//!   3. Formateo del contexto con atribución por fuente.
//!   4. El LLM responde usando sólo ese contexto.
//!
//! Si nada supera el umbral se devuelve una respuesta fija sin llamar al LLM.

use std::sync::Arc;
use tracing::info;

use crate::{
    embedding::EmbeddingClient,
    error::Result,
    llm::LlmManager,
    models::{Answer, RetrievalResult, Source},
    vector_store::VectorIndex,
};

/// Contexto que se usa cuando la recuperación no devuelve nada.
pub const NO_CONTEXT: &str = "No relevant context found in the textbook.";

/// Respuesta fija para preguntas sin contenido relevante en el índice.
pub const NO_RELEVANT_INFORMATION: &str = "I couldn't find relevant information in the textbook to answer your question. \
Could you rephrase or ask about topics covered in the Physical AI & Humanoid Robotics course?";

/// Orquestador de recuperación: embedding de la consulta + búsqueda filtrada.
#[derive(Clone)]
pub struct Retriever {
    embeddings: EmbeddingClient,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
    score_threshold: f64,
}

impl Retriever {
    pub fn new(
        embeddings: EmbeddingClient,
        index: Arc<dyn VectorIndex>,
        top_k: usize,
        score_threshold: f64,
    ) -> Self {
        Self {
            embeddings,
            index,
            top_k,
            score_threshold,
        }
    }

    /// Recupera como mucho `top_k` chunks con `score >= score_threshold`,
    /// ordenados de mayor a menor similitud. Sin resultados devuelve `Ok(vec![])`.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
        score_threshold: Option<f64>,
    ) -> Result<Vec<RetrievalResult>> {
        let top_k = top_k.unwrap_or(self.top_k);
        let threshold = score_threshold.unwrap_or(self.score_threshold);

        let query_vector = self.embeddings.embed_query(query).await?;
        let mut results = self.index.search(&query_vector, top_k, Some(threshold)).await?;

        results.retain(|r| r.score >= threshold);
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_k);

        info!("{} chunks relevantes recuperados (top_k={top_k}, umbral={threshold})", results.len());
        Ok(results)
    }
}

/// Convierte los resultados en un único bloque de contexto para el prompt.
pub fn format_context(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return NO_CONTEXT.to_string();
    }

    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            format!(
                "[Source {}] {} (Module: {})\nRelevance: {:.2}\n{}\n",
                i + 1,
                result.metadata.document.title,
                result.metadata.document.module,
                result.score,
                result.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// Pipeline de preguntas: recuperación + generación.
#[derive(Clone)]
pub struct RagPipeline {
    retriever: Retriever,
    llm: LlmManager,
}

impl RagPipeline {
    pub fn new(retriever: Retriever, llm: LlmManager) -> Self {
        Self { retriever, llm }
    }

    /// Responde una pregunta con contexto del libro.
    pub async fn answer(
        &self,
        question: &str,
        top_k: Option<usize>,
        score_threshold: Option<f64>,
    ) -> Result<Answer> {
        let results = self.retriever.retrieve(question, top_k, score_threshold).await?;

        if results.is_empty() {
            info!("Sin contexto relevante; se devuelve la respuesta por defecto.");
            return Ok(Answer {
                answer: NO_RELEVANT_INFORMATION.to_string(),
                sources: Vec::new(),
            });
        }

        let context = format_context(&results);
        let answer = self.llm.answer_with_context(question, &context).await?;
        let sources: Vec<Source> = results.iter().map(Source::from_result).collect();

        info!("Respuesta generada con {} fuentes", sources.len());
        Ok(Answer { answer, sources })
    }

    /// Responde sobre un texto seleccionado por el usuario, sin recuperación.
    pub async fn answer_selection(&self, question: &str, selected_text: &str) -> Result<Answer> {
        let answer = self.llm.answer_from_selection(question, selected_text).await?;
        Ok(Answer {
            answer,
            sources: vec![Source::from_selection(selected_text)],
        })
    }
}
