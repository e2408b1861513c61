//! Cliente de embeddings: modo documento vs. modo consulta y lote tolerante a fallos.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{RagError, Result};
use crate::models::Embedding;

/// Tipo de embedding solicitado. Algunos modelos son asimétricos y generan
/// vectores distintos para el mismo texto según el modo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Document,
    Query,
}

/// Servicio externo de embeddings (proveedor intercambiable).
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Embedding>;
}

/// Resultado de `embed_document_batch`: un vector por texto, en el mismo orden.
#[derive(Debug, Clone)]
pub struct BatchEmbeddings {
    pub embeddings: Vec<Embedding>,
    /// Posiciones cuyo embedding falló y se sustituyó por un vector a cero.
    pub degraded: Vec<usize>,
}

#[derive(Clone)]
pub struct EmbeddingClient {
    service: Arc<dyn EmbeddingService>,
    dimension: usize,
}

impl EmbeddingClient {
    pub fn new(service: Arc<dyn EmbeddingService>, dimension: usize) -> Self {
        Self { service, dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn embed_document(&self, text: &str) -> Result<Embedding> {
        self.embed(text, EmbedMode::Document).await
    }

    pub async fn embed_query(&self, text: &str) -> Result<Embedding> {
        self.embed(text, EmbedMode::Query).await
    }

    /// Embeddings de documento para un lote, uno a uno.
    ///
    /// Un fallo individual no aborta el lote: ese elemento recibe un vector a
    /// cero de la dimensión configurada y queda registrado en `degraded`. Esos
    /// puntos puntúan de forma arbitraria en las búsquedas.
    pub async fn embed_document_batch(&self, texts: &[String]) -> BatchEmbeddings {
        let mut embeddings = Vec::with_capacity(texts.len());
        let mut degraded = Vec::new();

        for (index, text) in texts.iter().enumerate() {
            match self.embed_document(text).await {
                Ok(vector) => embeddings.push(vector),
                Err(err) => {
                    warn!("Embedding fallido para el elemento {index} del lote, se usa un vector a cero: {err}");
                    embeddings.push(vec![0.0; self.dimension]);
                    degraded.push(index);
                }
            }
        }

        debug!(
            "Lote de embeddings: {} textos, {} degradados",
            texts.len(),
            degraded.len()
        );
        BatchEmbeddings { embeddings, degraded }
    }

    async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Embedding> {
        let vector = self.service.embed(text, mode).await?;
        if vector.len() != self.dimension {
            return Err(RagError::Embedding(format!(
                "dimensión inesperada: {} (se esperaba {})",
                vector.len(),
                self.dimension
            )));
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEmbedder;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn batch_substitutes_zero_vector_for_failed_item() {
        let service = FakeEmbedder::new(4).failing_on("second");
        let client = EmbeddingClient::new(Arc::new(service), 4);

        let texts = vec!["first".to_string(), "second".to_string(), "third".to_string()];
        let batch = client.embed_document_batch(&texts).await;

        assert_eq!(batch.embeddings.len(), 3);
        assert_eq!(batch.embeddings[1], vec![0.0; 4]);
        assert!(batch.embeddings[0].iter().any(|v| *v != 0.0));
        assert!(batch.embeddings[2].iter().any(|v| *v != 0.0));
        assert_eq!(batch.degraded, vec![1]);
    }

    #[tokio::test]
    async fn single_failures_propagate() {
        let client = EmbeddingClient::new(Arc::new(FakeEmbedder::new(4).failing_on("boom")), 4);
        assert_err!(client.embed_query("boom").await);
        assert_err!(client.embed_document("boom").await);
        assert_ok!(client.embed_query("fine").await);
    }

    #[tokio::test]
    async fn query_and_document_modes_may_differ() {
        let client = EmbeddingClient::new(Arc::new(FakeEmbedder::new(8)), 8);
        let doc = client.embed_document("What is ROS 2?").await.unwrap();
        let query = client.embed_query("What is ROS 2?").await.unwrap();
        assert_ne!(doc, query);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let client = EmbeddingClient::new(Arc::new(FakeEmbedder::new(3)), 4);
        let err = client.embed_query("x").await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));

        let batch = client.embed_document_batch(&["x".to_string()]).await;
        assert_eq!(batch.degraded, vec![0]);
        assert_eq!(batch.embeddings[0].len(), 4);
    }
}
