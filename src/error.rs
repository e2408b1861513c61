//! Tipos de error del pipeline RAG.
//!
//! Se distinguen los fallos de servicio (embeddings, vector store, generación),
//! la validación de entrada y el caso "no hay documentos que indexar". Una
//! recuperación sin resultados NO es un error: se devuelve una lista vacía.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Entrada rechazada en la frontera (longitud de pregunta, selección...).
    #[error("Entrada no válida: {0}")]
    Validation(String),

    #[error("Error del servicio de embeddings: {0}")]
    Embedding(String),

    #[error("Error del índice vectorial: {0}")]
    VectorIndex(String),

    #[error("Error de Neo4j: {0}")]
    Neo4j(#[from] neo4rs::Error),

    #[error("Error del servicio de generación: {0}")]
    Generation(String),

    #[error("No se encontraron documentos que indexar en {}", .0.display())]
    NoDocuments(PathBuf),

    #[error("Configuración no válida: {0}")]
    Config(String),
}

impl RagError {
    /// `true` para errores causados por el cliente (se traducen a HTTP 400).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NoDocuments(_))
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
