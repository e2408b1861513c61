//! Modelos de dominio: documentos, chunks, puntos indexados y resultados de
//! recuperación tal y como circulan por el pipeline RAG.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Vector de embedding de dimensión fija (definida por el modelo).
pub type Embedding = Vec<f64>;

/// Longitud máxima (en caracteres) del extracto que se devuelve en cada `Source`.
pub const PREVIEW_CHARS: usize = 200;

/// Metadatos a nivel de documento. Los campos conocidos van tipados; el resto
/// de claves del frontmatter se conservan en `extra` y se serializan en plano.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub filename: String,
    /// Ruta relativa a la raíz de documentos. Única por documento.
    pub filepath: String,
    pub title: String,
    pub module: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// Documento fuente ya parseado: `text` es el cuerpo sin frontmatter.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub text: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(flatten)]
    pub document: DocumentMetadata,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Trozo de texto de un documento, listo para calcular su embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Punto persistido en el índice vectorial.
#[derive(Debug, Clone)]
pub struct IndexedPoint {
    pub id: Uuid,
    pub text: String,
    pub vector: Embedding,
    pub metadata: ChunkMetadata,
}

impl IndexedPoint {
    pub fn new(chunk: Chunk, vector: Embedding) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: chunk.text,
            vector,
            metadata: chunk.metadata,
        }
    }
}

/// Resultado de una búsqueda por similitud, ordenado por `score` descendente.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub text: String,
    pub score: f64,
    pub metadata: ChunkMetadata,
}

/// Proyección de un resultado lista para mostrarse al usuario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub content: String,
    pub similarity_score: f64,
    pub metadata: Value,
}

impl Source {
    pub fn from_result(result: &RetrievalResult) -> Self {
        Self {
            title: result.metadata.document.title.clone(),
            content: preview(&result.text),
            similarity_score: result.score,
            metadata: serde_json::to_value(&result.metadata).unwrap_or(Value::Null),
        }
    }

    /// Fuente sintética que representa el texto seleccionado por el usuario.
    pub fn from_selection(selected_text: &str) -> Self {
        Self {
            title: "Selected Text".to_string(),
            content: preview(selected_text),
            similarity_score: 1.0,
            metadata: json!({ "type": "user_selection" }),
        }
    }
}

/// Respuesta generada junto con las fuentes que la justifican.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub vector_dimension: usize,
    pub points_count: u64,
    pub status: String,
}

/// Resumen de una ejecución de indexación.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexingReport {
    /// Documentos distintos (por `filepath`), no chunks.
    pub documents_processed: usize,
    pub chunks_created: usize,
    pub files_skipped: usize,
    /// Chunks indexados con un vector a cero porque su embedding falló.
    pub degraded_embeddings: usize,
}

impl std::fmt::Display for IndexingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} documentos, {} chunks, {} ficheros omitidos, {} embeddings degradados",
            self.documents_processed, self.chunks_created, self.files_skipped, self.degraded_embeddings
        )
    }
}

/// Recorta `text` a `PREVIEW_CHARS` caracteres, añadiendo `...` si se truncó.
pub fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ChunkMetadata {
        let mut extra = BTreeMap::new();
        extra.insert("sidebar_position".to_string(), "2".to_string());
        ChunkMetadata {
            document: DocumentMetadata {
                filename: "intro.mdx".into(),
                filepath: "module-1-ros2/intro.mdx".into(),
                title: "Module 1: ROS 2 Architecture".into(),
                module: "Module 1 Ros2".into(),
                extra,
            },
            chunk_index: 0,
            total_chunks: 3,
        }
    }

    #[test]
    fn preview_truncates_by_characters() {
        let short = "a".repeat(PREVIEW_CHARS);
        assert_eq!(preview(&short), short);

        let long = "é".repeat(PREVIEW_CHARS + 1);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
    }

    #[test]
    fn chunk_metadata_serializes_flat() {
        let value = serde_json::to_value(metadata()).unwrap();
        assert_eq!(value["filepath"], "module-1-ros2/intro.mdx");
        assert_eq!(value["sidebar_position"], "2");
        assert_eq!(value["chunk_index"], 0);
        assert_eq!(value["total_chunks"], 3);

        let back: ChunkMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, metadata());
    }

    #[test]
    fn source_from_result_uses_title_and_score() {
        let result = RetrievalResult {
            text: "x".repeat(250),
            score: 0.89,
            metadata: metadata(),
        };
        let source = Source::from_result(&result);
        assert_eq!(source.title, "Module 1: ROS 2 Architecture");
        assert_eq!(source.similarity_score, 0.89);
        assert_eq!(source.content.len(), PREVIEW_CHARS + 3);
        assert_eq!(source.metadata["module"], "Module 1 Ros2");
    }

    #[test]
    fn selection_source_is_tagged() {
        let source = Source::from_selection("ROS 2 nodes communicate over topics.");
        assert_eq!(source.title, "Selected Text");
        assert_eq!(source.similarity_score, 1.0);
        assert_eq!(source.metadata, json!({ "type": "user_selection" }));
    }
}
