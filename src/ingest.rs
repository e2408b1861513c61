//! Indexación del libro: recorre el directorio de documentos, parsea y trocea
//! cada fichero, calcula los embeddings y escribe los puntos en el índice.

use std::{collections::HashSet, fs, path::Path, path::PathBuf, sync::Arc};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{
    chunker::Chunker,
    content_parser,
    embedding::EmbeddingClient,
    error::{RagError, Result},
    models::{Chunk, Document, IndexedPoint, IndexingReport},
    vector_store::VectorIndex,
};

/// Extensiones de fichero que se indexan.
const DOCUMENT_EXTENSIONS: [&str; 2] = ["md", "mdx"];

#[derive(Clone)]
pub struct IndexingPipeline {
    docs_root: PathBuf,
    chunker: Chunker,
    embeddings: EmbeddingClient,
    index: Arc<dyn VectorIndex>,
}

impl IndexingPipeline {
    pub fn new(
        docs_root: PathBuf,
        chunker: Chunker,
        embeddings: EmbeddingClient,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            docs_root,
            chunker,
            embeddings,
            index,
        }
    }

    /// Indexa todos los documentos. Con `force_reindex` la colección se
    /// elimina y se vuelve a crear antes de escribir.
    pub async fn run(&self, force_reindex: bool) -> Result<IndexingReport> {
        info!(
            "Iniciando indexación de {} (chunks de {} caracteres, solape {}, {} dimensiones)",
            self.docs_root.display(),
            self.chunker.chunk_size(),
            self.chunker.overlap(),
            self.embeddings.dimension()
        );

        let (documents, files_skipped) = load_documents(&self.docs_root);
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| self.chunker.chunk_document(doc))
            .collect();

        if chunks.is_empty() {
            return Err(RagError::NoDocuments(self.docs_root.clone()));
        }

        let documents_processed = chunks
            .iter()
            .map(|c| c.metadata.document.filepath.as_str())
            .collect::<HashSet<_>>()
            .len();
        info!(
            "{} chunks creados a partir de {} documentos",
            chunks.len(),
            documents_processed
        );

        self.index.ensure_collection(force_reindex).await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batch = self.embeddings.embed_document_batch(&texts).await;
        if !batch.degraded.is_empty() {
            warn!(
                "{} chunks indexados con embedding a cero; revisar el servicio de embeddings",
                batch.degraded.len()
            );
        }

        let points: Vec<IndexedPoint> = chunks
            .into_iter()
            .zip(batch.embeddings)
            .map(|(chunk, vector)| IndexedPoint::new(chunk, vector))
            .collect();
        let chunks_created = self.index.upsert(&points).await?;

        let report = IndexingReport {
            documents_processed,
            chunks_created,
            files_skipped,
            degraded_embeddings: batch.degraded.len(),
        };
        info!("Indexación completada: {report}");
        Ok(report)
    }
}

/// Carga todos los `.md` / `.mdx` bajo `root` en orden determinista.
///
/// Devuelve los documentos legibles y el número de entradas omitidas (ficheros
/// ilegibles y entradas que no se pudieron recorrer, p. ej. enlaces rotos).
pub fn load_documents(root: &Path) -> (Vec<Document>, usize) {
    if !root.is_dir() {
        warn!("La ruta de documentos no existe o no es un directorio: {}", root.display());
        return (Vec::new(), 0);
    }

    let mut documents = Vec::new();
    let mut skipped = 0;

    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                skipped += 1;
                warn!("Saltando entrada no accesible: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_document(entry.path()) {
            continue;
        }

        let path = entry.path();
        match fs::read_to_string(path) {
            Ok(raw) => {
                let document = content_parser::parse_document(root, path, &raw);
                if document.text.trim().is_empty() {
                    warn!("Documento sin contenido útil: {}", path.display());
                    continue;
                }
                documents.push(document);
            }
            Err(err) => {
                skipped += 1;
                warn!("Saltando fichero {}: {err}", path.display());
            }
        }
    }

    info!("{} documentos cargados, {} omitidos", documents.len(), skipped);
    (documents, skipped)
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(std::ffi::OsStr::to_str)
        .map(|ext| DOCUMENT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
