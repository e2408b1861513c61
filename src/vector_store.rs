//! Índice vectorial del pipeline.
//!
//! `VectorIndex` es el contrato que consume el pipeline; `Neo4jVectorIndex` lo
//! implementa con un índice vectorial coseno de Neo4j 5. Cada colección es
//! una etiqueta de nodo (`:<coleccion>`) con:
//!   - índice vectorial `<coleccion>_embedding` sobre `embedding`,
//!   - constraint de unicidad `<coleccion>_id` sobre `id`.
//!
//! El índice coseno de Neo4j puntúa con `(1 + cos) / 2`. Hacia fuera los
//! scores son similitud coseno acotada a [0, 1], y los umbrales se traducen
//! a la escala del índice antes de filtrar.

use async_trait::async_trait;
use neo4rs::{query, Graph};
use std::ops::Range;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{RagError, Result};
use crate::models::{ChunkMetadata, CollectionStats, IndexedPoint, RetrievalResult};

/// Número máximo de puntos por transacción de escritura.
pub const UPSERT_BATCH_SIZE: usize = 100;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Crea la colección si no existe; con `force_recreate` la borra antes.
    /// Devuelve `true` si hubo (re)creación.
    async fn ensure_collection(&self, force_recreate: bool) -> Result<bool>;

    /// Inserta o reemplaza puntos por id. Devuelve cuántos se escribieron.
    async fn upsert(&self, points: &[IndexedPoint]) -> Result<usize>;

    /// Como mucho `limit` resultados con `score >= score_threshold`, de mayor a menor.
    async fn search(
        &self,
        query_vector: &[f64],
        limit: usize,
        score_threshold: Option<f64>,
    ) -> Result<Vec<RetrievalResult>>;

    async fn collection_stats(&self) -> Result<CollectionStats>;

    /// Sonda de conectividad; nunca falla.
    async fn connectivity_check(&self) -> bool;

    async fn delete_collection(&self) -> bool;
}

fn is_valid_collection_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Score de `db.index.vector.queryNodes` → similitud coseno en [0, 1].
fn similarity_from_index_score(score: f64) -> f64 {
    (2.0 * score - 1.0).clamp(0.0, 1.0)
}

/// Umbral de similitud → umbral en la escala del índice. Con `t <= 0` no hay
/// que filtrar: los cosenos negativos también se reportan como 0.
fn index_score_threshold(similarity_threshold: f64) -> Option<f64> {
    (similarity_threshold > 0.0).then(|| (1.0 + similarity_threshold.min(1.0)) / 2.0)
}

/// Rangos de puntos que se escriben en cada transacción.
fn upsert_batches(total: usize) -> Vec<Range<usize>> {
    (0..total)
        .step_by(UPSERT_BATCH_SIZE)
        .map(|start| start..(start + UPSERT_BATCH_SIZE).min(total))
        .collect()
}

fn upsert_cypher(label: &str) -> String {
    format!(
        "MERGE (p:`{label}` {{id: $id}})
         SET p.text = $text, p.embedding = $embedding,
             p.filepath = $filepath, p.metadata = $metadata"
    )
}

/// Borrado de la colección: nodos, índice vectorial y constraint.
fn drop_statements(label: &str, index_name: &str, constraint_name: &str) -> [String; 3] {
    [
        format!("MATCH (p:`{label}`) DETACH DELETE p"),
        format!("DROP INDEX `{index_name}` IF EXISTS"),
        format!("DROP CONSTRAINT `{constraint_name}` IF EXISTS"),
    ]
}

fn search_cypher(with_threshold: bool) -> String {
    let filter = if with_threshold {
        "WHERE score >= $threshold"
    } else {
        ""
    };
    format!(
        "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
         YIELD node, score
         {filter}
         RETURN node.id AS id, node.text AS text, node.metadata AS metadata, score
         ORDER BY score DESC, id ASC"
    )
}

pub struct Neo4jVectorIndex {
    graph: Arc<Graph>,
    collection: String,
    dimension: usize,
}

impl Neo4jVectorIndex {
    /// `collection` se interpola en Cypher como etiqueta, así que sólo se
    /// aceptan `[A-Za-z0-9_]`.
    pub fn new(graph: Arc<Graph>, collection: &str, dimension: usize) -> Result<Self> {
        if !is_valid_collection_name(collection) {
            return Err(RagError::Config(format!("nombre de colección no válido: {collection}")));
        }
        Ok(Self {
            graph,
            collection: collection.to_string(),
            dimension,
        })
    }

    fn index_name(&self) -> String {
        format!("{}_embedding", self.collection)
    }

    fn constraint_name(&self) -> String {
        format!("{}_id", self.collection)
    }

    async fn collection_exists(&self) -> Result<bool> {
        let mut cursor = self
            .graph
            .execute(
                query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                    .param("name", self.index_name()),
            )
            .await?;
        Ok(cursor.next().await?.is_some())
    }

    async fn drop_collection(&self) -> Result<()> {
        for statement in drop_statements(&self.collection, &self.index_name(), &self.constraint_name()) {
            self.graph.run(query(&statement)).await?;
        }
        info!("Colección '{}' eliminada.", self.collection);
        Ok(())
    }

    async fn create_collection(&self) -> Result<()> {
        let label = &self.collection;
        let index_name = self.index_name();

        self.graph
            .run(query(&format!(
                "CREATE CONSTRAINT `{}` IF NOT EXISTS FOR (p:`{label}`) REQUIRE p.id IS UNIQUE",
                self.constraint_name()
            )))
            .await?;

        let cypher = format!(
            "\
CREATE VECTOR INDEX `{index_name}` IF NOT EXISTS
FOR (p:`{label}`)
ON (p.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimension},
    `vector.similarity_function`: 'cosine'
  }}
}}",
            dimension = self.dimension
        );
        self.graph.run(query(&cypher)).await?;
        self.graph
            .run(query("CALL db.awaitIndex($name, 300)").param("name", index_name.clone()))
            .await?;

        info!("Colección '{label}' creada (índice '{index_name}', {} dimensiones).", self.dimension);
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for Neo4jVectorIndex {
    async fn ensure_collection(&self, force_recreate: bool) -> Result<bool> {
        let exists = self.collection_exists().await?;

        if exists && !force_recreate {
            info!("La colección '{}' ya existe.", self.collection);
            return Ok(false);
        }
        if exists {
            info!("Recreando la colección '{}'...", self.collection);
            self.drop_collection().await?;
        }
        self.create_collection().await?;
        Ok(true)
    }

    async fn upsert(&self, points: &[IndexedPoint]) -> Result<usize> {
        if let Some(bad) = points.iter().find(|p| p.vector.len() != self.dimension) {
            return Err(RagError::VectorIndex(format!(
                "el punto {} tiene {} dimensiones (se esperaban {})",
                bad.id,
                bad.vector.len(),
                self.dimension
            )));
        }

        let cypher = upsert_cypher(&self.collection);

        for batch in upsert_batches(points.len()) {
            let tx = self.graph.start_txn().await?;
            for point in &points[batch] {
                let metadata = serde_json::to_string(&point.metadata)
                    .map_err(|e| RagError::VectorIndex(format!("metadatos no serializables: {e}")))?;
                tx.run(
                    query(&cypher)
                        .param("id", point.id.to_string())
                        .param("text", point.text.clone())
                        .param("embedding", point.vector.clone())
                        .param("filepath", point.metadata.document.filepath.clone())
                        .param("metadata", metadata),
                )
                .await?;
            }
            tx.commit().await?;
        }

        info!("{} puntos escritos en '{}'.", points.len(), self.collection);
        Ok(points.len())
    }

    async fn search(
        &self,
        query_vector: &[f64],
        limit: usize,
        score_threshold: Option<f64>,
    ) -> Result<Vec<RetrievalResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let raw_threshold = score_threshold.and_then(index_score_threshold);
        let cypher = search_cypher(raw_threshold.is_some());
        let mut q = query(&cypher)
            .param("index_name", self.index_name())
            .param("k", limit as i64)
            .param("embedding", query_vector.to_vec());
        if let Some(threshold) = raw_threshold {
            q = q.param("threshold", threshold);
        }

        let mut cursor = self.graph.execute(q).await?;
        let mut results = Vec::new();
        while let Some(row) = cursor.next().await? {
            let text: String = row
                .get("text")
                .ok_or_else(|| RagError::VectorIndex("falta el campo 'text' en el resultado".into()))?;
            let raw_score: f64 = row
                .get("score")
                .ok_or_else(|| RagError::VectorIndex("falta el campo 'score' en el resultado".into()))?;
            let score = similarity_from_index_score(raw_score);
            let raw_metadata: String = row
                .get("metadata")
                .ok_or_else(|| RagError::VectorIndex("falta el campo 'metadata' en el resultado".into()))?;
            let metadata: ChunkMetadata = serde_json::from_str(&raw_metadata)
                .map_err(|e| RagError::VectorIndex(format!("metadatos corruptos: {e}")))?;

            results.push(RetrievalResult { text, score, metadata });
        }

        info!("{} chunks similares encontrados.", results.len());
        Ok(results)
    }

    async fn collection_stats(&self) -> Result<CollectionStats> {
        let mut cursor = self
            .graph
            .execute(
                query("SHOW VECTOR INDEXES YIELD name, state WHERE name = $name RETURN state")
                    .param("name", self.index_name()),
            )
            .await?;
        let status: String = match cursor.next().await? {
            Some(row) => row.get("state").unwrap_or_else(|| "UNKNOWN".to_string()),
            None => {
                return Err(RagError::VectorIndex(format!(
                    "la colección '{}' no existe",
                    self.collection
                )))
            }
        };

        let mut cursor = self
            .graph
            .execute(query(&format!(
                "MATCH (p:`{}`) RETURN count(p) AS points",
                self.collection
            )))
            .await?;
        let points: i64 = match cursor.next().await? {
            Some(row) => row.get("points").unwrap_or(0),
            None => 0,
        };

        Ok(CollectionStats {
            vector_dimension: self.dimension,
            points_count: points.max(0) as u64,
            status,
        })
    }

    async fn connectivity_check(&self) -> bool {
        match self.graph.run(query("RETURN 1")).await {
            Ok(()) => true,
            Err(e) => {
                error!("Fallo en la comprobación de conexión con Neo4j: {e}");
                false
            }
        }
    }

    async fn delete_collection(&self) -> bool {
        match self.drop_collection().await {
            Ok(()) => true,
            Err(e) => {
                error!("Error eliminando la colección '{}': {e}", self.collection);
                false
            }
        }
    }
}
