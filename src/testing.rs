//! Dobles de prueba para los servicios externos.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::embedding::{EmbedMode, EmbeddingService};
use crate::error::{RagError, Result};
use crate::llm::TextGenerator;
use crate::models::{CollectionStats, Embedding, IndexedPoint, RetrievalResult};
use crate::vector_store::VectorIndex;

/// Embeddings deterministas; el modo consulta produce un vector distinto.
pub struct FakeEmbedder {
    dimension: usize,
    failing: HashSet<String>,
    fixed: HashMap<String, Embedding>,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            failing: HashSet::new(),
            fixed: HashMap::new(),
        }
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    /// Vector fijo para `text` en ambos modos.
    pub fn with_vector(mut self, text: &str, vector: Embedding) -> Self {
        self.fixed.insert(text.to_string(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingService for FakeEmbedder {
    async fn embed(&self, text: &str, mode: EmbedMode) -> Result<Embedding> {
        if self.failing.contains(text) {
            return Err(RagError::Embedding(format!("fallo simulado para '{text}'")));
        }
        if let Some(vector) = self.fixed.get(text) {
            return Ok(vector.clone());
        }

        let seed: usize = text.bytes().map(usize::from).sum();
        let salt = match mode {
            EmbedMode::Document => 0,
            EmbedMode::Query => 7,
        };
        Ok((0..self.dimension)
            .map(|i| ((seed * (i + 1) + salt) % 17 + 1) as f64)
            .collect())
    }
}

/// Generador que registra los prompts recibidos.
pub struct RecordingGenerator {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for RecordingGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply
            .clone()
            .ok_or_else(|| RagError::Generation("servicio no disponible".into()))
    }
}

/// Índice vectorial en memoria con similitud coseno.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    points: Mutex<Vec<IndexedPoint>>,
    exists: Mutex<bool>,
    searches: AtomicUsize,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> Vec<IndexedPoint> {
        self.points.lock().unwrap().clone()
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = |v: &[f64]| v.iter().map(|x| x * x).sum::<f64>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_collection(&self, force_recreate: bool) -> Result<bool> {
        let mut exists = self.exists.lock().unwrap();
        if *exists && !force_recreate {
            return Ok(false);
        }
        self.points.lock().unwrap().clear();
        *exists = true;
        Ok(true)
    }

    async fn upsert(&self, points: &[IndexedPoint]) -> Result<usize> {
        let mut stored = self.points.lock().unwrap();
        for point in points {
            stored.retain(|p| p.id != point.id);
            stored.push(point.clone());
        }
        Ok(points.len())
    }

    async fn search(
        &self,
        query_vector: &[f64],
        limit: usize,
        score_threshold: Option<f64>,
    ) -> Result<Vec<RetrievalResult>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let mut results: Vec<RetrievalResult> = self
            .points
            .lock()
            .unwrap()
            .iter()
            .map(|p| RetrievalResult {
                text: p.text.clone(),
                score: cosine(query_vector, &p.vector),
                metadata: p.metadata.clone(),
            })
            .filter(|r| score_threshold.map_or(true, |t| r.score >= t))
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);
        Ok(results)
    }

    async fn collection_stats(&self) -> Result<CollectionStats> {
        Ok(CollectionStats {
            vector_dimension: 0,
            points_count: self.points.lock().unwrap().len() as u64,
            status: "ONLINE".to_string(),
        })
    }

    async fn connectivity_check(&self) -> bool {
        true
    }

    async fn delete_collection(&self) -> bool {
        self.points.lock().unwrap().clear();
        *self.exists.lock().unwrap() = false;
        true
    }
}
