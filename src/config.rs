//! Carga y gestión de configuración de la aplicación (Neo4j + LLM + RAG).

use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

impl LlmProvider {
    fn default_embedding_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "text-embedding-3-small",
            Self::Gemini => "text-embedding-004",
            Self::Ollama => "nomic-embed-text",
        }
    }

    fn default_embedding_dimension(&self) -> usize {
        match self {
            Self::OpenAI => 1536,
            Self::Gemini | Self::Ollama => 768,
        }
    }

    fn default_chat_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-2.5-flash",
            Self::Ollama => "llama3.1",
        }
    }

    /// Variable de entorno que rig necesita para construir el cliente.
    fn credential_var(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::Ollama => "OLLAMA_API_BASE_URL",
        }
    }

    /// Prefijos (documento, consulta) para modelos con embeddings asimétricos.
    fn default_embedding_prefixes(&self) -> (&'static str, &'static str) {
        match self {
            Self::Ollama => ("search_document: ", "search_query: "),
            Self::OpenAI | Self::Gemini => ("", ""),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,
    pub cors_origins: Vec<String>,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub embedding_dimension: usize,
    pub embedding_document_prefix: String,
    pub embedding_query_prefix: String,
    pub gemini_api_key: Option<String>,
    pub gemini_api_base_url: String,

    pub collection_name: String,
    pub book_docs_path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k_results: usize,
    pub similarity_threshold: f64,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de búsqueda de claves.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| lookup(key).ok_or_else(|| anyhow!("Falta {key} en el entorno"));
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let neo4j_uri = required("NEO4J_URI")?;
        let neo4j_user = required("NEO4J_USER")?;
        let neo4j_password = required("NEO4J_PASSWORD")?;

        let server_addr = or_default("SERVER_ADDR", "127.0.0.1:8000");
        let cors_origins = or_default("CORS_ORIGINS", "http://localhost:3000,http://localhost:5173")
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let llm_provider: LlmProvider = or_default("LLM_PROVIDER", "gemini").parse()?;
        let credential = llm_provider.credential_var();
        if lookup(credential).is_none() {
            bail!("Falta {credential} en el entorno (necesaria para LLM_PROVIDER={llm_provider:?})");
        }
        let llm_embedding_model = or_default("LLM_EMBEDDING_MODEL", llm_provider.default_embedding_model());
        let llm_chat_model = or_default("LLM_CHAT_MODEL", llm_provider.default_chat_model());
        let embedding_dimension = parse_or(&lookup, "EMBEDDING_DIMENSION", llm_provider.default_embedding_dimension())?;
        let (document_prefix, query_prefix) = llm_provider.default_embedding_prefixes();
        let embedding_document_prefix = or_default("EMBEDDING_DOCUMENT_PREFIX", document_prefix);
        let embedding_query_prefix = or_default("EMBEDDING_QUERY_PREFIX", query_prefix);
        let gemini_api_key = lookup("GEMINI_API_KEY");
        let gemini_api_base_url = or_default("GEMINI_API_BASE_URL", "https://generativelanguage.googleapis.com");

        let collection_name = or_default("COLLECTION_NAME", "humanoid_robotics_book");
        let book_docs_path = PathBuf::from(or_default("BOOK_DOCS_PATH", "../../humanoid-robotics-book/docs"));
        let chunk_size = parse_or(&lookup, "CHUNK_SIZE", 1000)?;
        let chunk_overlap = parse_or(&lookup, "CHUNK_OVERLAP", 200)?;
        let top_k_results = parse_or(&lookup, "TOP_K_RESULTS", 5)?;
        let similarity_threshold = parse_or(&lookup, "SIMILARITY_THRESHOLD", 0.5)?;

        let cfg = Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            cors_origins,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            embedding_dimension,
            embedding_document_prefix,
            embedding_query_prefix,
            gemini_api_key,
            gemini_api_base_url,
            collection_name,
            book_docs_path,
            chunk_size,
            chunk_overlap,
            top_k_results,
            similarity_threshold,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("CHUNK_SIZE debe ser mayor que 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            bail!(
                "CHUNK_OVERLAP ({}) debe ser menor que CHUNK_SIZE ({})",
                self.chunk_overlap,
                self.chunk_size
            );
        }
        if self.top_k_results == 0 {
            bail!("TOP_K_RESULTS debe ser mayor que 0");
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            bail!("SIMILARITY_THRESHOLD debe estar entre 0 y 1");
        }
        if self.embedding_dimension == 0 {
            bail!("EMBEDDING_DIMENSION debe ser mayor que 0");
        }
        let valid_name = !self.collection_name.is_empty()
            && self
                .collection_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            bail!(
                "COLLECTION_NAME sólo admite letras, dígitos y '_': {}",
                self.collection_name
            );
        }
        Ok(())
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor no válido para {key}: {raw}")),
        None => Ok(default),
    }
}
