use crate::config::AppConfig;
use anyhow::{Context, Result};
use neo4rs::Graph;
use tracing::info;
use url::Url;

/// Abre la conexión a Neo4j a partir de `NEO4J_URI` (se usan host y puerto).
pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    connect(&cfg.neo4j_uri, &cfg.neo4j_user, &cfg.neo4j_password).await
}

pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Graph> {
    let addr = bolt_address(uri)?;

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, user, password)
        .await
        .with_context(|| format!("No se pudo conectar a Neo4j en {addr}"))?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

fn bolt_address(uri: &str) -> Result<String> {
    let url = Url::parse(uri).with_context(|| format!("NEO4J_URI no válida: {uri}"))?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bolt_address_defaults_port() {
        assert_eq!(bolt_address("neo4j://db.internal").unwrap(), "db.internal:7687");
        assert_eq!(bolt_address("bolt://127.0.0.1:7999").unwrap(), "127.0.0.1:7999");
        assert!(bolt_address("not a uri").is_err());
    }
}
